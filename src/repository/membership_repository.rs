use async_trait::async_trait;
use chrono::{DateTime, Utc, NaiveDateTime};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::{
    domain::{Membership, MembershipGrant, MembershipPurchase, MembershipType},
    error::{AppError, Result},
    repository::{membership_type_to_str, parse_membership_type, parse_uuid, MembershipRepository},
};

const MEMBERSHIP_COLUMNS: &str = r#"
    id, gym_id, user_id, membership_type, remaining_sessions,
    expires_at, is_active, created_at, updated_at
"#;

#[derive(FromRow)]
struct MembershipRow {
    id: String,
    gym_id: String,
    user_id: String,
    membership_type: String,
    remaining_sessions: i32,
    expires_at: Option<NaiveDateTime>,
    is_active: i32,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(FromRow)]
struct GrantRow {
    payment_id: String,
    membership_id: String,
    membership_type: String,
    quantity: i32,
    granted_at: NaiveDateTime,
}

pub struct SqliteMembershipRepository {
    pool: SqlitePool,
}

impl SqliteMembershipRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_membership(row: MembershipRow) -> Result<Membership> {
        Ok(Membership {
            id: parse_uuid(&row.id)?,
            gym_id: parse_uuid(&row.gym_id)?,
            user_id: parse_uuid(&row.user_id)?,
            membership_type: parse_membership_type(&row.membership_type)?,
            remaining_sessions: row.remaining_sessions,
            expires_at: row.expires_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            is_active: row.is_active != 0,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }

    fn row_to_grant(row: GrantRow) -> Result<MembershipGrant> {
        Ok(MembershipGrant {
            payment_id: parse_uuid(&row.payment_id)?,
            membership_id: parse_uuid(&row.membership_id)?,
            membership_type: parse_membership_type(&row.membership_type)?,
            quantity: row.quantity,
            granted_at: DateTime::from_naive_utc_and_offset(row.granted_at, Utc),
        })
    }

    async fn insert(tx: &mut Transaction<'_, Sqlite>, membership: &Membership) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (
                id, gym_id, user_id, membership_type, remaining_sessions,
                expires_at, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(membership.id.to_string())
        .bind(membership.gym_id.to_string())
        .bind(membership.user_id.to_string())
        .bind(membership_type_to_str(&membership.membership_type))
        .bind(membership.remaining_sessions)
        .bind(membership.expires_at.map(|dt| dt.naive_utc()))
        .bind(membership.is_active as i32)
        .bind(membership.created_at.naive_utc())
        .bind(membership.updated_at.naive_utc())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn save_balance(tx: &mut Transaction<'_, Sqlite>, membership: &Membership) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE memberships
            SET remaining_sessions = ?,
                expires_at = ?,
                is_active = ?,
                updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(membership.remaining_sessions)
        .bind(membership.expires_at.map(|dt| dt.naive_utc()))
        .bind(membership.is_active as i32)
        .bind(membership.updated_at.naive_utc())
        .bind(membership.id.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Picks the membership a purchase extends: the pinned one if given,
    /// otherwise the newest active one of the same type.
    async fn grant_target(
        tx: &mut Transaction<'_, Sqlite>,
        gym_id: Uuid,
        user_id: Uuid,
        purchase: &MembershipPurchase,
    ) -> Result<Option<Membership>> {
        if let Some(id) = purchase.membership_id {
            let sql = format!("SELECT {} FROM memberships WHERE id = ?", MEMBERSHIP_COLUMNS);
            let row = sqlx::query_as::<_, MembershipRow>(&sql)
                .bind(id.to_string())
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Membership {} not found", id)))?;
            let membership = Self::row_to_membership(row)?;

            if membership.gym_id != gym_id || membership.user_id != user_id {
                return Err(AppError::BadRequest(
                    "Membership does not belong to this user".to_string(),
                ));
            }
            if membership.membership_type != purchase.membership_type {
                return Err(AppError::BadRequest(
                    "Purchase type does not match the membership".to_string(),
                ));
            }

            return Ok(Some(membership));
        }

        let sql = format!(
            r#"
            SELECT {} FROM memberships
            WHERE gym_id = ? AND user_id = ? AND membership_type = ? AND is_active = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            MEMBERSHIP_COLUMNS
        );
        let row = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(gym_id.to_string())
            .bind(user_id.to_string())
            .bind(membership_type_to_str(&purchase.membership_type))
            .fetch_optional(&mut **tx)
            .await?;

        row.map(Self::row_to_membership).transpose()
    }
}

#[async_trait]
impl MembershipRepository for SqliteMembershipRepository {
    async fn create(&self, membership: Membership) -> Result<Membership> {
        let mut tx = self.pool.begin().await?;
        Self::insert(&mut tx, &membership).await?;
        tx.commit().await?;

        self.find_by_id(membership.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created membership".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Membership>> {
        let sql = format!("SELECT {} FROM memberships WHERE id = ?", MEMBERSHIP_COLUMNS);
        let row = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_membership).transpose()
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Membership>> {
        let sql = format!(
            "SELECT {} FROM memberships WHERE user_id = ? ORDER BY created_at DESC",
            MEMBERSHIP_COLUMNS
        );
        let rows = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Self::row_to_membership)
            .collect()
    }

    async fn find_active(&self, gym_id: Uuid, user_id: Uuid, membership_type: Option<MembershipType>) -> Result<Option<Membership>> {
        let sql = format!(
            r#"
            SELECT {} FROM memberships
            WHERE gym_id = ? AND user_id = ? AND is_active = 1
              AND (? IS NULL OR membership_type = ?)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            MEMBERSHIP_COLUMNS
        );
        let type_str = membership_type.as_ref().map(membership_type_to_str);
        let row = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(gym_id.to_string())
            .bind(user_id.to_string())
            .bind(type_str)
            .bind(type_str)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_membership).transpose()
    }

    async fn deduct_session(&self, id: Uuid) -> Result<Option<Membership>> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET remaining_sessions = MAX(remaining_sessions - 1, 0),
                updated_at = ?
            WHERE id = ? AND membership_type = 'SessionBased'
            "#
        )
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_by_id(id).await
    }

    async fn apply_grant(
        &self,
        payment_id: Uuid,
        gym_id: Uuid,
        user_id: Uuid,
        purchase: &MembershipPurchase,
    ) -> Result<Option<(Membership, MembershipGrant)>> {
        let now = Utc::now();
        let payment_id_str = payment_id.to_string();
        let mut tx = self.pool.begin().await?;

        let granted: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM membership_grants WHERE payment_id = ?"
        )
        .bind(&payment_id_str)
        .fetch_one(&mut *tx)
        .await?;

        if granted > 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let target = Self::grant_target(&mut tx, gym_id, user_id, purchase).await?;
        let is_new = target.is_none();
        let mut membership = target
            .unwrap_or_else(|| Membership::new(gym_id, user_id, purchase.membership_type));

        membership
            .apply_purchase(purchase.quantity, now)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid purchase quantity: {}", purchase.quantity)))?;

        if is_new {
            Self::insert(&mut tx, &membership).await?;
        } else {
            Self::save_balance(&mut tx, &membership).await?;
        }

        let grant = MembershipGrant {
            payment_id,
            membership_id: membership.id,
            membership_type: purchase.membership_type,
            quantity: purchase.quantity,
            granted_at: now,
        };

        // Racing activators for the same payment both get here; the primary
        // key lets exactly one of them commit.
        let inserted = sqlx::query(
            r#"
            INSERT INTO membership_grants (payment_id, membership_id, membership_type, quantity, granted_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(payment_id) DO NOTHING
            "#
        )
        .bind(&payment_id_str)
        .bind(grant.membership_id.to_string())
        .bind(membership_type_to_str(&grant.membership_type))
        .bind(grant.quantity)
        .bind(now.naive_utc())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some((membership, grant)))
    }

    async fn find_grant(&self, payment_id: Uuid) -> Result<Option<MembershipGrant>> {
        let row = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT payment_id, membership_id, membership_type, quantity, granted_at
            FROM membership_grants
            WHERE payment_id = ?
            "#
        )
        .bind(payment_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_grant).transpose()
    }
}
