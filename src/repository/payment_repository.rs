use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc, NaiveDateTime};
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    domain::{MembershipPurchase, Payment, PaymentStatus},
    error::{AppError, Result},
    repository::{
        membership_type_to_str, parse_membership_type, parse_uuid, PaymentRepository,
        PaymentTransition, VERIFICATION_LEASE_MINUTES,
    },
};

const PAYMENT_COLUMNS: &str = r#"
    id, gym_id, user_id, amount, is_online, is_paid, status,
    gateway_name, tracking_number, gateway_reference, transaction_code,
    purchase_type, purchase_quantity, membership_id,
    refund_reason, cancellation_reason,
    created_at, verified_at, updated_at, refunded_at
"#;

#[derive(FromRow)]
struct PaymentRow {
    id: String,
    gym_id: String,
    user_id: Option<String>,
    amount: i64,
    is_online: i32,
    is_paid: i32,
    status: String,
    gateway_name: Option<String>,
    tracking_number: Option<i64>,
    gateway_reference: Option<String>,
    transaction_code: Option<String>,
    purchase_type: Option<String>,
    purchase_quantity: Option<i32>,
    membership_id: Option<String>,
    refund_reason: Option<String>,
    cancellation_reason: Option<String>,
    created_at: NaiveDateTime,
    verified_at: Option<NaiveDateTime>,
    updated_at: NaiveDateTime,
    refunded_at: Option<NaiveDateTime>,
}

pub struct SqlitePaymentRepository {
    pool: SqlitePool,
}

impl SqlitePaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PaymentRow) -> Result<Payment> {
        let purchase = match (row.purchase_type.as_deref(), row.purchase_quantity) {
            (Some(kind), Some(quantity)) => Some(MembershipPurchase {
                membership_type: parse_membership_type(kind)?,
                quantity,
                membership_id: row.membership_id.as_deref().map(parse_uuid).transpose()?,
            }),
            _ => None,
        };

        Ok(Payment {
            id: parse_uuid(&row.id)?,
            gym_id: parse_uuid(&row.gym_id)?,
            user_id: row.user_id.as_deref().map(parse_uuid).transpose()?,
            amount: row.amount,
            is_online: row.is_online != 0,
            is_paid: row.is_paid != 0,
            status: Self::parse_payment_status(&row.status)?,
            gateway_name: row.gateway_name,
            tracking_number: row.tracking_number,
            gateway_reference: row.gateway_reference,
            transaction_code: row.transaction_code,
            purchase,
            refund_reason: row.refund_reason,
            cancellation_reason: row.cancellation_reason,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            verified_at: row.verified_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
            refunded_at: row.refunded_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
        })
    }

    fn parse_payment_status(s: &str) -> Result<PaymentStatus> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Completed" => Ok(PaymentStatus::Completed),
            "Failed" => Ok(PaymentStatus::Failed),
            "Cancelled" => Ok(PaymentStatus::Cancelled),
            "Refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(AppError::Database(format!("Invalid payment status: {}", s))),
        }
    }

    fn payment_status_to_str(status: &PaymentStatus) -> &'static str {
        match status {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Cancelled => "Cancelled",
            PaymentStatus::Refunded => "Refunded",
        }
    }

    /// Claims taken before this instant no longer block anyone.
    fn lease_cutoff() -> NaiveDateTime {
        (Utc::now() - Duration::minutes(VERIFICATION_LEASE_MINUTES)).naive_utc()
    }

    async fn fetch_one_where(&self, clause: &str, value: String) -> Result<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE {}", PAYMENT_COLUMNS, clause);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_payment).transpose()
    }
}

#[async_trait]
impl PaymentRepository for SqlitePaymentRepository {
    async fn create(&self, payment: Payment) -> Result<Payment> {
        let status_str = Self::payment_status_to_str(&payment.status);
        let purchase_type = payment.purchase.as_ref().map(|p| membership_type_to_str(&p.membership_type));
        let purchase_quantity = payment.purchase.as_ref().map(|p| p.quantity);
        let membership_id = payment
            .purchase
            .as_ref()
            .and_then(|p| p.membership_id)
            .map(|id| id.to_string());

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, gym_id, user_id, amount, is_online, is_paid, status,
                gateway_name, tracking_number, gateway_reference, transaction_code,
                purchase_type, purchase_quantity, membership_id,
                refund_reason, cancellation_reason,
                created_at, verified_at, updated_at, refunded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(payment.id.to_string())
        .bind(payment.gym_id.to_string())
        .bind(payment.user_id.map(|id| id.to_string()))
        .bind(payment.amount)
        .bind(payment.is_online as i32)
        .bind(payment.is_paid as i32)
        .bind(status_str)
        .bind(&payment.gateway_name)
        .bind(payment.tracking_number)
        .bind(&payment.gateway_reference)
        .bind(&payment.transaction_code)
        .bind(purchase_type)
        .bind(purchase_quantity)
        .bind(membership_id)
        .bind(&payment.refund_reason)
        .bind(&payment.cancellation_reason)
        .bind(payment.created_at.naive_utc())
        .bind(payment.verified_at.map(|dt| dt.naive_utc()))
        .bind(payment.updated_at.naive_utc())
        .bind(payment.refunded_at.map(|dt| dt.naive_utc()))
        .execute(&self.pool)
        .await?;

        self.find_by_id(payment.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created payment".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>> {
        self.fetch_one_where("id = ?", id.to_string()).await
    }

    async fn find_by_tracking_number(&self, tracking_number: i64) -> Result<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE tracking_number = ?", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tracking_number)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE user_id = ? ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Self::row_to_payment)
            .collect()
    }

    async fn set_gateway_details(&self, id: Uuid, gateway_name: &str, tracking_number: i64) -> Result<Payment> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET gateway_name = ?,
                tracking_number = ?,
                updated_at = ?
            WHERE id = ? AND status = 'Pending'
            "#
        )
        .bind(gateway_name)
        .bind(tracking_number)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!("Payment {} is no longer pending", id)));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated payment".to_string())
        })
    }

    async fn claim_verification(&self, id: Uuid) -> Result<bool> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET verification_claimed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'Pending'
              AND (verification_claimed_at IS NULL OR verification_claimed_at < ?)
            "#
        )
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .bind(Self::lease_cutoff())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition(&self, id: Uuid, transition: PaymentTransition) -> Result<Option<Payment>> {
        let from = transition.from();
        let to = transition.to();
        if !from.can_transition_to(to) {
            return Err(AppError::Internal(format!("Illegal payment transition {:?} -> {:?}", from, to)));
        }

        let now = Utc::now().naive_utc();
        let from_str = Self::payment_status_to_str(&from);
        let to_str = Self::payment_status_to_str(&to);
        let id_str = id.to_string();

        // The status predicate in each WHERE clause is what makes concurrent
        // callers safe: exactly one of them sees rows_affected == 1.
        let result = match transition {
            PaymentTransition::Complete(verification) => {
                sqlx::query(
                    r#"
                    UPDATE payments
                    SET status = ?,
                        is_paid = 1,
                        transaction_code = ?,
                        gateway_reference = ?,
                        verified_at = ?,
                        updated_at = ?
                    WHERE id = ? AND status = ?
                    "#
                )
                .bind(to_str)
                .bind(&verification.transaction_code)
                .bind(&verification.gateway_reference)
                .bind(verification.verified_at.naive_utc())
                .bind(now)
                .bind(&id_str)
                .bind(from_str)
                .execute(&self.pool)
                .await?
            }
            PaymentTransition::Fail => {
                sqlx::query(
                    "UPDATE payments SET status = ?, is_paid = 0, updated_at = ? WHERE id = ? AND status = ?"
                )
                .bind(to_str)
                .bind(now)
                .bind(&id_str)
                .bind(from_str)
                .execute(&self.pool)
                .await?
            }
            PaymentTransition::Cancel { reason } => {
                sqlx::query(
                    r#"
                    UPDATE payments
                    SET status = ?, is_paid = 0, cancellation_reason = ?, updated_at = ?
                    WHERE id = ? AND status = ?
                      AND (verification_claimed_at IS NULL OR verification_claimed_at < ?)
                    "#
                )
                .bind(to_str)
                .bind(reason)
                .bind(now)
                .bind(&id_str)
                .bind(from_str)
                .bind(Self::lease_cutoff())
                .execute(&self.pool)
                .await?
            }
            PaymentTransition::Refund { reason } => {
                sqlx::query(
                    r#"
                    UPDATE payments
                    SET status = ?, is_paid = 0, refund_reason = ?, refunded_at = ?, updated_at = ?
                    WHERE id = ? AND status = ?
                    "#
                )
                .bind(to_str)
                .bind(reason)
                .bind(now)
                .bind(now)
                .bind(&id_str)
                .bind(from_str)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_by_id(id).await
    }

    async fn list_stale_pending(&self, gym_id: Option<Uuid>, created_before: DateTime<Utc>) -> Result<Vec<Payment>> {
        let sql = format!(
            r#"
            SELECT {} FROM payments
            WHERE status = 'Pending' AND is_online = 1 AND created_at < ?
              AND (verification_claimed_at IS NULL OR verification_claimed_at < ?)
              AND (? IS NULL OR gym_id = ?)
            ORDER BY created_at
            "#,
            PAYMENT_COLUMNS
        );
        let gym = gym_id.map(|id| id.to_string());
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(created_before.naive_utc())
            .bind(Self::lease_cutoff())
            .bind(&gym)
            .bind(&gym)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Self::row_to_payment)
            .collect()
    }

    async fn list_completed_without_grant(&self, gym_id: Option<Uuid>) -> Result<Vec<Payment>> {
        let sql = format!(
            r#"
            SELECT {} FROM payments
            WHERE status = 'Completed'
              AND purchase_type IS NOT NULL
              AND user_id IS NOT NULL
              AND (? IS NULL OR gym_id = ?)
              AND NOT EXISTS (SELECT 1 FROM membership_grants g WHERE g.payment_id = payments.id)
            ORDER BY created_at
            "#,
            PAYMENT_COLUMNS
        );
        let gym = gym_id.map(|id| id.to_string());
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(&gym)
            .bind(&gym)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Self::row_to_payment)
            .collect()
    }
}
