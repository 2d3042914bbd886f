use chrono::{DateTime, Utc, NaiveDateTime};
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    error::Result,
    repository::parse_uuid,
};

#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct RefreshTokenRow {
    id: String,
    user_id: String,
    expires_at: NaiveDateTime,
    created_at: NaiveDateTime,
}

/// Refresh tokens are opaque random strings. Only their sha256 digest is
/// stored, so a leaked table cannot be replayed.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, is_revoked, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(hash_token(token))
        .bind(expires_at.naive_utc())
        .bind(now.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(RefreshToken {
            id,
            user_id,
            expires_at,
            created_at: now,
        })
    }

    pub async fn find_active(&self, token: &str) -> Result<Option<RefreshToken>> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT id, user_id, expires_at, created_at
            FROM refresh_tokens
            WHERE token_hash = ? AND is_revoked = 0 AND expires_at > ?
            "#
        )
        .bind(hash_token(token))
        .bind(Utc::now().naive_utc())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(RefreshToken {
                id: parse_uuid(&r.id)?,
                user_id: parse_uuid(&r.user_id)?,
                expires_at: DateTime::from_naive_utc_and_offset(r.expires_at, Utc),
                created_at: DateTime::from_naive_utc_and_offset(r.created_at, Utc),
            })),
            None => Ok(None),
        }
    }

    /// Revokes a live token and hands back its owner. Two concurrent refreshes
    /// with the same token cannot both succeed.
    pub async fn consume(&self, token: &str) -> Result<Option<Uuid>> {
        let Some(found) = self.find_active(token).await? else {
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = 1 WHERE id = ? AND is_revoked = 0"
        )
        .bind(found.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(found.user_id))
    }

    pub async fn revoke(&self, token: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = 1 WHERE token_hash = ? AND is_revoked = 0"
        )
        .bind(hash_token(token))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ? OR is_revoked = 1")
            .bind(Utc::now().naive_utc())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn hash_token(token: &str) -> String {
    use sha2::{Sha256, Digest};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
