use async_trait::async_trait;
use chrono::{DateTime, Utc, NaiveDateTime};
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    domain::{CreateGymRequest, Gym},
    error::{AppError, Result},
    repository::{parse_uuid, GymRepository},
};

#[derive(FromRow)]
struct GymRow {
    id: String,
    name: String,
    address: String,
    phone: String,
    is_approved: i32,
    created_at: NaiveDateTime,
}

pub struct SqliteGymRepository {
    pool: SqlitePool,
}

impl SqliteGymRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_gym(row: GymRow) -> Result<Gym> {
        Ok(Gym {
            id: parse_uuid(&row.id)?,
            name: row.name,
            address: row.address,
            phone: row.phone,
            is_approved: row.is_approved != 0,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }
}

#[async_trait]
impl GymRepository for SqliteGymRepository {
    async fn create(&self, request: CreateGymRequest) -> Result<Gym> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO gyms (id, name, address, phone, is_approved, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#
        )
        .bind(id.to_string())
        .bind(&request.name)
        .bind(&request.address)
        .bind(&request.phone)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created gym".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Gym>> {
        let row = sqlx::query_as::<_, GymRow>(
            "SELECT id, name, address, phone, is_approved, created_at FROM gyms WHERE id = ?"
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_gym).transpose()
    }

    async fn approve(&self, id: Uuid) -> Result<Gym> {
        let result = sqlx::query("UPDATE gyms SET is_approved = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Gym {} not found", id)));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Gym {} not found", id))
        })
    }
}
