use async_trait::async_trait;
use chrono::{DateTime, Utc, NaiveDateTime};
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    auth::AuthService,
    domain::{CreateUserRequest, Role, User},
    error::{AppError, Result},
    repository::{parse_uuid, UserRepository},
};

const USER_COLUMNS: &str = r#"
    id, gym_id, first_name, last_name, national_code, phone,
    password_hash, role, is_active, created_at
"#;

#[derive(FromRow)]
struct UserRow {
    id: String,
    gym_id: Option<String>,
    first_name: String,
    last_name: String,
    national_code: String,
    phone: String,
    password_hash: String,
    role: String,
    is_active: i32,
    created_at: NaiveDateTime,
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: UserRow) -> Result<(User, String)> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| AppError::Database(format!("Invalid role: {}", row.role)))?;

        let user = User {
            id: parse_uuid(&row.id)?,
            gym_id: row.gym_id.as_deref().map(parse_uuid).transpose()?,
            first_name: row.first_name,
            last_name: row.last_name,
            national_code: row.national_code,
            phone: row.phone,
            role,
            is_active: row.is_active != 0,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        };

        Ok((user, row.password_hash))
    }

    async fn fetch_where(&self, column: &str, value: String) -> Result<Option<(User, String)>> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_user).transpose()
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, request: CreateUserRequest) -> Result<User> {
        if request.role != Role::SuperAdmin && request.gym_id.is_none() {
            return Err(AppError::BadRequest(
                "Only super admins may exist without a gym".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        let password_hash = AuthService::hash_password(&request.password)?;

        let result = sqlx::query(
            r#"
            INSERT INTO users (
                id, gym_id, first_name, last_name, national_code, phone,
                password_hash, role, is_active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#
        )
        .bind(id.to_string())
        .bind(request.gym_id.map(|g| g.to_string()))
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.national_code)
        .bind(&request.phone)
        .bind(&password_hash)
        .bind(request.role.as_str())
        .bind(now)
        .execute(&self.pool)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &result {
            if db_err.is_unique_violation() {
                return Err(AppError::Conflict(format!(
                    "A user with national code {} already exists",
                    request.national_code
                )));
            }
        }
        result?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created user".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.fetch_where("id", id.to_string()).await?.map(|(user, _)| user))
    }

    async fn find_by_national_code(&self, national_code: &str) -> Result<Option<User>> {
        Ok(self
            .fetch_where("national_code", national_code.to_string())
            .await?
            .map(|(user, _)| user))
    }

    async fn find_credentials(&self, national_code: &str) -> Result<Option<(User, String)>> {
        self.fetch_where("national_code", national_code.to_string()).await
    }
}
