use async_trait::async_trait;
use chrono::{DateTime, Utc, NaiveDateTime};
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    domain::Attendance,
    error::Result,
    repository::{parse_uuid, AttendanceRepository},
};

#[derive(FromRow)]
struct AttendanceRow {
    id: String,
    gym_id: String,
    user_id: String,
    membership_id: Option<String>,
    entered_at: NaiveDateTime,
    note: Option<String>,
}

pub struct SqliteAttendanceRepository {
    pool: SqlitePool,
}

impl SqliteAttendanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_attendance(row: AttendanceRow) -> Result<Attendance> {
        Ok(Attendance {
            id: parse_uuid(&row.id)?,
            gym_id: parse_uuid(&row.gym_id)?,
            user_id: parse_uuid(&row.user_id)?,
            membership_id: row.membership_id.as_deref().map(parse_uuid).transpose()?,
            entered_at: DateTime::from_naive_utc_and_offset(row.entered_at, Utc),
            note: row.note,
        })
    }
}

#[async_trait]
impl AttendanceRepository for SqliteAttendanceRepository {
    async fn record_entry(&self, attendance: Attendance, spend_session: bool) -> Result<Option<Attendance>> {
        let mut tx = self.pool.begin().await?;

        if spend_session {
            let membership_id = attendance.membership_id.map(|m| m.to_string());
            let spent = sqlx::query(
                r#"
                UPDATE memberships
                SET remaining_sessions = remaining_sessions - 1, updated_at = ?
                WHERE id = ? AND membership_type = 'SessionBased' AND remaining_sessions > 0
                "#
            )
            .bind(attendance.entered_at.naive_utc())
            .bind(membership_id)
            .execute(&mut *tx)
            .await?;

            if spent.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(None);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO attendances (id, gym_id, user_id, membership_id, entered_at, note)
            VALUES (?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(attendance.id.to_string())
        .bind(attendance.gym_id.to_string())
        .bind(attendance.user_id.to_string())
        .bind(attendance.membership_id.map(|m| m.to_string()))
        .bind(attendance.entered_at.naive_utc())
        .bind(&attendance.note)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(attendance))
    }

    async fn list_since(&self, gym_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Attendance>> {
        let rows = sqlx::query_as::<_, AttendanceRow>(
            r#"
            SELECT id, gym_id, user_id, membership_id, entered_at, note
            FROM attendances
            WHERE gym_id = ? AND entered_at >= ?
            ORDER BY entered_at DESC
            "#
        )
        .bind(gym_id.to_string())
        .bind(since.naive_utc())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(Self::row_to_attendance)
            .collect()
    }
}
