use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendance {
    pub id: Uuid,
    pub gym_id: Uuid,
    pub user_id: Uuid,
    pub membership_id: Option<Uuid>,
    pub entered_at: DateTime<Utc>,
    pub note: Option<String>,
}
