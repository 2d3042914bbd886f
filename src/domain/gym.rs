use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant. Almost every query in the service is scoped by a gym id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gym {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGymRequest {
    pub name: String,
    pub address: String,
    pub phone: String,
}
