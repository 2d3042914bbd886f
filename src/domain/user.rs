use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// `None` only for super admins, who do not belong to a gym.
    pub gym_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    /// Login name.
    pub national_code: String,
    pub phone: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
    GymAdmin,
    Trainer,
    Athlete,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SuperAdmin",
            Role::GymAdmin => "GymAdmin",
            Role::Trainer => "Trainer",
            Role::Athlete => "Athlete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SuperAdmin" => Some(Role::SuperAdmin),
            "GymAdmin" => Some(Role::GymAdmin),
            "Trainer" => Some(Role::Trainer),
            "Athlete" => Some(Role::Athlete),
            _ => None,
        }
    }

    /// Gym admins manage their own gym; super admins may do anything a gym admin can.
    pub fn can_manage_gym(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::GymAdmin)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub gym_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub national_code: String,
    pub phone: String,
    pub password: String,
    pub role: Role,
}
