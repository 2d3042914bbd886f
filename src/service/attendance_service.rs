use chrono::{Utc, NaiveTime};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    domain::*,
    error::{AppError, Result},
    repository::{AttendanceRepository, UserRepository},
    service::membership_service::MembershipService,
};

pub struct AttendanceService {
    repo: Arc<dyn AttendanceRepository>,
    users: Arc<dyn UserRepository>,
    memberships: Arc<MembershipService>,
}

impl AttendanceService {
    pub fn new(
        repo: Arc<dyn AttendanceRepository>,
        users: Arc<dyn UserRepository>,
        memberships: Arc<MembershipService>,
    ) -> Self {
        Self { repo, users, memberships }
    }

    /// Records an entry. The athlete needs a membership that permits entry;
    /// a session-based one pays for the visit with a session.
    pub async fn check_in(&self, actor: &CurrentUser, user_id: Uuid, note: Option<String>) -> Result<Attendance> {
        let gym_id = actor.require_gym()?;
        if !actor.can_manage(gym_id) {
            return Err(AppError::Forbidden);
        }

        self.users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.gym_id == Some(gym_id) && u.is_active)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let membership = self
            .memberships
            .entry_membership(gym_id, user_id)
            .await?
            .ok_or_else(|| AppError::BadRequest("No membership permits entry".to_string()))?;

        let entry = Attendance {
            id: Uuid::new_v4(),
            gym_id,
            user_id,
            membership_id: Some(membership.id),
            entered_at: Utc::now(),
            note,
        };

        // The session check above can go stale; record_entry re-checks it
        // atomically with the insert.
        let spend_session = membership.membership_type == MembershipType::SessionBased;
        let attendance = self
            .repo
            .record_entry(entry, spend_session)
            .await?
            .ok_or_else(|| AppError::BadRequest("No sessions left on this membership".to_string()))?;

        tracing::info!("User {} checked in at gym {}", user_id, gym_id);
        Ok(attendance)
    }

    pub async fn today(&self, actor: &CurrentUser) -> Result<Vec<Attendance>> {
        let gym_id = actor.require_gym()?;
        if !actor.can_manage(gym_id) {
            return Err(AppError::Forbidden);
        }

        let midnight = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        self.repo.list_since(gym_id, midnight).await
    }
}
