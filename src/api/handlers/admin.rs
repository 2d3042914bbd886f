use axum::{
    extract::State,
    Extension, Json,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::state::AppState,
    auth::CurrentUser,
    domain::Role,
    error::{AppError, Result},
};

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExpireStaleBody {
    #[validate(range(min = 1))]
    pub older_than_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SweepResult {
    pub affected: u64,
}

/// Super admins sweep every gym; gym admins only their own.
fn sweep_scope(current_user: &CurrentUser) -> Result<Option<Uuid>> {
    match current_user.role {
        Role::SuperAdmin => Ok(current_user.gym_id),
        Role::GymAdmin => Ok(Some(current_user.require_gym()?)),
        _ => Err(AppError::Forbidden),
    }
}

pub async fn expire_stale(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    body: Option<Json<ExpireStaleBody>>,
) -> Result<Json<SweepResult>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    body.validate()?;

    let minutes = body
        .older_than_minutes
        .unwrap_or(state.settings.gateway.stale_pending_minutes);

    let affected = state.service_context.payment_service
        .expire_stale(sweep_scope(&current_user)?, Duration::minutes(minutes))
        .await?;

    Ok(Json(SweepResult { affected }))
}

pub async fn reconcile(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<SweepResult>> {
    let affected = state.service_context.payment_service
        .reconcile_grants(sweep_scope(&current_user)?)
        .await?;

    Ok(Json(SweepResult { affected }))
}
