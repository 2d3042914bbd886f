use axum::{
    extract::State,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::state::AppState,
    auth::CurrentUser,
    domain::Attendance,
    error::Result,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckInBody {
    pub user_id: Uuid,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

pub async fn check_in(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(body): Json<CheckInBody>,
) -> Result<Json<Attendance>> {
    body.validate()?;

    let attendance = state.service_context.attendance_service
        .check_in(&current_user, body.user_id, body.note)
        .await?;

    Ok(Json(attendance))
}

pub async fn today(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<Attendance>>> {
    let entries = state.service_context.attendance_service
        .today(&current_user)
        .await?;

    Ok(Json(entries))
}
