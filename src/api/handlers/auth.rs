use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::{
    api::state::AppState,
    auth::TokenPair,
    error::Result,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 32))]
    pub national_code: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenPair>> {
    req.validate()?;

    let tokens = state.service_context.auth_service
        .login(req.national_code.trim(), &req.password)
        .await?;

    Ok(Json(tokens))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>> {
    req.validate()?;

    let tokens = state.service_context.auth_service
        .refresh(&req.refresh_token)
        .await?;

    Ok(Json(tokens))
}

pub async fn revoke(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<StatusCode> {
    req.validate()?;

    state.service_context.auth_service
        .revoke(&req.refresh_token)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
