//! Stand-in payment pages for the in-process gateway.

use axum::{
    extract::{Path, State},
    response::Redirect,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    api::state::AppState,
    error::{AppError, Result},
    gateway::VirtualGateway,
};

fn gateway(state: &AppState) -> Result<Arc<VirtualGateway>> {
    state
        .virtual_gateway
        .clone()
        .ok_or_else(|| AppError::NotFound("Virtual gateway is not enabled".to_string()))
}

pub async fn show(
    State(state): State<AppState>,
    Path(tracking_number): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    gateway(&state)?;

    Ok(Json(json!({
        "trackingNumber": tracking_number,
        "pay": format!("/virtual-gateway/{}/pay", tracking_number),
        "decline": format!("/virtual-gateway/{}/decline", tracking_number),
    })))
}

pub async fn pay(
    State(state): State<AppState>,
    Path(tracking_number): Path<i64>,
) -> Result<Redirect> {
    let callback = gateway(&state)?.pay(tracking_number).await?;
    Ok(Redirect::to(&callback))
}

pub async fn decline(
    State(state): State<AppState>,
    Path(tracking_number): Path<i64>,
) -> Result<Redirect> {
    let callback = gateway(&state)?.decline(tracking_number).await?;
    Ok(Redirect::to(&callback))
}
