use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::{handlers::payments::CreatePaymentResponse, state::AppState},
    auth::CurrentUser,
    domain::{Membership, MembershipType},
    error::Result,
    service::membership_service::{NewMembership, Renewal},
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateMembershipBody {
    pub user_id: Uuid,
    pub membership_type: MembershipType,
    /// Sessions or months, depending on the type.
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[serde(default)]
    pub is_online: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenewMembershipBody {
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[serde(default)]
    pub is_online: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(body): Json<CreateMembershipBody>,
) -> Result<Json<CreatePaymentResponse>> {
    body.validate()?;

    let created = state.service_context.membership_service
        .create_membership(&current_user, NewMembership {
            user_id: body.user_id,
            membership_type: body.membership_type,
            quantity: body.quantity,
            amount: body.amount,
            is_online: body.is_online,
        })
        .await?;

    Ok(Json(created.into()))
}

pub async fn renew(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<RenewMembershipBody>,
) -> Result<Json<CreatePaymentResponse>> {
    body.validate()?;

    let created = state.service_context.membership_service
        .renew_membership(&current_user, id, Renewal {
            quantity: body.quantity,
            amount: body.amount,
            is_online: body.is_online,
        })
        .await?;

    Ok(Json(created.into()))
}

pub async fn deduct_session(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Membership>> {
    let membership = state.service_context.membership_service
        .deduct_session(&current_user, id)
        .await?;

    Ok(Json(membership))
}

pub async fn my_memberships(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<Membership>>> {
    let memberships = state.service_context.membership_service
        .my_memberships(current_user.user_id)
        .await?;

    Ok(Json(memberships))
}
