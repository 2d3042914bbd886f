use axum::{
    extract::{Path, Query, State},
    Extension, Form, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::state::AppState,
    auth::CurrentUser,
    domain::{MembershipPurchase, MembershipType, Payment, PaymentStatus},
    error::{AppError, Result},
    service::{CallbackOutcome, CreatePaymentRequest, CreatedPayment},
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    #[validate(range(min = 1))]
    pub amount: i64,
    #[serde(default)]
    pub is_online: bool,
    pub user_id: Option<Uuid>,
    pub membership_type: Option<MembershipType>,
    #[validate(range(min = 1))]
    pub sessions: Option<i32>,
    #[validate(range(min = 1))]
    pub months: Option<i32>,
    pub membership_id: Option<Uuid>,
}

impl CreatePaymentBody {
    fn purchase(&self) -> Result<Option<MembershipPurchase>> {
        let Some(membership_type) = self.membership_type else {
            if self.membership_id.is_some() {
                return Err(AppError::Validation("membershipId requires membershipType".to_string()));
            }
            return Ok(None);
        };

        let quantity = match membership_type {
            MembershipType::SessionBased => self.sessions.ok_or_else(|| {
                AppError::Validation("sessions is required for a session-based plan".to_string())
            })?,
            MembershipType::Monthly => self.months.unwrap_or(1),
        };

        Ok(Some(MembershipPurchase {
            membership_type,
            quantity,
            membership_id: self.membership_id,
        }))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub payment_id: Uuid,
    pub redirect_url: String,
    pub status: PaymentStatus,
}

impl From<CreatedPayment> for CreatePaymentResponse {
    fn from(created: CreatedPayment) -> Self {
        Self {
            payment_id: created.payment.id,
            redirect_url: created.redirect_url,
            status: created.payment.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub success: bool,
    pub already_processed: bool,
    pub result_url: String,
}

impl From<CallbackOutcome> for CallbackResponse {
    fn from(outcome: CallbackOutcome) -> Self {
        let already_processed = matches!(outcome, CallbackOutcome::AlreadyProcessed(_));
        let success = outcome.succeeded();
        let payment = outcome.payment();

        Self {
            payment_id: payment.id,
            status: payment.status,
            success,
            already_processed,
            result_url: format!("/payments/result?paymentId={}&success={}", payment.id, success),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefundBody {
    pub tracking_number: i64,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelBody {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(body): Json<CreatePaymentBody>,
) -> Result<Json<CreatePaymentResponse>> {
    body.validate()?;

    let request = CreatePaymentRequest {
        gym_id: current_user.require_gym()?,
        user_id: body.user_id,
        amount: body.amount,
        is_online: body.is_online,
        purchase: body.purchase()?,
    };

    let created = state.service_context.payment_service
        .create_payment(&current_user, request)
        .await?;

    Ok(Json(created.into()))
}

/// Gateway redirect target. Parameters may arrive in the query string, in a
/// form body, or both; body values win.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> Result<Json<CallbackResponse>> {
    let fields = merge_fields(query, form);
    let payment_id = fields.get("paymentId").cloned();

    let outcome = state.service_context.payment_service
        .handle_callback(payment_id.as_deref(), fields)
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn callback_with_id(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> Result<Json<CallbackResponse>> {
    let fields = merge_fields(query, form);

    let outcome = state.service_context.payment_service
        .handle_callback(Some(&payment_id), fields)
        .await?;

    Ok(Json(outcome.into()))
}

fn merge_fields(
    mut query: HashMap<String, String>,
    form: Option<Form<HashMap<String, String>>>,
) -> HashMap<String, String> {
    if let Some(Form(body)) = form {
        query.extend(body);
    }
    query
}

pub async fn refund(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(body): Json<RefundBody>,
) -> Result<Json<serde_json::Value>> {
    body.validate()?;

    let refunded = state.service_context.payment_service
        .refund(&current_user, body.tracking_number, body.reason.trim())
        .await?;

    Ok(Json(serde_json::json!({ "refunded": refunded })))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<Payment>> {
    let reason = match body {
        Some(Json(body)) => {
            body.validate()?;
            body.reason
        }
        None => None,
    };
    let reason = reason.unwrap_or_else(|| "Cancelled by user".to_string());

    let payment = state.service_context.payment_service
        .cancel_payment(&current_user, id, &reason)
        .await?;

    Ok(Json(payment))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>> {
    let payment = state.service_context.payment_service
        .get_payment(&current_user, id)
        .await?;

    Ok(Json(payment))
}

pub async fn my_payments(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<Payment>>> {
    let payments = state.service_context.payment_service
        .list_user_payments(current_user.user_id)
        .await?;

    Ok(Json(payments))
}
