use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    domain::*,
    error::{AppError, Result},
    gateway::{CallbackParams, FetchedInvoice, InvoiceRequest, InvoiceStatus, PaymentGateway},
    repository::{PaymentRepository, PaymentTransition, UserRepository},
    service::membership_service::MembershipActivator,
};

pub const ABANDONED_REASON: &str = "abandoned";

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub gym_id: Uuid,
    /// Defaults to the caller.
    pub user_id: Option<Uuid>,
    pub amount: i64,
    pub is_online: bool,
    pub purchase: Option<MembershipPurchase>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPayment {
    pub payment: Payment,
    /// Gateway payment page for online payments, local result page otherwise.
    pub redirect_url: String,
}

#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// This callback verified the payment and activated its purchase.
    Completed(Payment),
    /// The gateway did not confirm the payment.
    Failed(Payment),
    /// The payment had already left Pending. Nothing was done.
    AlreadyProcessed(Payment),
}

impl CallbackOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            CallbackOutcome::Completed(p)
            | CallbackOutcome::Failed(p)
            | CallbackOutcome::AlreadyProcessed(p) => p,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.payment().status == PaymentStatus::Completed
    }
}

/// Drives a payment from creation through the gateway round trip to
/// membership activation, refund or cancellation.
///
/// A callback first claims the payment with
/// [`PaymentRepository::claim_verification`]; only the claimant calls the
/// gateway. Every status change then goes through
/// [`PaymentRepository::transition`], a compare-and-swap on the stored status,
/// and whoever wins the Pending -> Completed swap is the only caller that
/// activates the purchase.
pub struct PaymentService {
    repo: Arc<dyn PaymentRepository>,
    users: Arc<dyn UserRepository>,
    activator: Arc<MembershipActivator>,
    gateway: Arc<dyn PaymentGateway>,
    base_url: String,
    gateway_name: String,
}

impl PaymentService {
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        users: Arc<dyn UserRepository>,
        activator: Arc<MembershipActivator>,
        gateway: Arc<dyn PaymentGateway>,
        base_url: impl Into<String>,
        gateway_name: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            users,
            activator,
            gateway,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            gateway_name: gateway_name.into(),
        }
    }

    pub fn callback_url(&self, payment_id: Uuid) -> String {
        format!("{}/api/payments/callback?paymentId={}", self.base_url, payment_id)
    }

    pub async fn create_payment(&self, actor: &CurrentUser, request: CreatePaymentRequest) -> Result<CreatedPayment> {
        if request.amount <= 0 {
            return Err(AppError::Validation("Amount must be greater than zero".to_string()));
        }

        let user_id = request.user_id.unwrap_or(actor.user_id);
        if user_id != actor.user_id && !actor.can_manage(request.gym_id) {
            return Err(AppError::Forbidden);
        }
        if !request.is_online && !actor.can_manage(request.gym_id) {
            return Err(AppError::Forbidden);
        }

        self.users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.gym_id == Some(request.gym_id))
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if let Some(purchase) = &request.purchase {
            self.activator.check_purchase(request.gym_id, user_id, purchase).await?;
        }

        let payment = Payment::new(
            request.gym_id,
            Some(user_id),
            request.amount,
            request.is_online,
            request.purchase,
        );

        if payment.is_online {
            self.start_online(payment).await
        } else {
            self.record_offline(payment).await
        }
    }

    async fn record_offline(&self, payment: Payment) -> Result<CreatedPayment> {
        let payment = self.repo.create(payment).await?;
        tracing::info!("Offline payment {} recorded for gym {}", payment.id, payment.gym_id);

        self.activator.activate(&payment).await?;

        Ok(CreatedPayment {
            redirect_url: format!("/payments/result?paymentId={}&success=true", payment.id),
            payment,
        })
    }

    async fn start_online(&self, payment: Payment) -> Result<CreatedPayment> {
        let payment = self.repo.create(payment).await?;

        let invoice = InvoiceRequest {
            amount: payment.amount,
            callback_url: self.callback_url(payment.id),
            gateway_name: self.gateway_name.clone(),
        };

        let outcome = match self.gateway.request_invoice(invoice).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Invoice request failed for payment {}: {}", payment.id, e);
                self.mark_failed(payment.id).await?;
                return Err(e);
            }
        };

        let (true, Some(tracking_number), Some(gateway_url)) =
            (outcome.succeeded, outcome.tracking_number, outcome.gateway_url)
        else {
            let message = outcome
                .message
                .unwrap_or_else(|| "Gateway rejected the invoice".to_string());
            tracing::warn!("Gateway rejected invoice for payment {}: {}", payment.id, message);
            self.mark_failed(payment.id).await?;
            return Err(AppError::External(message));
        };

        let payment = self
            .repo
            .set_gateway_details(payment.id, &self.gateway_name, tracking_number)
            .await?;

        tracing::info!(
            "Payment {} awaiting gateway, tracking number {}",
            payment.id,
            tracking_number
        );

        Ok(CreatedPayment {
            payment,
            redirect_url: gateway_url,
        })
    }

    /// Processes the gateway's redirect back to us. Replays of an already
    /// settled payment, and callbacks that arrive while another one is still
    /// verifying, are answered from the stored record without touching the
    /// gateway.
    pub async fn handle_callback(&self, payment_id: Option<&str>, fields: HashMap<String, String>) -> Result<CallbackOutcome> {
        let payment_id = payment_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Validation("Missing paymentId".to_string()))?;
        let payment_id = Uuid::parse_str(payment_id.trim())
            .map_err(|_| AppError::Validation(format!("Invalid paymentId: {}", payment_id)))?;

        let payment = self
            .repo
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;

        if !payment.status.is_pending() {
            tracing::debug!("Callback replay for payment {} in {:?}", payment.id, payment.status);
            return Ok(CallbackOutcome::AlreadyProcessed(payment));
        }

        // Only the claimant talks to the gateway. Everyone else would race it
        // into a bogus Failed once the one-shot verify has been used up.
        if !self.repo.claim_verification(payment.id).await? {
            tracing::debug!("Payment {} is being verified by another callback", payment.id);
            return self.already_processed(payment.id).await;
        }

        let Some(tracking_number) = payment.tracking_number else {
            tracing::warn!("Callback for payment {} that never received an invoice", payment.id);
            return self.fail(payment.id).await;
        };

        if let Some(reported) = fields.get("trackingNumber") {
            if reported.trim().parse::<i64>().ok() != Some(tracking_number) {
                tracing::warn!(
                    "Callback for payment {} reported tracking number {}, expected {}",
                    payment.id,
                    reported,
                    tracking_number
                );
                return self.fail(payment.id).await;
            }
        }

        let params = CallbackParams { tracking_number, fields };
        let invoice = match self.gateway.fetch_invoice(&params).await {
            Ok(invoice) => invoice,
            Err(e) => {
                tracing::error!("Fetching invoice {} failed: {}", tracking_number, e);
                self.mark_failed(payment.id).await?;
                return Err(e);
            }
        };

        if invoice.tracking_number != tracking_number || invoice.amount != payment.amount {
            tracing::warn!(
                "Invoice {} does not match payment {}: gateway reports #{} for {}, expected {}",
                tracking_number,
                payment.id,
                invoice.tracking_number,
                invoice.amount,
                payment.amount
            );
            return self.fail(payment.id).await;
        }

        if invoice.status != InvoiceStatus::ReadyForVerifying {
            tracing::info!(
                "Invoice {} not ready for verification ({:?})",
                tracking_number,
                invoice.status
            );
            return self.fail(payment.id).await;
        }

        let verified = match self.gateway.verify(&invoice).await {
            Ok(verified) => verified,
            Err(e) => {
                tracing::error!("Verifying invoice {} failed: {}", tracking_number, e);
                self.mark_failed(payment.id).await?;
                return Err(e);
            }
        };

        if !verified.succeeded {
            tracing::info!(
                "Gateway declined verification of invoice {}: {}",
                tracking_number,
                verified.message.as_deref().unwrap_or("no message")
            );
            return self.fail(payment.id).await;
        }

        let verification = PaymentVerification {
            transaction_code: verified.transaction_code,
            gateway_reference: verified.reference_number,
            verified_at: Utc::now(),
        };

        let Some(completed) = self
            .repo
            .transition(payment.id, PaymentTransition::Complete(verification))
            .await?
        else {
            return self.already_processed(payment.id).await;
        };

        tracing::info!("Payment {} completed", completed.id);

        // The payment is settled either way; an unapplied grant is picked up
        // by reconcile_grants.
        if let Err(e) = self.activator.activate(&completed).await {
            tracing::error!("Activation failed for completed payment {}: {}", completed.id, e);
        }

        Ok(CallbackOutcome::Completed(completed))
    }

    /// Full refund of a completed online payment.
    pub async fn refund(&self, actor: &CurrentUser, tracking_number: i64, reason: &str) -> Result<bool> {
        let payment = self
            .repo
            .find_by_tracking_number(tracking_number)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No payment with tracking number {}", tracking_number)))?;

        if !actor.can_manage(payment.gym_id) {
            return Err(AppError::Forbidden);
        }

        if payment.status != PaymentStatus::Completed {
            return Err(AppError::Conflict(format!(
                "Payment {} is {:?} and cannot be refunded",
                payment.id, payment.status
            )));
        }

        let outcome = self.gateway.refund_full(tracking_number).await?;
        if !outcome.succeeded {
            tracing::warn!(
                "Gateway refused refund of {}: {}",
                tracking_number,
                outcome.message.as_deref().unwrap_or("no message")
            );
            return Ok(false);
        }

        let transition = PaymentTransition::Refund { reason: reason.to_string() };
        match self.repo.transition(payment.id, transition).await? {
            Some(refunded) => {
                tracing::info!("Payment {} refunded: {}", refunded.id, reason);
                Ok(true)
            }
            None => Err(AppError::Conflict(format!(
                "Payment {} changed while being refunded",
                payment.id
            ))),
        }
    }

    /// Cancels a payment that is still waiting for the gateway.
    pub async fn cancel_payment(&self, actor: &CurrentUser, payment_id: Uuid, reason: &str) -> Result<Payment> {
        let payment = self.get_payment(actor, payment_id).await?;

        if !payment.status.is_pending() {
            return Err(AppError::Conflict(format!(
                "Payment {} is {:?} and cannot be cancelled",
                payment.id, payment.status
            )));
        }

        let cancelled = self
            .repo
            .transition(payment.id, PaymentTransition::Cancel { reason: reason.to_string() })
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("Payment {} is being verified or no longer pending", payment.id))
            })?;

        tracing::info!("Payment {} cancelled: {}", cancelled.id, reason);
        self.cancel_at_gateway(&cancelled, reason).await;

        Ok(cancelled)
    }

    /// Cancels online payments that have been pending longer than `older_than`.
    pub async fn expire_stale(&self, gym_id: Option<Uuid>, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let stale = self.repo.list_stale_pending(gym_id, cutoff).await?;

        let mut expired = 0;
        for payment in stale {
            let transition = PaymentTransition::Cancel { reason: ABANDONED_REASON.to_string() };
            if let Some(cancelled) = self.repo.transition(payment.id, transition).await? {
                self.cancel_at_gateway(&cancelled, ABANDONED_REASON).await;
                expired += 1;
            }
        }

        if expired > 0 {
            tracing::info!("Expired {} abandoned payments", expired);
        }

        Ok(expired)
    }

    /// Applies grants for completed payments whose activation never ran.
    pub async fn reconcile_grants(&self, gym_id: Option<Uuid>) -> Result<u64> {
        let missing = self.repo.list_completed_without_grant(gym_id).await?;

        let mut applied = 0;
        for payment in missing {
            if self.activator.activate(&payment).await?.is_some() {
                applied += 1;
            }
        }

        if applied > 0 {
            tracing::warn!("Reconciled {} payments missing a membership grant", applied);
        }

        Ok(applied)
    }

    /// Owners see their own payments; gym admins see their gym's.
    pub async fn get_payment(&self, actor: &CurrentUser, payment_id: Uuid) -> Result<Payment> {
        let payment = self
            .repo
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;

        if payment.user_id != Some(actor.user_id) && !actor.can_manage(payment.gym_id) {
            return Err(AppError::NotFound(format!("Payment {} not found", payment_id)));
        }

        Ok(payment)
    }

    pub async fn list_user_payments(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        self.repo.find_by_user(user_id).await
    }

    async fn fail(&self, payment_id: Uuid) -> Result<CallbackOutcome> {
        match self.repo.transition(payment_id, PaymentTransition::Fail).await? {
            Some(failed) => Ok(CallbackOutcome::Failed(failed)),
            None => self.already_processed(payment_id).await,
        }
    }

    async fn already_processed(&self, payment_id: Uuid) -> Result<CallbackOutcome> {
        let current = self
            .repo
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;
        tracing::debug!("Payment {} was settled concurrently ({:?})", current.id, current.status);
        Ok(CallbackOutcome::AlreadyProcessed(current))
    }

    async fn mark_failed(&self, payment_id: Uuid) -> Result<()> {
        if self.repo.transition(payment_id, PaymentTransition::Fail).await?.is_some() {
            tracing::info!("Payment {} marked failed", payment_id);
        }
        Ok(())
    }

    async fn cancel_at_gateway(&self, payment: &Payment, reason: &str) {
        let Some(tracking_number) = payment.tracking_number else {
            return;
        };

        let invoice = FetchedInvoice {
            tracking_number,
            amount: payment.amount,
            gateway_name: payment.gateway_name.clone().unwrap_or_else(|| self.gateway_name.clone()),
            status: InvoiceStatus::Failed,
            message: None,
        };

        match self.gateway.cancel(&invoice, reason).await {
            Ok(outcome) if outcome.succeeded => {}
            Ok(outcome) => tracing::debug!(
                "Gateway did not cancel invoice {}: {}",
                tracking_number,
                outcome.message.as_deref().unwrap_or("no message")
            ),
            Err(e) => tracing::warn!("Gateway cancel for invoice {} failed: {}", tracking_number, e),
        }
    }
}
