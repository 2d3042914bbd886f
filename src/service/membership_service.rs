use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    domain::*,
    error::{AppError, Result},
    repository::{MembershipRepository, UserRepository},
    service::payment_service::{CreatePaymentRequest, CreatedPayment, PaymentService},
};

/// Turns confirmed payments into membership time or sessions.
pub struct MembershipActivator {
    repo: Arc<dyn MembershipRepository>,
}

impl MembershipActivator {
    pub fn new(repo: Arc<dyn MembershipRepository>) -> Self {
        Self { repo }
    }

    /// Applies the purchase carried by a completed payment. Returns the grant
    /// when this call did the work, `None` when there is nothing to apply or
    /// the payment was already granted.
    pub async fn activate(&self, payment: &Payment) -> Result<Option<MembershipGrant>> {
        if payment.status != PaymentStatus::Completed {
            return Err(AppError::Internal(format!(
                "Refusing to activate payment {} in status {:?}",
                payment.id, payment.status
            )));
        }

        let (Some(purchase), Some(user_id)) = (payment.purchase.as_ref(), payment.user_id) else {
            return Ok(None);
        };

        match self.repo.apply_grant(payment.id, payment.gym_id, user_id, purchase).await? {
            Some((membership, grant)) => {
                tracing::info!(
                    "Payment {} granted {} x {:?} to membership {}",
                    payment.id,
                    grant.quantity,
                    grant.membership_type,
                    membership.id
                );
                Ok(Some(grant))
            }
            None => {
                tracing::debug!("Payment {} was already granted", payment.id);
                Ok(None)
            }
        }
    }

    /// Checks a purchase up front so a payment is never taken for a plan
    /// that cannot be applied.
    pub async fn check_purchase(&self, gym_id: Uuid, user_id: Uuid, purchase: &MembershipPurchase) -> Result<()> {
        if purchase.quantity <= 0 {
            return Err(AppError::Validation("Purchase quantity must be positive".to_string()));
        }

        let Some(membership_id) = purchase.membership_id else {
            return Ok(());
        };

        let membership = self
            .repo
            .find_by_id(membership_id)
            .await?
            .filter(|m| m.gym_id == gym_id)
            .ok_or_else(|| AppError::NotFound(format!("Membership {} not found", membership_id)))?;

        if membership.user_id != user_id {
            return Err(AppError::BadRequest("Membership does not belong to this user".to_string()));
        }
        if membership.membership_type != purchase.membership_type {
            return Err(AppError::BadRequest("Purchase type does not match the membership".to_string()));
        }

        Ok(())
    }

    /// Uses one session of a session-based plan. Zero stays zero.
    pub async fn deduct_session(&self, membership_id: Uuid, gym_id: Uuid) -> Result<Membership> {
        let membership = self
            .repo
            .find_by_id(membership_id)
            .await?
            .filter(|m| m.gym_id == gym_id)
            .ok_or_else(|| AppError::NotFound("Membership not found".to_string()))?;

        if membership.membership_type != MembershipType::SessionBased {
            return Err(AppError::Validation(
                "Only session-based memberships have sessions to deduct".to_string(),
            ));
        }

        self.repo
            .deduct_session(membership_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Membership not found".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct NewMembership {
    pub user_id: Uuid,
    pub membership_type: MembershipType,
    pub quantity: i32,
    pub amount: i64,
    pub is_online: bool,
}

#[derive(Debug, Clone)]
pub struct Renewal {
    pub quantity: i32,
    pub amount: i64,
    pub is_online: bool,
}

pub struct MembershipService {
    repo: Arc<dyn MembershipRepository>,
    users: Arc<dyn UserRepository>,
    activator: Arc<MembershipActivator>,
    payments: Arc<PaymentService>,
}

impl MembershipService {
    pub fn new(
        repo: Arc<dyn MembershipRepository>,
        users: Arc<dyn UserRepository>,
        activator: Arc<MembershipActivator>,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self { repo, users, activator, payments }
    }

    /// Sells a plan to a user of the admin's gym. Offline sales are active
    /// immediately; online ones wait for the gateway callback.
    pub async fn create_membership(&self, actor: &CurrentUser, request: NewMembership) -> Result<CreatedPayment> {
        let gym_id = actor.require_gym()?;
        if !actor.can_manage(gym_id) {
            return Err(AppError::Forbidden);
        }

        let user = self
            .users
            .find_by_id(request.user_id)
            .await?
            .filter(|u| u.gym_id == Some(gym_id))
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let purchase = MembershipPurchase {
            membership_type: request.membership_type,
            quantity: request.quantity,
            membership_id: None,
        };

        self.payments
            .create_payment(actor, CreatePaymentRequest {
                gym_id,
                user_id: Some(user.id),
                amount: request.amount,
                is_online: request.is_online,
                purchase: Some(purchase),
            })
            .await
    }

    /// Extends an existing plan. The payment is pinned to the membership.
    pub async fn renew_membership(&self, actor: &CurrentUser, membership_id: Uuid, request: Renewal) -> Result<CreatedPayment> {
        let gym_id = actor.require_gym()?;
        if !actor.can_manage(gym_id) {
            return Err(AppError::Forbidden);
        }

        let membership = self
            .repo
            .find_by_id(membership_id)
            .await?
            .filter(|m| m.gym_id == gym_id)
            .ok_or_else(|| AppError::NotFound("Membership not found".to_string()))?;

        let purchase = MembershipPurchase {
            membership_type: membership.membership_type,
            quantity: request.quantity,
            membership_id: Some(membership.id),
        };

        self.payments
            .create_payment(actor, CreatePaymentRequest {
                gym_id,
                user_id: Some(membership.user_id),
                amount: request.amount,
                is_online: request.is_online,
                purchase: Some(purchase),
            })
            .await
    }

    pub async fn deduct_session(&self, actor: &CurrentUser, membership_id: Uuid) -> Result<Membership> {
        let gym_id = actor.require_gym()?;
        if !actor.can_manage(gym_id) {
            return Err(AppError::Forbidden);
        }

        let membership = self.activator.deduct_session(membership_id, gym_id).await?;
        tracing::info!(
            "Deducted a session from membership {} ({} left)",
            membership.id,
            membership.remaining_sessions
        );
        Ok(membership)
    }

    pub async fn my_memberships(&self, user_id: Uuid) -> Result<Vec<Membership>> {
        self.repo.find_by_user(user_id).await
    }

    /// The newest active membership of the user that allows entry now.
    pub async fn entry_membership(&self, gym_id: Uuid, user_id: Uuid) -> Result<Option<Membership>> {
        let now = chrono::Utc::now();

        if let Some(latest) = self.repo.find_active(gym_id, user_id, None).await? {
            if latest.permits_entry(now) {
                return Ok(Some(latest));
            }
        }

        Ok(self
            .repo
            .find_by_user(user_id)
            .await?
            .into_iter()
            .find(|m| m.gym_id == gym_id && m.permits_entry(now)))
    }
}
