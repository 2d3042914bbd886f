use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MembershipPurchase;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub gym_id: Uuid,
    pub user_id: Option<Uuid>,
    /// Minor currency units.
    pub amount: i64,
    pub is_online: bool,
    pub is_paid: bool,
    pub status: PaymentStatus,
    pub gateway_name: Option<String>,
    pub tracking_number: Option<i64>,
    pub gateway_reference: Option<String>,
    pub transaction_code: Option<String>,
    /// What the payment buys. Payments without a purchase never touch a membership.
    pub purchase: Option<MembershipPurchase>,
    pub refund_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    /// Legal moves: `Pending -> {Completed, Failed, Cancelled}` and
    /// `Completed -> Refunded`. Nothing else, including self-transitions.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Pending, PaymentStatus::Cancelled)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PaymentStatus::Pending)
    }
}

impl Payment {
    /// A fresh record in its initial state. Offline payments are settled at the
    /// desk, so they start out completed and paid.
    pub fn new(
        gym_id: Uuid,
        user_id: Option<Uuid>,
        amount: i64,
        is_online: bool,
        purchase: Option<MembershipPurchase>,
    ) -> Self {
        let now = Utc::now();
        let (status, is_paid) = if is_online {
            (PaymentStatus::Pending, false)
        } else {
            (PaymentStatus::Completed, true)
        };

        Self {
            id: Uuid::new_v4(),
            gym_id,
            user_id,
            amount,
            is_online,
            is_paid,
            status,
            gateway_name: None,
            tracking_number: None,
            gateway_reference: None,
            transaction_code: None,
            purchase,
            refund_reason: None,
            cancellation_reason: None,
            created_at: now,
            verified_at: if is_online { None } else { Some(now) },
            updated_at: now,
            refunded_at: None,
        }
    }
}

/// Fields written together with a successful Pending -> Completed transition.
#[derive(Debug, Clone)]
pub struct PaymentVerification {
    pub transaction_code: Option<String>,
    pub gateway_reference: Option<String>,
    pub verified_at: DateTime<Utc>,
}
