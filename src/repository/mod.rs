use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::*;
use crate::error::{AppError, Result};

pub mod attendance_repository;
pub mod gym_repository;
pub mod membership_repository;
pub mod payment_repository;
pub mod user_repository;

pub use attendance_repository::SqliteAttendanceRepository;
pub use gym_repository::SqliteGymRepository;
pub use membership_repository::SqliteMembershipRepository;
pub use payment_repository::SqlitePaymentRepository;
pub use user_repository::SqliteUserRepository;

#[async_trait]
pub trait GymRepository: Send + Sync {
    async fn create(&self, gym: CreateGymRequest) -> Result<Gym>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Gym>>;
    async fn approve(&self, id: Uuid) -> Result<Gym>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: CreateUserRequest) -> Result<User>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_national_code(&self, national_code: &str) -> Result<Option<User>>;
    /// The user together with their stored password hash, for login.
    async fn find_credentials(&self, national_code: &str) -> Result<Option<(User, String)>>;
}

/// How long a verification claim blocks other callbacks and cancellation.
/// A claim older than this is treated as abandoned (e.g. the process died
/// mid-callback) and can be taken over.
pub const VERIFICATION_LEASE_MINUTES: i64 = 10;

/// A status change applied only if the payment is still in `from()`.
#[derive(Debug, Clone)]
pub enum PaymentTransition {
    Complete(PaymentVerification),
    Fail,
    Cancel { reason: String },
    Refund { reason: String },
}

impl PaymentTransition {
    pub fn from(&self) -> PaymentStatus {
        match self {
            PaymentTransition::Refund { .. } => PaymentStatus::Completed,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn to(&self) -> PaymentStatus {
        match self {
            PaymentTransition::Complete(_) => PaymentStatus::Completed,
            PaymentTransition::Fail => PaymentStatus::Failed,
            PaymentTransition::Cancel { .. } => PaymentStatus::Cancelled,
            PaymentTransition::Refund { .. } => PaymentStatus::Refunded,
        }
    }
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: Payment) -> Result<Payment>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn find_by_tracking_number(&self, tracking_number: i64) -> Result<Option<Payment>>;
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>>;
    /// Records the invoice the gateway issued. Only applies to pending payments.
    async fn set_gateway_details(&self, id: Uuid, gateway_name: &str, tracking_number: i64) -> Result<Payment>;
    /// Takes ownership of the gateway round trip for a pending payment.
    /// `Ok(false)` if the payment left Pending or another caller holds a claim
    /// younger than [`VERIFICATION_LEASE_MINUTES`].
    async fn claim_verification(&self, id: Uuid) -> Result<bool>;
    /// Compare-and-swap on status. `Ok(None)` means the payment was not in
    /// `transition.from()` (or does not exist) and nothing was written.
    /// Cancelling also loses against a live verification claim.
    async fn transition(&self, id: Uuid, transition: PaymentTransition) -> Result<Option<Payment>>;
    /// Online payments still pending, created before `created_before` and not
    /// under a live verification claim.
    async fn list_stale_pending(&self, gym_id: Option<Uuid>, created_before: DateTime<Utc>) -> Result<Vec<Payment>>;
    /// Completed payments carrying a purchase that no membership grant refers to.
    async fn list_completed_without_grant(&self, gym_id: Option<Uuid>) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn create(&self, membership: Membership) -> Result<Membership>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Membership>>;
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Membership>>;
    /// Most recently created active membership of the user in the gym.
    async fn find_active(&self, gym_id: Uuid, user_id: Uuid, membership_type: Option<MembershipType>) -> Result<Option<Membership>>;
    /// Removes one session, clamping at zero. `Ok(None)` if no session-based
    /// membership has this id.
    async fn deduct_session(&self, id: Uuid) -> Result<Option<Membership>>;
    /// Applies a paid purchase and records the grant in one transaction.
    /// `Ok(None)` if this payment has already been granted.
    async fn apply_grant(&self, payment_id: Uuid, gym_id: Uuid, user_id: Uuid, purchase: &MembershipPurchase) -> Result<Option<(Membership, MembershipGrant)>>;
    async fn find_grant(&self, payment_id: Uuid) -> Result<Option<MembershipGrant>>;
}

#[async_trait]
pub trait AttendanceRepository: Send + Sync {
    /// Stores the entry. With `spend_session`, one session is taken from the
    /// entry's membership in the same transaction; `Ok(None)` if none was left
    /// and nothing was written.
    async fn record_entry(&self, attendance: Attendance, spend_session: bool) -> Result<Option<Attendance>>;
    async fn list_since(&self, gym_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Attendance>>;
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string()))
}

pub(crate) fn parse_membership_type(s: &str) -> Result<MembershipType> {
    match s {
        "SessionBased" => Ok(MembershipType::SessionBased),
        "Monthly" => Ok(MembershipType::Monthly),
        _ => Err(AppError::Database(format!("Invalid membership type: {}", s))),
    }
}

pub(crate) fn membership_type_to_str(membership_type: &MembershipType) -> &'static str {
    match membership_type {
        MembershipType::SessionBased => "SessionBased",
        MembershipType::Monthly => "Monthly",
    }
}
