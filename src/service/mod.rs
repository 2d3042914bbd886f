pub mod attendance_service;
pub mod membership_service;
pub mod payment_service;

use std::sync::Arc;
use sqlx::SqlitePool;
use crate::auth::{refresh_token::RefreshTokenStore, AuthService};
use crate::config::Settings;
use crate::gateway::PaymentGateway;
use crate::repository::*;
use attendance_service::AttendanceService;
use membership_service::{MembershipActivator, MembershipService};
use payment_service::PaymentService;

pub use payment_service::{CallbackOutcome, CreatePaymentRequest, CreatedPayment};

pub struct ServiceContext {
    pub gym_repo: Arc<dyn GymRepository>,
    pub user_repo: Arc<dyn UserRepository>,
    pub payment_repo: Arc<dyn PaymentRepository>,
    pub membership_repo: Arc<dyn MembershipRepository>,
    pub attendance_repo: Arc<dyn AttendanceRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub auth_service: Arc<AuthService>,
    pub activator: Arc<MembershipActivator>,
    pub payment_service: Arc<PaymentService>,
    pub membership_service: Arc<MembershipService>,
    pub attendance_service: Arc<AttendanceService>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(db_pool: SqlitePool, gateway: Arc<dyn PaymentGateway>, settings: &Settings) -> Self {
        let gym_repo: Arc<dyn GymRepository> = Arc::new(SqliteGymRepository::new(db_pool.clone()));
        let user_repo: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(db_pool.clone()));
        let payment_repo: Arc<dyn PaymentRepository> = Arc::new(SqlitePaymentRepository::new(db_pool.clone()));
        let membership_repo: Arc<dyn MembershipRepository> = Arc::new(SqliteMembershipRepository::new(db_pool.clone()));
        let attendance_repo: Arc<dyn AttendanceRepository> = Arc::new(SqliteAttendanceRepository::new(db_pool.clone()));

        let auth_service = Arc::new(AuthService::new(
            user_repo.clone(),
            RefreshTokenStore::new(db_pool.clone()),
            &settings.auth,
        ));

        let activator = Arc::new(MembershipActivator::new(membership_repo.clone()));
        let payment_service = Arc::new(PaymentService::new(
            payment_repo.clone(),
            user_repo.clone(),
            activator.clone(),
            gateway.clone(),
            settings.server.base_url.clone(),
            settings.gateway.name.clone(),
        ));
        let membership_service = Arc::new(MembershipService::new(
            membership_repo.clone(),
            user_repo.clone(),
            activator.clone(),
            payment_service.clone(),
        ));
        let attendance_service = Arc::new(AttendanceService::new(
            attendance_repo.clone(),
            user_repo.clone(),
            membership_service.clone(),
        ));

        Self {
            gym_repo,
            user_repo,
            payment_repo,
            membership_repo,
            attendance_repo,
            gateway,
            auth_service,
            activator,
            payment_service,
            membership_service,
            attendance_service,
            db_pool,
        }
    }
}
