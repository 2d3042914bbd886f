#![allow(dead_code)]

use async_trait::async_trait;
use gymdesk::{
    auth::CurrentUser,
    config::Settings,
    domain::{CreateGymRequest, CreateUserRequest, Gym, Role, User},
    error::{AppError, Result},
    gateway::{
        CallbackParams, FetchedInvoice, GatewayOutcome, InvoiceRequest, InvoiceRequestOutcome,
        InvoiceStatus, PaymentGateway, VerifyOutcome, VirtualGateway,
    },
    service::ServiceContext,
};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PASSWORD: &str = "secure_password123";

/// A gateway whose answers are set by the test.
pub struct ScriptedGateway {
    next_tracking_number: AtomicI64,
    invoiced: Mutex<HashMap<i64, i64>>,
    /// Amount the gateway claims was invoiced, instead of the real one.
    pub reported_amount: Mutex<Option<i64>>,
    pub reject_invoice: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub fetch_status: Mutex<InvoiceStatus>,
    pub verify_succeeds: AtomicBool,
    pub fail_verify: AtomicBool,
    pub refund_succeeds: AtomicBool,
    pub fetch_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            next_tracking_number: AtomicI64::new(1000),
            invoiced: Mutex::new(HashMap::new()),
            reported_amount: Mutex::new(None),
            reject_invoice: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fetch_status: Mutex::new(InvoiceStatus::ReadyForVerifying),
            verify_succeeds: AtomicBool::new(true),
            fail_verify: AtomicBool::new(false),
            refund_succeeds: AtomicBool::new(true),
            fetch_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn set_fetch_status(&self, status: InvoiceStatus) {
        *self.fetch_status.lock().unwrap() = status;
    }

    pub fn report_amount(&self, amount: i64) {
        *self.reported_amount.lock().unwrap() = Some(amount);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn request_invoice(&self, request: InvoiceRequest) -> Result<InvoiceRequestOutcome> {
        if self.reject_invoice.load(Ordering::SeqCst) {
            return Ok(InvoiceRequestOutcome {
                succeeded: false,
                tracking_number: None,
                gateway_url: None,
                message: Some("Merchant disabled".to_string()),
            });
        }

        let tracking_number = self.next_tracking_number.fetch_add(1, Ordering::SeqCst);
        self.invoiced.lock().unwrap().insert(tracking_number, request.amount);
        Ok(InvoiceRequestOutcome {
            succeeded: true,
            tracking_number: Some(tracking_number),
            gateway_url: Some(format!("https://gateway.test/pay/{}", tracking_number)),
            message: None,
        })
    }

    async fn fetch_invoice(&self, params: &CallbackParams) -> Result<FetchedInvoice> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(AppError::External("connection reset".to_string()));
        }

        let invoiced = self.invoiced.lock().unwrap().get(&params.tracking_number).copied();
        let amount = self.reported_amount.lock().unwrap().or(invoiced).unwrap_or_default();
        Ok(FetchedInvoice {
            tracking_number: params.tracking_number,
            amount,
            gateway_name: "Scripted".to_string(),
            status: *self.fetch_status.lock().unwrap(),
            message: None,
        })
    }

    async fn verify(&self, invoice: &FetchedInvoice) -> Result<VerifyOutcome> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(AppError::External("timeout".to_string()));
        }

        let succeeded = self.verify_succeeds.load(Ordering::SeqCst);
        Ok(VerifyOutcome {
            succeeded,
            transaction_code: succeeded.then(|| format!("TX-{}", invoice.tracking_number)),
            reference_number: succeeded.then(|| format!("REF-{}", invoice.tracking_number)),
            message: (!succeeded).then(|| "Verification declined".to_string()),
        })
    }

    async fn cancel(&self, _invoice: &FetchedInvoice, _reason: &str) -> Result<GatewayOutcome> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayOutcome { succeeded: true, message: None })
    }

    async fn refund_full(&self, _tracking_number: i64) -> Result<GatewayOutcome> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let succeeded = self.refund_succeeds.load(Ordering::SeqCst);
        Ok(GatewayOutcome {
            succeeded,
            message: (!succeeded).then(|| "Refund window closed".to_string()),
        })
    }
}

/// The in-process gateway, except that a successful verify answers late:
/// the money is captured at once but the caller only hears about it after
/// `delay`.
pub struct SlowVerifyGateway {
    pub inner: VirtualGateway,
    delay: Duration,
}

#[async_trait]
impl PaymentGateway for SlowVerifyGateway {
    async fn request_invoice(&self, request: InvoiceRequest) -> Result<InvoiceRequestOutcome> {
        self.inner.request_invoice(request).await
    }

    async fn fetch_invoice(&self, params: &CallbackParams) -> Result<FetchedInvoice> {
        self.inner.fetch_invoice(params).await
    }

    async fn verify(&self, invoice: &FetchedInvoice) -> Result<VerifyOutcome> {
        let outcome = self.inner.verify(invoice).await?;
        if outcome.succeeded {
            tokio::time::sleep(self.delay).await;
        }
        Ok(outcome)
    }

    async fn cancel(&self, invoice: &FetchedInvoice, reason: &str) -> Result<GatewayOutcome> {
        self.inner.cancel(invoice, reason).await
    }

    async fn refund_full(&self, tracking_number: i64) -> Result<GatewayOutcome> {
        self.inner.refund_full(tracking_number).await
    }
}

pub struct VirtualContext {
    pub ctx: Arc<ServiceContext>,
    pub gateway: Arc<SlowVerifyGateway>,
    pub gym: Gym,
    pub admin: CurrentUser,
    pub athlete: User,
}

pub async fn setup_virtual(verify_delay: Duration) -> anyhow::Result<VirtualContext> {
    let pool = test_pool().await?;
    let settings = test_settings();
    let gateway = Arc::new(SlowVerifyGateway {
        inner: VirtualGateway::new(settings.server.base_url.clone()),
        delay: verify_delay,
    });
    let ctx = Arc::new(ServiceContext::new(pool, gateway.clone(), &settings));
    let (gym, admin, athlete) = seed_gym(&ctx).await?;

    Ok(VirtualContext { ctx, gateway, gym, admin: caller(&admin), athlete })
}

pub struct TestContext {
    pub pool: SqlitePool,
    pub ctx: Arc<ServiceContext>,
    pub gateway: Arc<ScriptedGateway>,
    pub gym: Gym,
    pub admin: CurrentUser,
    pub athlete: User,
}

impl TestContext {
    /// The athlete as an authenticated caller.
    pub fn athlete_caller(&self) -> CurrentUser {
        caller(&self.athlete)
    }
}

pub fn caller(user: &User) -> CurrentUser {
    CurrentUser {
        user_id: user.id,
        gym_id: user.gym_id,
        role: user.role,
        national_code: user.national_code.clone(),
    }
}

pub async fn test_pool() -> anyhow::Result<SqlitePool> {
    // One connection, kept open: each in-memory connection is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await?;

    Ok(pool)
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.auth.jwt_secret = "integration-test-secret".to_string();
    settings
}

pub async fn setup() -> anyhow::Result<TestContext> {
    let pool = test_pool().await?;
    let gateway = Arc::new(ScriptedGateway::new());
    let ctx = Arc::new(ServiceContext::new(pool.clone(), gateway.clone(), &test_settings()));

    let (gym, admin, athlete) = seed_gym(&ctx).await?;

    Ok(TestContext {
        pool,
        ctx,
        gateway,
        gym,
        admin: caller(&admin),
        athlete,
    })
}

pub fn user_request(gym_id: Option<uuid::Uuid>, national_code: &str, role: Role) -> CreateUserRequest {
    CreateUserRequest {
        gym_id,
        first_name: "Test".to_string(),
        last_name: role.as_str().to_string(),
        national_code: national_code.to_string(),
        phone: "0912-000-0000".to_string(),
        password: PASSWORD.to_string(),
        role,
    }
}

async fn seed_gym(ctx: &ServiceContext) -> anyhow::Result<(Gym, User, User)> {
    let gym = ctx.gym_repo.create(CreateGymRequest {
        name: "Iron Temple".to_string(),
        address: "12 Valiasr St".to_string(),
        phone: "021-5550100".to_string(),
    }).await?;

    let admin = ctx.user_repo.create(user_request(Some(gym.id), "1000000001", Role::GymAdmin)).await?;
    let athlete = ctx.user_repo.create(user_request(Some(gym.id), "2000000002", Role::Athlete)).await?;

    Ok((gym, admin, athlete))
}
