use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    gateway::{
        CallbackParams, FetchedInvoice, GatewayOutcome, InvoiceRequest, InvoiceRequestOutcome,
        InvoiceStatus, PaymentGateway, VerifyOutcome,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvoiceState {
    AwaitingPayment,
    Paid,
    Declined,
    Verified,
    Cancelled,
    Refunded,
}

#[derive(Debug, Clone)]
struct VirtualInvoice {
    amount: i64,
    callback_url: String,
    gateway_name: String,
    state: InvoiceState,
}

/// In-process stand-in for a real provider. Tracking numbers auto-increment
/// and the customer's pay/decline choice is made through [`VirtualGateway::pay`]
/// and [`VirtualGateway::decline`], which hand back the callback URL the
/// customer would be redirected to.
pub struct VirtualGateway {
    public_url: String,
    next_tracking_number: AtomicI64,
    invoices: RwLock<HashMap<i64, VirtualInvoice>>,
}

impl VirtualGateway {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            public_url: public_url.into().trim_end_matches('/').to_string(),
            next_tracking_number: AtomicI64::new(1),
            invoices: RwLock::new(HashMap::new()),
        }
    }

    pub async fn pay(&self, tracking_number: i64) -> Result<String> {
        self.settle(tracking_number, InvoiceState::Paid).await
    }

    pub async fn decline(&self, tracking_number: i64) -> Result<String> {
        self.settle(tracking_number, InvoiceState::Declined).await
    }

    async fn settle(&self, tracking_number: i64, state: InvoiceState) -> Result<String> {
        let mut invoices = self.invoices.write().await;
        let invoice = invoices
            .get_mut(&tracking_number)
            .ok_or_else(|| AppError::NotFound(format!("Invoice {} not found", tracking_number)))?;

        if invoice.state == InvoiceState::AwaitingPayment {
            invoice.state = state;
        }

        Ok(callback_with_tracking(&invoice.callback_url, tracking_number))
    }
}

fn callback_with_tracking(callback_url: &str, tracking_number: i64) -> String {
    let separator = if callback_url.contains('?') { '&' } else { '?' };
    format!("{}{}trackingNumber={}", callback_url, separator, tracking_number)
}

#[async_trait]
impl PaymentGateway for VirtualGateway {
    async fn request_invoice(&self, request: InvoiceRequest) -> Result<InvoiceRequestOutcome> {
        if request.amount <= 0 {
            return Ok(InvoiceRequestOutcome {
                succeeded: false,
                tracking_number: None,
                gateway_url: None,
                message: Some("Amount must be positive".to_string()),
            });
        }

        let tracking_number = self.next_tracking_number.fetch_add(1, Ordering::SeqCst);
        self.invoices.write().await.insert(
            tracking_number,
            VirtualInvoice {
                amount: request.amount,
                callback_url: request.callback_url,
                gateway_name: request.gateway_name,
                state: InvoiceState::AwaitingPayment,
            },
        );

        tracing::debug!("Virtual gateway issued invoice {}", tracking_number);

        Ok(InvoiceRequestOutcome {
            succeeded: true,
            tracking_number: Some(tracking_number),
            gateway_url: Some(format!("{}/virtual-gateway/{}", self.public_url, tracking_number)),
            message: None,
        })
    }

    async fn fetch_invoice(&self, params: &CallbackParams) -> Result<FetchedInvoice> {
        let invoices = self.invoices.read().await;
        let invoice = invoices.get(&params.tracking_number).ok_or_else(|| {
            AppError::External(format!("Unknown invoice {}", params.tracking_number))
        })?;

        let status = match invoice.state {
            InvoiceState::Paid => InvoiceStatus::ReadyForVerifying,
            InvoiceState::Verified | InvoiceState::Refunded => InvoiceStatus::AlreadyVerified,
            InvoiceState::AwaitingPayment | InvoiceState::Declined | InvoiceState::Cancelled => {
                InvoiceStatus::Failed
            }
        };

        Ok(FetchedInvoice {
            tracking_number: params.tracking_number,
            amount: invoice.amount,
            gateway_name: invoice.gateway_name.clone(),
            status,
            message: None,
        })
    }

    async fn verify(&self, invoice: &FetchedInvoice) -> Result<VerifyOutcome> {
        let mut invoices = self.invoices.write().await;
        let stored = invoices.get_mut(&invoice.tracking_number).ok_or_else(|| {
            AppError::External(format!("Unknown invoice {}", invoice.tracking_number))
        })?;

        if stored.state != InvoiceState::Paid {
            return Ok(VerifyOutcome {
                succeeded: false,
                transaction_code: None,
                reference_number: None,
                message: Some(format!("Invoice is {:?}", stored.state)),
            });
        }

        stored.state = InvoiceState::Verified;
        Ok(VerifyOutcome {
            succeeded: true,
            transaction_code: Some(format!("VG-{}", invoice.tracking_number)),
            reference_number: Some(Uuid::new_v4().simple().to_string()),
            message: None,
        })
    }

    async fn cancel(&self, invoice: &FetchedInvoice, reason: &str) -> Result<GatewayOutcome> {
        let mut invoices = self.invoices.write().await;
        let Some(stored) = invoices.get_mut(&invoice.tracking_number) else {
            return Ok(GatewayOutcome {
                succeeded: false,
                message: Some("Unknown invoice".to_string()),
            });
        };

        match stored.state {
            InvoiceState::AwaitingPayment | InvoiceState::Paid => {
                stored.state = InvoiceState::Cancelled;
                tracing::debug!("Virtual invoice {} cancelled: {}", invoice.tracking_number, reason);
                Ok(GatewayOutcome { succeeded: true, message: None })
            }
            state => Ok(GatewayOutcome {
                succeeded: false,
                message: Some(format!("Invoice is {:?}", state)),
            }),
        }
    }

    async fn refund_full(&self, tracking_number: i64) -> Result<GatewayOutcome> {
        let mut invoices = self.invoices.write().await;
        let Some(stored) = invoices.get_mut(&tracking_number) else {
            return Ok(GatewayOutcome {
                succeeded: false,
                message: Some("Unknown invoice".to_string()),
            });
        };

        if stored.state != InvoiceState::Verified {
            return Ok(GatewayOutcome {
                succeeded: false,
                message: Some(format!("Invoice is {:?}", stored.state)),
            });
        }

        stored.state = InvoiceState::Refunded;
        Ok(GatewayOutcome { succeeded: true, message: None })
    }
}
