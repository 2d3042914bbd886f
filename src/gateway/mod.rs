//! Adapter over the external payment provider.
//!
//! Every call is a remote call that may be slow or fail. A transport or
//! protocol failure is an `Err(AppError::External)`; a provider that answers
//! but declines (`succeeded == false`) is ordinary data, and callers handle
//! the two separately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

pub mod http_gateway;
pub mod virtual_gateway;

pub use http_gateway::HttpGateway;
pub use virtual_gateway::VirtualGateway;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRequest {
    pub amount: i64,
    pub callback_url: String,
    pub gateway_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRequestOutcome {
    pub succeeded: bool,
    pub tracking_number: Option<i64>,
    /// Where the customer is sent to pay.
    pub gateway_url: Option<String>,
    pub message: Option<String>,
}

/// Whatever the provider sent back to the callback endpoint, with the
/// tracking number already resolved against the stored payment.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub tracking_number: i64,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InvoiceStatus {
    ReadyForVerifying,
    AlreadyVerified,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedInvoice {
    pub tracking_number: i64,
    pub amount: i64,
    pub gateway_name: String,
    pub status: InvoiceStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub succeeded: bool,
    pub transaction_code: Option<String>,
    pub reference_number: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOutcome {
    pub succeeded: bool,
    pub message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_invoice(&self, request: InvoiceRequest) -> Result<InvoiceRequestOutcome>;
    async fn fetch_invoice(&self, params: &CallbackParams) -> Result<FetchedInvoice>;
    async fn verify(&self, invoice: &FetchedInvoice) -> Result<VerifyOutcome>;
    async fn cancel(&self, invoice: &FetchedInvoice, reason: &str) -> Result<GatewayOutcome>;
    async fn refund_full(&self, tracking_number: i64) -> Result<GatewayOutcome>;
}
