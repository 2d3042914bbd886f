use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::{
    config::GatewayConfig,
    error::{AppError, Result},
    gateway::{
        CallbackParams, FetchedInvoice, GatewayOutcome, InvoiceRequest, InvoiceRequestOutcome,
        PaymentGateway, VerifyOutcome,
    },
};

/// JSON-over-HTTPS client for a hosted invoice API.
///
/// The request timeout is the only deadline applied to gateway calls; the
/// payment service does not impose its own.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchRequest<'a> {
    fields: &'a std::collections::HashMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest<'a> {
    reason: &'a str,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| AppError::Internal("gateway.base_url is required for the http gateway".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Internal("gateway.api_key is required for the http gateway".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build gateway client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Gateway request: POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn request_invoice(&self, request: InvoiceRequest) -> Result<InvoiceRequestOutcome> {
        self.post("/invoices", &request).await
    }

    async fn fetch_invoice(&self, params: &CallbackParams) -> Result<FetchedInvoice> {
        let path = format!("/invoices/{}/fetch", params.tracking_number);
        self.post(&path, &FetchRequest { fields: &params.fields }).await
    }

    async fn verify(&self, invoice: &FetchedInvoice) -> Result<VerifyOutcome> {
        let path = format!("/invoices/{}/verify", invoice.tracking_number);
        self.post(&path, invoice).await
    }

    async fn cancel(&self, invoice: &FetchedInvoice, reason: &str) -> Result<GatewayOutcome> {
        let path = format!("/invoices/{}/cancel", invoice.tracking_number);
        self.post(&path, &CancelRequest { reason }).await
    }

    async fn refund_full(&self, tracking_number: i64) -> Result<GatewayOutcome> {
        let path = format!("/invoices/{}/refund", tracking_number);
        self.post(&path, &serde_json::json!({})).await
    }
}
