//! Apple verifyReceipt client.
//!
//! Receipts are posted to the production endpoint first. Status 21007
//! ("sandbox receipt sent to production") triggers exactly one retry
//! against the sandbox endpoint, recording `environment = Sandbox`. Any
//! other non-zero status is a rejection carrying the numeric status.

use crate::config::AppleConfig;
use crate::error::{Error, Result};
use crate::verify::{AppleReceiptVerifier, Environment, ReceiptTransaction, Verification};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// Apple status code asking for the sandbox endpoint.
const STATUS_SANDBOX_RECEIPT: i64 = 21007;

#[derive(Debug, Deserialize)]
struct VerifyReceiptResponse {
    status: i64,
    receipt: Option<ReceiptBody>,
    #[serde(rename = "latest_receipt_info")]
    latest_receipt_info: Option<Vec<InAppTransaction>>,
}

#[derive(Debug, Deserialize)]
struct ReceiptBody {
    #[serde(default)]
    in_app: Vec<InAppTransaction>,
}

#[derive(Debug, Deserialize)]
struct InAppTransaction {
    product_id: String,
    transaction_id: String,
    original_transaction_id: Option<String>,
}

/// HTTP client for Apple's verifyReceipt API.
pub struct AppleVerifyClient {
    http: reqwest::Client,
    config: AppleConfig,
}

impl AppleVerifyClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: AppleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build Apple HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    async fn post_receipt(&self, url: &str, receipt: &str) -> Result<VerifyReceiptResponse> {
        let mut body = json!({ "receipt-data": receipt });
        if let Some(ref secret) = self.config.shared_secret {
            body["password"] = json!(secret);
        }

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Apple verifyReceipt request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Provider(format!(
                "Apple verifyReceipt returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<VerifyReceiptResponse>()
            .await
            .map_err(|e| Error::Provider(format!("Apple verifyReceipt response unreadable: {e}")))
    }

    /// Post to production; on 21007 retry once against sandbox.
    async fn fetch(&self, receipt: &str) -> Result<(Environment, VerifyReceiptResponse)> {
        let production = self
            .post_receipt(&self.config.production_url, receipt)
            .await?;
        if production.status != STATUS_SANDBOX_RECEIPT {
            return Ok((Environment::Production, production));
        }

        debug!("Apple returned 21007, retrying against sandbox endpoint");
        let sandbox = self.post_receipt(&self.config.sandbox_url, receipt).await?;
        Ok((Environment::Sandbox, sandbox))
    }

    fn transactions(response: &VerifyReceiptResponse) -> Vec<ReceiptTransaction> {
        let in_app = response
            .receipt
            .as_ref()
            .map(|r| r.in_app.as_slice())
            .unwrap_or_default();
        let latest = response
            .latest_receipt_info
            .as_deref()
            .unwrap_or_default();

        in_app
            .iter()
            .chain(latest.iter())
            .map(|tx| ReceiptTransaction {
                product_id: tx.product_id.clone(),
                transaction_id: tx.transaction_id.clone(),
                original_transaction_id: tx.original_transaction_id.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl AppleReceiptVerifier for AppleVerifyClient {
    async fn verify(&self, receipt: &str, product_id: &str) -> Result<Verification> {
        let (environment, response) = self.fetch(receipt).await?;

        if response.status != 0 {
            warn!(
                "Apple rejected receipt with status {} ({:?})",
                response.status, environment
            );
            return Ok(Verification::rejected(
                environment,
                format!("Apple status {}", response.status),
            ));
        }

        let Some(matched) = Self::transactions(&response)
            .into_iter()
            .find(|tx| tx.product_id == product_id)
        else {
            return Ok(Verification::rejected(environment, "Product ID not found"));
        };

        Ok(Verification {
            verified: true,
            transaction_id: Some(matched.transaction_id),
            original_transaction_id: matched.original_transaction_id,
            environment,
            error: None,
        })
    }

    async fn list_transactions(
        &self,
        receipt: &str,
    ) -> Result<(Environment, Vec<ReceiptTransaction>)> {
        let (environment, response) = self.fetch(receipt).await?;
        if response.status != 0 {
            return Err(Error::InvalidReceipt(format!(
                "Apple status {}",
                response.status
            )));
        }

        // Dedup by transaction id; in_app and latest_receipt_info overlap.
        let mut seen = std::collections::HashSet::new();
        let transactions = Self::transactions(&response)
            .into_iter()
            .filter(|tx| seen.insert(tx.transaction_id.clone()))
            .collect();
        Ok((environment, transactions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> VerifyReceiptResponse {
        serde_json::from_value(json).expect("parse")
    }

    #[test]
    fn transactions_merge_in_app_and_latest() {
        let parsed = response(serde_json::json!({
            "status": 0,
            "receipt": { "in_app": [
                { "product_id": "sku-a", "transaction_id": "t1",
                  "original_transaction_id": "t0" }
            ]},
            "latest_receipt_info": [
                { "product_id": "sku-b", "transaction_id": "t2" }
            ]
        }));
        let txs = AppleVerifyClient::transactions(&parsed);
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].product_id, "sku-a");
        assert_eq!(txs[0].original_transaction_id.as_deref(), Some("t0"));
        assert_eq!(txs[1].transaction_id, "t2");
    }

    #[test]
    fn missing_receipt_body_yields_no_transactions() {
        let parsed = response(serde_json::json!({ "status": 0 }));
        assert!(AppleVerifyClient::transactions(&parsed).is_empty());
    }
}
