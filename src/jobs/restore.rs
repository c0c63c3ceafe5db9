//! Batch "restore purchases" worker.
//!
//! Each batch item independently goes through verification and granting:
//! a failed item is recorded with its own status and error and never aborts
//! the rest of the batch. The job completes as long as the batch finished
//! running; failures are data in the result payload.

use crate::config::AppleConfig;
use crate::error::{Error, Result};
use crate::grant::GrantService;
use crate::jobs::{JobRunner, JOB_RESTORE_PURCHASES};
use crate::store::{GrantSource, Job};
use crate::verify::{AppleReceiptVerifier, Environment, GooglePurchaseVerifier};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One Google purchase submitted for restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GooglePurchaseItem {
    /// Product id of the purchase.
    pub product_id: String,
    /// Play purchase token.
    pub purchase_token: String,
}

/// Restore job payload, tagged by platform. The legacy single-token Google
/// shape is normalized into the array form at the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum RestorePayload {
    /// A single Apple receipt; items are the transactions inside it.
    Apple {
        /// Requesting device.
        device_anon_id: String,
        /// Authenticated user, when known.
        #[serde(default)]
        user_id: Option<String>,
        /// Base64 receipt blob.
        receipt: String,
    },
    /// A batch of Google purchase tokens.
    Google {
        /// Requesting device.
        device_anon_id: String,
        /// Authenticated user, when known.
        #[serde(default)]
        user_id: Option<String>,
        /// Android package name for the Play API call.
        package_name: String,
        /// Purchases to verify and grant.
        purchases: Vec<GooglePurchaseItem>,
    },
}

/// Outcome of a single batch item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreItemResult {
    /// What the item refers to (product id or receipt transaction).
    pub reference: String,
    /// `granted`, `exists`, or `failed`.
    pub status: String,
    /// Grant id for granted/exists items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<i64>,
    /// Failure detail for failed items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a restore batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Grants newly written by this batch.
    pub grants_created: u32,
    /// Idempotent hits on grants that already existed.
    pub grants_existing: u32,
    /// Items that failed verification or granting.
    pub failed_count: u32,
    /// Per-item breakdown.
    pub items: Vec<RestoreItemResult>,
}

impl RestoreReport {
    fn record_granted(&mut self, reference: String, grant_id: i64, is_new: bool) {
        if is_new {
            self.grants_created += 1;
        } else {
            self.grants_existing += 1;
        }
        self.items.push(RestoreItemResult {
            reference,
            status: if is_new { "granted" } else { "exists" }.to_string(),
            grant_id: Some(grant_id),
            error: None,
        });
    }

    fn record_failed(&mut self, reference: String, error: String) {
        self.failed_count += 1;
        self.items.push(RestoreItemResult {
            reference,
            status: "failed".to_string(),
            grant_id: None,
            error: Some(error),
        });
    }
}

/// Runs restore batches: per-item verification + grant.
pub struct RestoreWorker {
    apple: Arc<dyn AppleReceiptVerifier>,
    google: Arc<dyn GooglePurchaseVerifier>,
    grants: GrantService,
    apple_config: AppleConfig,
}

impl RestoreWorker {
    /// Create a restore worker.
    #[must_use]
    pub fn new(
        apple: Arc<dyn AppleReceiptVerifier>,
        google: Arc<dyn GooglePurchaseVerifier>,
        grants: GrantService,
        apple_config: AppleConfig,
    ) -> Self {
        Self {
            apple,
            google,
            grants,
            apple_config,
        }
    }

    /// Run a restore batch to completion.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures (database errors) propagate; item-level
    /// verification and grant failures are recorded in the report.
    pub async fn run_batch(&self, payload: &RestorePayload, trace_id: &str) -> Result<RestoreReport> {
        match payload {
            RestorePayload::Apple {
                device_anon_id,
                user_id,
                receipt,
            } => {
                self.restore_apple(receipt, device_anon_id, user_id.as_deref(), trace_id)
                    .await
            }
            RestorePayload::Google {
                device_anon_id,
                user_id,
                package_name,
                purchases,
            } => {
                self.restore_google(
                    package_name,
                    purchases,
                    device_anon_id,
                    user_id.as_deref(),
                    trace_id,
                )
                .await
            }
        }
    }

    async fn restore_apple(
        &self,
        receipt: &str,
        device_anon_id: &str,
        user_id: Option<&str>,
        trace_id: &str,
    ) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();

        let (environment, transactions) = match self.apple.list_transactions(receipt).await {
            Ok(listed) => listed,
            Err(e @ (Error::Provider(_) | Error::InvalidReceipt(_))) => {
                // The receipt itself is unusable; the batch has exactly one
                // item and it failed.
                report.record_failed("apple_receipt".to_string(), e.to_string());
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        if environment == Environment::Sandbox && !self.apple_config.accept_sandbox {
            report.record_failed(
                "apple_receipt".to_string(),
                "sandbox receipts not accepted".to_string(),
            );
            return Ok(report);
        }

        for tx in transactions {
            match self
                .grants
                .grant(
                    GrantSource::Apple,
                    &tx.transaction_id,
                    &tx.product_id,
                    device_anon_id,
                    user_id,
                    trace_id,
                )
                .await
            {
                Ok(outcome) => {
                    report.record_granted(tx.product_id, outcome.grant.id, outcome.is_new);
                }
                Err(e) => {
                    warn!("Restore item {} failed: {e}", tx.product_id);
                    report.record_failed(tx.product_id, e.to_string());
                }
            }
        }
        Ok(report)
    }

    async fn restore_google(
        &self,
        package_name: &str,
        purchases: &[GooglePurchaseItem],
        device_anon_id: &str,
        user_id: Option<&str>,
        trace_id: &str,
    ) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();

        for item in purchases {
            let verification = match self
                .google
                .verify(package_name, &item.product_id, &item.purchase_token)
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    warn!("Restore item {} failed to verify: {e}", item.product_id);
                    report.record_failed(item.product_id.clone(), e.to_string());
                    continue;
                }
            };

            if !verification.verified {
                let reason = verification
                    .error
                    .unwrap_or_else(|| "not verified".to_string());
                report.record_failed(item.product_id.clone(), reason);
                continue;
            }

            // Older purchases may miss orderId; the token still uniquely
            // identifies the transaction.
            let source_ref = verification
                .transaction_id
                .unwrap_or_else(|| item.purchase_token.clone());

            match self
                .grants
                .grant(
                    GrantSource::Google,
                    &source_ref,
                    &item.product_id,
                    device_anon_id,
                    user_id,
                    trace_id,
                )
                .await
            {
                Ok(outcome) => {
                    report.record_granted(item.product_id.clone(), outcome.grant.id, outcome.is_new);
                }
                Err(e) => {
                    warn!("Restore item {} failed to grant: {e}", item.product_id);
                    report.record_failed(item.product_id.clone(), e.to_string());
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl JobRunner for RestoreWorker {
    async fn run(&self, job: &Job) -> Result<serde_json::Value> {
        if job.job_type != JOB_RESTORE_PURCHASES {
            return Err(Error::Internal(format!(
                "restore worker cannot run job type {}",
                job.job_type
            )));
        }
        let payload: RestorePayload = job.payload_as()?;
        let report = self.run_batch(&payload, &job.id).await?;
        info!(
            "Restore job {}: {} created, {} existing, {} failed",
            job.id, report.grants_created, report.grants_existing, report.failed_count
        );
        Ok(serde_json::to_value(report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_tagged_by_platform() {
        let apple: RestorePayload = serde_json::from_str(
            r#"{ "platform": "apple", "device_anon_id": "dev-1", "receipt": "b64==" }"#,
        )
        .expect("parse");
        assert!(matches!(apple, RestorePayload::Apple { .. }));

        let google: RestorePayload = serde_json::from_str(
            r#"{ "platform": "google", "device_anon_id": "dev-1",
                 "package_name": "com.wowcities.app",
                 "purchases": [ { "product_id": "sku1", "purchase_token": "tokA" } ] }"#,
        )
        .expect("parse");
        match google {
            RestorePayload::Google { purchases, .. } => assert_eq!(purchases.len(), 1),
            RestorePayload::Apple { .. } => panic!("wrong variant"),
        }
    }

    #[test]
    fn report_counters_track_items() {
        let mut report = RestoreReport::default();
        report.record_granted("sku1".to_string(), 10, true);
        report.record_granted("sku2".to_string(), 11, false);
        report.record_failed("sku3".to_string(), "boom".to_string());

        assert_eq!(report.grants_created, 1);
        assert_eq!(report.grants_existing, 1);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.items.len(), 3);
        assert_eq!(report.items[1].status, "exists");
        assert_eq!(report.items[2].error.as_deref(), Some("boom"));
    }
}
