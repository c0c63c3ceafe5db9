//! YooKassa webhook processing.
//!
//! YooKassa delivers payment notifications at-least-once and retries on any
//! error response. Processing therefore never errors for redeliveries: the
//! intent's terminal-state check and the grant uniqueness constraint turn a
//! replay into an idempotent "already processed" acknowledgement.

use crate::catalog::Catalog;
use crate::config::YookassaConfig;
use crate::error::{Error, Result};
use crate::store::{
    audit, grants, intents, EntitlementScope, GrantSource, IntentStatus, NewGrant, NewPurchase,
    Store,
};
use serde::Deserialize;
use tracing::{info, warn};

/// Webhook event published when a payment settles.
const PAYMENT_SUCCEEDED: &str = "payment.succeeded";

/// Parsed YooKassa notification.
#[derive(Debug, Clone, Deserialize)]
pub struct YookassaEvent {
    /// Event name, e.g. `payment.succeeded`.
    pub event: String,
    /// Payment object.
    pub object: PaymentObject,
}

/// Payment object embedded in the notification.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentObject {
    /// YooKassa payment id; becomes the grant's `source_ref`.
    pub id: String,
    /// Merchant metadata attached at payment creation.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl PaymentObject {
    /// Extract the purchase intent id from metadata. YooKassa echoes
    /// metadata values back as strings, so both forms are accepted.
    #[must_use]
    pub fn intent_id(&self) -> Option<i64> {
        let value = self.metadata.as_ref()?.get("intent_id")?;
        match value {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// How a webhook delivery was handled. Every variant is a 200 to the
/// provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    /// Payment settled: grant + purchase written, intent SUCCEEDED.
    Processed {
        /// Id of the grant written for this payment.
        grant_id: i64,
    },
    /// Redelivery of a payment that was already processed.
    AlreadyProcessed,
    /// Event irrelevant or metadata unusable; acknowledged without effect.
    Ignored,
}

impl WebhookAck {
    /// Status string reported back to the provider.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            WebhookAck::Processed { .. } => "ok",
            WebhookAck::AlreadyProcessed => "already_processed",
            WebhookAck::Ignored => "ignored",
        }
    }
}

/// Check webhook authenticity.
///
/// # Errors
///
/// Returns [`Error::NotConfigured`] when no secret is deployed (operator
/// error, distinct from a bad request) and [`Error::Unauthorized`] when the
/// header is missing or does not match.
pub fn authorize(config: &YookassaConfig, header: Option<&str>) -> Result<()> {
    let Some(ref secret) = config.webhook_secret else {
        return Err(Error::NotConfigured(
            "YooKassa webhook secret is not configured".to_string(),
        ));
    };
    match header {
        Some(provided) if provided == secret => Ok(()),
        _ => Err(Error::Unauthorized("webhook signature mismatch".to_string())),
    }
}

/// Handles authenticated YooKassa notifications.
#[derive(Clone)]
pub struct WebhookHandler {
    store: Store,
    catalog: Catalog,
}

impl WebhookHandler {
    /// Create a webhook handler.
    #[must_use]
    pub fn new(store: Store, catalog: Catalog) -> Self {
        Self { store, catalog }
    }

    /// Process one notification.
    ///
    /// On `payment.succeeded`, one atomic sequence: insert the grant
    /// (source `yookassa`, source_ref = payment id), insert the purchase,
    /// move the intent to SUCCEEDED, append the audit entry, single commit.
    /// A grant uniqueness violation inside the sequence means the webhook
    /// was redelivered: roll back and acknowledge. Terminal intents accept
    /// no writes at all: SUCCEEDED acknowledges as already processed,
    /// FAILED (or legacy COMPLETED) is ignored.
    ///
    /// # Errors
    ///
    /// Returns a database error, or [`Error::UnknownProduct`] when the
    /// intent's target has no active SKU (catalog drift, not a replay).
    pub async fn handle_event(&self, event: &YookassaEvent, trace_id: &str) -> Result<WebhookAck> {
        if event.event != PAYMENT_SUCCEEDED {
            return Ok(WebhookAck::Ignored);
        }

        let Some(intent_id) = event.object.intent_id() else {
            warn!("Webhook for payment {} has no usable intent_id", event.object.id);
            return Ok(WebhookAck::Ignored);
        };

        let mut conn = self.store.pool().acquire().await?;
        let Some(intent) = intents::by_id(&mut conn, intent_id).await? else {
            warn!("Webhook references unknown intent {intent_id}");
            return Ok(WebhookAck::Ignored);
        };
        drop(conn);

        if intent.status == IntentStatus::Succeeded {
            return Ok(WebhookAck::AlreadyProcessed);
        }
        if intent.status.is_terminal() {
            // FAILED or legacy COMPLETED accept no further writes.
            warn!(
                "Webhook for payment {} hit intent {} in terminal status {:?}",
                event.object.id, intent.id, intent.status
            );
            return Ok(WebhookAck::Ignored);
        }

        let entitlement = match (&intent.tour_id, &intent.city_slug) {
            (Some(tour_id), _) => self
                .catalog
                .by_scope_ref(EntitlementScope::Tour, tour_id)
                .await?,
            (None, Some(city_slug)) => self
                .catalog
                .by_scope_ref(EntitlementScope::City, city_slug)
                .await?,
            (None, None) => None,
        };
        let Some(entitlement) = entitlement else {
            return Err(Error::UnknownProduct(format!(
                "intent {intent_id} targets no active SKU"
            )));
        };

        let new_grant = NewGrant {
            device_anon_id: intent.device_anon_id.clone(),
            user_id: None,
            entitlement_id: entitlement.id,
            source: GrantSource::Yookassa,
            source_ref: event.object.id.clone(),
        };

        let mut tx = self.store.pool().begin().await?;
        let Some(grant) = grants::try_insert(&mut *tx, &new_grant).await? else {
            // Redelivery raced us past the intent-status check; the payment
            // already produced its grant.
            tx.rollback().await?;
            return Ok(WebhookAck::AlreadyProcessed);
        };
        intents::insert_purchase(
            &mut *tx,
            &NewPurchase {
                intent_id: intent.id,
                store: "yookassa".to_string(),
                store_transaction_id: event.object.id.clone(),
                status: "succeeded".to_string(),
            },
        )
        .await?;
        intents::finish(&mut *tx, intent.id, IntentStatus::Succeeded).await?;
        audit::append(
            &mut *tx,
            audit::PAYMENT_SUCCEEDED,
            &intent.id.to_string(),
            &intent.device_anon_id,
            trace_id,
        )
        .await?;
        tx.commit().await?;

        info!(
            "YooKassa payment {} settled intent {} (grant {})",
            event.object.id, intent.id, grant.id
        );
        Ok(WebhookAck::Processed { grant_id: grant.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_distinguishes_missing_config_from_bad_signature() {
        let unconfigured = YookassaConfig::default();
        assert!(matches!(
            authorize(&unconfigured, Some("anything")),
            Err(Error::NotConfigured(_))
        ));

        let configured = YookassaConfig {
            webhook_secret: Some("topsecret".to_string()),
        };
        assert!(authorize(&configured, Some("topsecret")).is_ok());
        assert!(matches!(
            authorize(&configured, Some("wrong")),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            authorize(&configured, None),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn intent_id_accepts_string_and_number_metadata() {
        let parse = |metadata: serde_json::Value| PaymentObject {
            id: "pay-1".to_string(),
            metadata: Some(metadata),
        };
        assert_eq!(parse(serde_json::json!({"intent_id": 7})).intent_id(), Some(7));
        assert_eq!(parse(serde_json::json!({"intent_id": "7"})).intent_id(), Some(7));
        assert_eq!(parse(serde_json::json!({"intent_id": "x"})).intent_id(), None);
        assert_eq!(parse(serde_json::json!({})).intent_id(), None);

        let bare = PaymentObject { id: "pay-1".to_string(), metadata: None };
        assert_eq!(bare.intent_id(), None);
    }
}
