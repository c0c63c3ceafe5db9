//! Row types and enums shared across the store modules.
//!
//! Rows are immutable snapshots of table state; mutation goes through the
//! query functions. `audit_log` rows have no update path at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// What an entitlement unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EntitlementScope {
    /// Unlocks a whole city (all paid tours and POI detail in it).
    City,
    /// Unlocks a single tour.
    Tour,
}

/// Payment rail a grant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum GrantSource {
    /// Apple in-app purchase receipt.
    Apple,
    /// Google Play purchase token.
    Google,
    /// YooKassa payment webhook.
    Yookassa,
    /// Promotional grant.
    Promo,
    /// Manual/system grant.
    System,
}

/// Lifecycle of a legacy direct-purchase intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum IntentStatus {
    /// Awaiting payment confirmation.
    Pending,
    /// Legacy terminal state kept for old rows.
    Completed,
    /// Payment failed or was cancelled.
    Failed,
    /// Payment confirmed and grant written.
    Succeeded,
}

impl IntentStatus {
    /// Terminal states accept no further writes.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, IntentStatus::Pending)
    }
}

/// Lifecycle of an async job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Persisted, waiting for the queue callback.
    Pending,
    /// Callback received, body executing.
    Running,
    /// Finished; result recorded (possibly with per-item failures).
    Completed,
    /// Failed to run or to reach the queue.
    Failed,
}

impl JobStatus {
    /// Canonical uppercase form, as stored and as reported to clients.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

/// A purchasable SKU definition. Read-only to this core; maintained by
/// external admin tooling.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Entitlement {
    /// Row id.
    pub id: i64,
    /// Globally unique SKU id.
    pub slug: String,
    /// What the SKU unlocks.
    pub scope: EntitlementScope,
    /// City slug or tour id the SKU refers to.
    pub ref_id: String,
    /// Price in minor currency units; 0 marks free content.
    pub price_amount: i64,
    /// Inactive SKUs resolve for nothing.
    pub is_active: bool,
}

impl Entitlement {
    /// Free content is never gated by ownership.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.price_amount == 0
    }
}

/// Proof that a device/user unlocked an entitlement via a specific provider
/// transaction. `(source, source_ref)` is unique, which is the single
/// correctness guarantee this subsystem enforces.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EntitlementGrant {
    /// Row id.
    pub id: i64,
    /// Owning anonymous device installation.
    pub device_anon_id: String,
    /// Owning authenticated user, when known at grant time.
    pub user_id: Option<String>,
    /// The unlocked SKU.
    pub entitlement_id: i64,
    /// Payment rail.
    pub source: GrantSource,
    /// Provider transaction id.
    pub source_ref: String,
    /// When the grant was written.
    pub granted_at: DateTime<Utc>,
    /// Set by external admin action; revoked grants confer no access.
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Fields for a grant insert.
#[derive(Debug, Clone)]
pub struct NewGrant {
    /// Owning anonymous device installation.
    pub device_anon_id: String,
    /// Owning authenticated user, if any.
    pub user_id: Option<String>,
    /// The unlocked SKU.
    pub entitlement_id: i64,
    /// Payment rail.
    pub source: GrantSource,
    /// Provider transaction id.
    pub source_ref: String,
}

/// A grant joined with its entitlement, as listed to clients.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GrantedEntitlement {
    /// SKU id.
    pub entitlement_slug: String,
    /// What the SKU unlocks.
    pub scope: EntitlementScope,
    /// City slug or tour id.
    pub ref_id: String,
    /// When the grant was written.
    pub granted_at: DateTime<Utc>,
}

/// Legacy direct-purchase intent (YooKassa flow).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PurchaseIntent {
    /// Row id; referenced from webhook metadata.
    pub id: i64,
    /// Target city, for city purchases.
    pub city_slug: Option<String>,
    /// Target tour, for tour purchases.
    pub tour_id: Option<String>,
    /// Purchasing device.
    pub device_anon_id: String,
    /// Client platform label.
    pub platform: String,
    /// Lifecycle state; terminal once not PENDING.
    pub status: IntentStatus,
    /// Caller-supplied deduplication token.
    pub idempotency_key: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields for an intent insert.
#[derive(Debug, Clone)]
pub struct NewIntent {
    /// Target city, for city purchases.
    pub city_slug: Option<String>,
    /// Target tour, for tour purchases.
    pub tour_id: Option<String>,
    /// Purchasing device.
    pub device_anon_id: String,
    /// Client platform label.
    pub platform: String,
    /// Caller-supplied deduplication token.
    pub idempotency_key: String,
}

/// Completed payment record, one-to-one with an intent. Immutable once
/// written.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Purchase {
    /// Row id.
    pub id: i64,
    /// The intent this payment settled.
    pub intent_id: i64,
    /// Payment store label.
    pub store: String,
    /// Provider payment/transaction id.
    pub store_transaction_id: String,
    /// Provider-reported status.
    pub status: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields for a purchase insert.
#[derive(Debug, Clone)]
pub struct NewPurchase {
    /// The intent this payment settled.
    pub intent_id: i64,
    /// Payment store label.
    pub store: String,
    /// Provider payment/transaction id.
    pub store_transaction_id: String,
    /// Provider-reported status.
    pub status: String,
}

/// Durable record of a long-running operation.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    /// Job id (UUID), the handle passed through the push queue.
    pub id: String,
    /// Operation type, e.g. `restore_purchases`.
    pub job_type: String,
    /// State machine position.
    pub status: JobStatus,
    /// JSON operation payload.
    pub payload: String,
    /// JSON result, set on completion.
    pub result: Option<String>,
    /// Failure description, set when the body errors.
    pub error: Option<String>,
    /// Caller-supplied deduplication token.
    pub idempotency_key: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Deserialize the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored payload is not valid JSON for `T`.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Fields for a job insert.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Pre-generated job id (UUID).
    pub id: String,
    /// Operation type.
    pub job_type: String,
    /// JSON operation payload.
    pub payload: String,
    /// Caller-supplied deduplication token.
    pub idempotency_key: String,
}
