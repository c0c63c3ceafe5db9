//! Payment provider verification adapters.
//!
//! Stateless wrappers around the Apple and Google verification APIs that
//! normalize heterogeneous provider responses into one [`Verification`]
//! shape. Adapters never retry (beyond Apple's documented single sandbox
//! fallback) and never write state; granting is the caller's job.

mod apple;
mod google;

pub use apple::AppleVerifyClient;
pub use google::{
    GoogleVerifyClient, ServiceAccountKey, ServiceAccountTokenSource, TokenSource,
    UnconfiguredTokenSource,
};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Store environment a proof was verified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    /// Live store.
    Production,
    /// Apple test environment; reached via the 21007 fallback.
    Sandbox,
}

impl Environment {
    /// Canonical string form, as reported to clients.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Production => "Production",
            Environment::Sandbox => "Sandbox",
        }
    }
}

/// Normalized outcome of a provider verification call.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    /// Whether the provider confirmed the purchase.
    pub verified: bool,
    /// Provider transaction id, when verified.
    pub transaction_id: Option<String>,
    /// Apple original transaction id, when present in the receipt.
    pub original_transaction_id: Option<String>,
    /// Environment the proof was checked against.
    pub environment: Environment,
    /// Failure detail when not verified.
    pub error: Option<String>,
}

impl Verification {
    /// A failed verification with an explanatory message.
    #[must_use]
    pub fn rejected(environment: Environment, error: impl Into<String>) -> Self {
        Self {
            verified: false,
            transaction_id: None,
            original_transaction_id: None,
            environment,
            error: Some(error.into()),
        }
    }
}

/// One in-app transaction extracted from an Apple receipt.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptTransaction {
    /// Product the transaction purchased.
    pub product_id: String,
    /// Transaction id.
    pub transaction_id: String,
    /// Original transaction id (stable across Apple restores).
    pub original_transaction_id: Option<String>,
}

/// Apple receipt verification seam.
#[async_trait]
pub trait AppleReceiptVerifier: Send + Sync {
    /// Verify a receipt and select the first transaction matching
    /// `product_id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Provider`] on network/timeout/5xx failures.
    /// Provider rejections are reported as `verified = false`, not errors.
    async fn verify(&self, receipt: &str, product_id: &str) -> Result<Verification>;

    /// Verify a receipt and return every in-app transaction it contains,
    /// for restore flows.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Provider`] on network failures and
    /// [`crate::Error::InvalidReceipt`] when the receipt itself is rejected.
    async fn list_transactions(
        &self,
        receipt: &str,
    ) -> Result<(Environment, Vec<ReceiptTransaction>)>;
}

/// Google Play purchase verification seam.
#[async_trait]
pub trait GooglePurchaseVerifier: Send + Sync {
    /// Verify a purchase token for a product via the Play Developer API.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Provider`] on network/timeout/5xx failures.
    async fn verify(
        &self,
        package_name: &str,
        product_id: &str,
        token: &str,
    ) -> Result<Verification>;
}
