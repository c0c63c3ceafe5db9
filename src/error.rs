//! Error types for citygate.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by citygate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network/timeout/5xx failure talking to a payment provider.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The provider rejected the submitted proof of purchase.
    #[error("Invalid receipt: {0}")]
    InvalidReceipt(String),

    /// The product id does not map to any known entitlement SKU.
    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    /// Signature or shared-secret check failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A required secret/credential is absent from the deployment config.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// No job exists for the given id.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Publishing a job to the push queue failed.
    #[error("Queue publish failed: {0}")]
    QueuePublish(String),

    /// Invariant violation that should not occur under correct constraint
    /// enforcement.
    #[error("Internal error: {0}")]
    Internal(String),
}
