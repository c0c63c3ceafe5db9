//! HTTP surface: axum router, shared state and error mapping.

mod billing;

use crate::access::AccessResolver;
use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::error::Error;
use crate::grant::GrantService;
use crate::jobs::{JobLedger, RestoreWorker};
use crate::store::Store;
use crate::verify::{AppleReceiptVerifier, GooglePurchaseVerifier};
use crate::webhook::WebhookHandler;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state, cloned per request. All mutability lives in
/// the database; everything here is a handle.
#[derive(Clone)]
pub struct AppState {
    /// Store handle.
    pub store: Store,
    /// Entitlement catalog.
    pub catalog: Catalog,
    /// Grant creation service.
    pub grants: GrantService,
    /// Access resolution service.
    pub access: AccessResolver,
    /// Async job ledger.
    pub ledger: JobLedger,
    /// YooKassa webhook handler.
    pub webhook: WebhookHandler,
    /// Restore batch worker, run inline on queue callbacks.
    pub restore: Arc<RestoreWorker>,
    /// Apple verification adapter.
    pub apple: Arc<dyn AppleReceiptVerifier>,
    /// Google verification adapter.
    pub google: Arc<dyn GooglePurchaseVerifier>,
    /// Service configuration.
    pub config: Arc<AppConfig>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/billing/apple/verify", post(billing::apple_verify))
        .route("/billing/google/verify", post(billing::google_verify))
        .route("/billing/restore", post(billing::restore_enqueue))
        .route("/billing/restore/:job_id", get(billing::restore_status))
        .route("/billing/entitlements", get(billing::list_entitlements))
        .route("/billing/batch-purchase", post(billing::batch_purchase))
        .route("/v1/billing/yookassa/webhook", post(billing::yookassa_webhook))
        .route("/v1/billing/jobs/callback", post(billing::jobs_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error shape surfaced to HTTP callers.
#[derive(Debug)]
pub enum ApiError {
    /// Request shape/content is invalid.
    BadRequest(String),
    /// Domain or infrastructure error, mapped by variant.
    Internal(Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Internal(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(err) => match err {
                Error::UnknownProduct(_) => StatusCode::UNPROCESSABLE_ENTITY,
                Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                Error::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                Error::JobNotFound(_) => StatusCode::NOT_FOUND,
                Error::Provider(_) | Error::InvalidReceipt(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Internal(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.message() }));
        (status, body).into_response()
    }
}
