//! Billing endpoint handlers.

use crate::error::Error;
use crate::http::{ApiError, AppState};
use crate::jobs::{self, GooglePurchaseItem, RestorePayload, JOB_RESTORE_PURCHASES};
use crate::store::{grants, GrantSource, GrantedEntitlement, Job};
use crate::verify::{Environment, Verification};
use crate::webhook::{self, YookassaEvent};
use crate::access::{Resolution, ResolveRequest};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Header carrying the YooKassa shared secret.
const YOOKASSA_SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Header carrying the queue callback HMAC.
const QUEUE_SIGNATURE_HEADER: &str = "x-queue-signature";

#[derive(Debug, Deserialize)]
pub(super) struct AppleVerifyRequest {
    receipt: String,
    product_id: String,
    /// Accepted from clients; deduplication runs on the provider
    /// transaction id, not this key.
    #[serde(rename = "idempotency_key")]
    _idempotency_key: String,
    device_anon_id: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GoogleVerifyRequest {
    package_name: String,
    product_id: String,
    purchase_token: String,
    /// Accepted from clients; deduplication runs on the provider
    /// transaction id, not this key.
    #[serde(rename = "idempotency_key")]
    _idempotency_key: String,
    device_anon_id: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct VerifyResponse {
    verified: bool,
    granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    entitlement_grant_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_id: Option<String>,
    environment: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    trace_id: String,
}

impl VerifyResponse {
    fn rejected(verification: &Verification, trace_id: String) -> Self {
        Self {
            verified: false,
            granted: false,
            entitlement_grant_id: None,
            order_id: None,
            environment: verification.environment.as_str(),
            error: verification.error.clone(),
            trace_id,
        }
    }
}

/// `POST /billing/apple/verify`
pub(super) async fn apple_verify(
    State(state): State<AppState>,
    Json(request): Json<AppleVerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let trace_id = Uuid::new_v4().to_string();
    debug!(
        "Apple verify for product {} (trace {trace_id})",
        request.product_id
    );

    let verification = state
        .apple
        .verify(&request.receipt, &request.product_id)
        .await?;
    if !verification.verified {
        return Ok(Json(VerifyResponse::rejected(&verification, trace_id)));
    }

    // Sandbox proof is only honored when explicitly enabled.
    if verification.environment == Environment::Sandbox && !state.config.apple.accept_sandbox {
        return Ok(Json(VerifyResponse {
            verified: true,
            granted: false,
            entitlement_grant_id: None,
            order_id: verification.transaction_id,
            environment: verification.environment.as_str(),
            error: Some("sandbox receipts not accepted".to_string()),
            trace_id,
        }));
    }

    let transaction_id = verification.transaction_id.clone().ok_or_else(|| {
        ApiError::Internal(Error::Provider(
            "Apple verification carried no transaction id".to_string(),
        ))
    })?;

    let outcome = state
        .grants
        .grant(
            GrantSource::Apple,
            &transaction_id,
            &request.product_id,
            &request.device_anon_id,
            request.user_id.as_deref(),
            &trace_id,
        )
        .await?;

    Ok(Json(VerifyResponse {
        verified: true,
        granted: true,
        entitlement_grant_id: Some(outcome.grant.id),
        order_id: Some(transaction_id),
        environment: verification.environment.as_str(),
        error: None,
        trace_id,
    }))
}

/// `POST /billing/google/verify`
pub(super) async fn google_verify(
    State(state): State<AppState>,
    Json(request): Json<GoogleVerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let trace_id = Uuid::new_v4().to_string();
    debug!(
        "Google verify for product {} (trace {trace_id})",
        request.product_id
    );

    let verification = state
        .google
        .verify(
            &request.package_name,
            &request.product_id,
            &request.purchase_token,
        )
        .await?;
    if !verification.verified {
        return Ok(Json(VerifyResponse::rejected(&verification, trace_id)));
    }

    let source_ref = verification
        .transaction_id
        .clone()
        .unwrap_or_else(|| request.purchase_token.clone());

    let outcome = state
        .grants
        .grant(
            GrantSource::Google,
            &source_ref,
            &request.product_id,
            &request.device_anon_id,
            request.user_id.as_deref(),
            &trace_id,
        )
        .await?;

    Ok(Json(VerifyResponse {
        verified: true,
        granted: true,
        entitlement_grant_id: Some(outcome.grant.id),
        order_id: verification.transaction_id,
        environment: verification.environment.as_str(),
        error: None,
        trace_id,
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct RestoreRequest {
    platform: String,
    idempotency_key: String,
    device_anon_id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    apple_receipt: Option<String>,
    #[serde(default)]
    package_name: Option<String>,
    #[serde(default)]
    google_purchases: Option<Vec<GooglePurchaseItem>>,
    // Legacy single-purchase shape, normalized into a one-item batch.
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    purchase_token: Option<String>,
}

impl RestoreRequest {
    fn into_payload(self) -> Result<RestorePayload, ApiError> {
        match self.platform.as_str() {
            "apple" => {
                let receipt = self.apple_receipt.ok_or_else(|| {
                    ApiError::BadRequest("apple_receipt is required for platform apple".to_string())
                })?;
                Ok(RestorePayload::Apple {
                    device_anon_id: self.device_anon_id,
                    user_id: self.user_id,
                    receipt,
                })
            }
            "google" => {
                let package_name = self.package_name.ok_or_else(|| {
                    ApiError::BadRequest("package_name is required for platform google".to_string())
                })?;
                let purchases = match (self.google_purchases, self.product_id, self.purchase_token)
                {
                    (Some(batch), _, _) if !batch.is_empty() => batch,
                    (_, Some(product_id), Some(purchase_token)) => vec![GooglePurchaseItem {
                        product_id,
                        purchase_token,
                    }],
                    _ => {
                        return Err(ApiError::BadRequest(
                            "google_purchases (or product_id + purchase_token) is required"
                                .to_string(),
                        ))
                    }
                };
                Ok(RestorePayload::Google {
                    device_anon_id: self.device_anon_id,
                    user_id: self.user_id,
                    package_name,
                    purchases,
                })
            }
            other => Err(ApiError::BadRequest(format!("unknown platform {other}"))),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct EnqueueResponse {
    job_id: String,
    status: crate::store::JobStatus,
}

/// `POST /billing/restore`
pub(super) async fn restore_enqueue(
    State(state): State<AppState>,
    Json(request): Json<RestoreRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let idempotency_key = request.idempotency_key.clone();
    let payload = request.into_payload()?;
    let payload = serde_json::to_value(&payload).map_err(Error::from)?;

    let job = state
        .ledger
        .enqueue(JOB_RESTORE_PURCHASES, &payload, &idempotency_key)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub(super) struct JobStatusResponse {
    status: crate::store::JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        let result = job
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            status: job.status,
            result,
            last_error: job.error,
        }
    }
}

/// `GET /billing/restore/{job_id}`
pub(super) async fn restore_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.ledger.job(&job_id).await?;
    Ok(Json(job.into()))
}

#[derive(Debug, Deserialize)]
pub(super) struct EntitlementsQuery {
    device_anon_id: String,
    #[serde(default)]
    user_id: Option<String>,
}

/// `GET /billing/entitlements?device_anon_id=...`
pub(super) async fn list_entitlements(
    State(state): State<AppState>,
    Query(query): Query<EntitlementsQuery>,
) -> Result<Json<Vec<GrantedEntitlement>>, ApiError> {
    let mut conn = state.store.pool().acquire().await.map_err(Error::from)?;
    let listed = grants::list_for_owner(
        &mut conn,
        &query.device_anon_id,
        query.user_id.as_deref(),
    )
    .await?;
    Ok(Json(listed))
}

/// `POST /billing/batch-purchase`
pub(super) async fn batch_purchase(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<Resolution>, ApiError> {
    let resolution = state.access.resolve_many(&request).await?;
    Ok(Json(resolution))
}

#[derive(Debug, Serialize)]
pub(super) struct AckResponse {
    status: String,
}

/// `POST /v1/billing/yookassa/webhook`
pub(super) async fn yookassa_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<YookassaEvent>,
) -> Result<Json<AckResponse>, ApiError> {
    let signature = headers
        .get(YOOKASSA_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    webhook::authorize(&state.config.yookassa, signature)?;

    let trace_id = Uuid::new_v4().to_string();
    let ack = state.webhook.handle_event(&event, &trace_id).await?;
    Ok(Json(AckResponse {
        status: ack.status().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    job_id: String,
}

/// `POST /v1/billing/jobs/callback`
///
/// Signature covers the raw body, so the body is taken as bytes and parsed
/// after verification.
pub(super) async fn jobs_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AckResponse>, ApiError> {
    let secret = state.config.queue.callback_secret.as_deref().ok_or_else(|| {
        ApiError::Internal(Error::NotConfigured(
            "queue callback_secret is not configured".to_string(),
        ))
    })?;
    let signature = headers
        .get(QUEUE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::Internal(Error::Unauthorized("missing callback signature".to_string()))
        })?;
    jobs::verify_callback(secret, &body, signature)?;

    let callback: CallbackBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid callback body: {e}")))?;

    let ack = state
        .ledger
        .handle_callback(&callback.job_id, state.restore.as_ref())
        .await?;

    let status = match ack {
        crate::jobs::CallbackAck::Executed { status } => status.as_str().to_string(),
        crate::jobs::CallbackAck::Duplicate => "DUPLICATE".to_string(),
    };
    Ok(Json(AckResponse { status }))
}
