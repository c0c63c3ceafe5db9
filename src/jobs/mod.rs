//! Durable async job ledger backed by an external push queue.
//!
//! Enqueue persists a PENDING job, then publishes its id to the queue; the
//! queue later POSTs a signed callback and the job body runs inline in that
//! request. The queue delivers at-least-once, so every transition here is
//! replay-safe: a callback on a non-PENDING job is a no-op.

pub mod restore;

pub use restore::{GooglePurchaseItem, RestorePayload, RestoreReport, RestoreWorker};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::store::{jobs, Job, JobStatus, NewJob, Store};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Job type executed by [`RestoreWorker`].
pub const JOB_RESTORE_PURCHASES: &str = "restore_purchases";

/// Sign a callback payload with the queue secret (hex HMAC-SHA256).
#[must_use]
pub fn sign_callback(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a callback signature. Constant-time comparison via the MAC.
///
/// # Errors
///
/// Returns [`Error::Unauthorized`] when the signature is malformed or does
/// not match.
pub fn verify_callback(secret: &str, payload: &[u8], signature_hex: &str) -> Result<()> {
    let signature = hex::decode(signature_hex)
        .map_err(|_| Error::Unauthorized("malformed callback signature".to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(payload);
    mac.verify_slice(&signature)
        .map_err(|_| Error::Unauthorized("callback signature mismatch".to_string()))
}

/// Push-queue publish seam.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a job id for later delivery to the callback endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the publish fails; the ledger then marks the job
    /// FAILED rather than leaving it silently PENDING.
    async fn publish(&self, job_id: &str) -> Result<()>;
}

/// HTTP push-queue client: POSTs the job id with an HMAC signature.
pub struct HttpJobQueue {
    http: reqwest::Client,
    publish_url: String,
    secret: String,
}

impl HttpJobQueue {
    /// Build a queue client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] when the publish URL or callback
    /// secret is absent.
    pub fn new(config: &QueueConfig) -> Result<Self> {
        let publish_url = config
            .publish_url
            .clone()
            .ok_or_else(|| Error::NotConfigured("queue publish_url is not configured".to_string()))?;
        let secret = config
            .callback_secret
            .clone()
            .ok_or_else(|| Error::NotConfigured("queue callback_secret is not configured".to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build queue HTTP client: {e}")))?;
        Ok(Self {
            http,
            publish_url,
            secret,
        })
    }
}

#[async_trait]
impl JobQueue for HttpJobQueue {
    async fn publish(&self, job_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "job_id": job_id,
            "signature": sign_callback(&self.secret, job_id.as_bytes()),
        });
        let response = self
            .http
            .post(&self.publish_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::QueuePublish(format!("queue publish request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::QueuePublish(format!(
                "queue publish returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Queue used when no push queue is configured. Every publish fails, so
/// enqueued jobs land in FAILED instead of sitting PENDING forever.
pub struct UnconfiguredQueue;

#[async_trait]
impl JobQueue for UnconfiguredQueue {
    async fn publish(&self, _job_id: &str) -> Result<()> {
        Err(Error::QueuePublish("push queue is not configured".to_string()))
    }
}

/// Executes a job body. Implementations are dispatched by `job_type`.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run the job and produce its JSON result.
    ///
    /// # Errors
    ///
    /// An error here marks the job FAILED; partial item failures inside a
    /// batch are data in the result, not errors.
    async fn run(&self, job: &Job) -> Result<serde_json::Value>;
}

/// How a queue callback was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAck {
    /// This delivery claimed the job and ran it to the given status.
    Executed {
        /// COMPLETED or FAILED.
        status: JobStatus,
    },
    /// Duplicate delivery; the job was already RUNNING or terminal.
    Duplicate,
}

/// Persists jobs and drives their state machine.
#[derive(Clone)]
pub struct JobLedger {
    store: Store,
    queue: Arc<dyn JobQueue>,
}

impl JobLedger {
    /// Create a ledger over the store and queue.
    #[must_use]
    pub fn new(store: Store, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Persist a job and publish it to the queue.
    ///
    /// A duplicate `idempotency_key` returns the existing job without a
    /// second publish. When the publish itself fails, the job is marked
    /// FAILED immediately and returned in that state.
    ///
    /// # Errors
    ///
    /// Returns a database error; publish failures are absorbed into the
    /// FAILED job state.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<Job> {
        let new = NewJob {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.to_string(),
            payload: serde_json::to_string(payload)?,
            idempotency_key: idempotency_key.to_string(),
        };

        let mut conn = self.store.pool().acquire().await?;
        let (job, created) = jobs::create(&mut conn, &new).await?;
        if !created {
            info!(
                "Enqueue for key {} matched existing job {}",
                idempotency_key, job.id
            );
            return Ok(job);
        }

        if let Err(e) = self.queue.publish(&job.id).await {
            error!("Failed to publish job {} to queue: {e}", job.id);
            jobs::fail(&mut conn, &job.id, &e.to_string()).await?;
            let failed = jobs::by_id(&mut conn, &job.id)
                .await?
                .ok_or_else(|| Error::Internal(format!("job {} vanished after fail", job.id)))?;
            return Ok(failed);
        }

        info!("Enqueued job {} ({job_type})", job.id);
        Ok(job)
    }

    /// Load a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] when no such job exists.
    pub async fn job(&self, job_id: &str) -> Result<Job> {
        let mut conn = self.store.pool().acquire().await?;
        jobs::by_id(&mut conn, job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Handle an authenticated queue callback for a job.
    ///
    /// A missing job is a 404-level error (lost or malformed id). A job that
    /// is already RUNNING or terminal makes this delivery a duplicate and a
    /// no-op. Otherwise the job transitions PENDING -> RUNNING, the body
    /// executes inline, and the job finishes COMPLETED or FAILED.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] or a database error. Body failures do
    /// not propagate; they are recorded in the job's FAILED state.
    pub async fn handle_callback(&self, job_id: &str, runner: &dyn JobRunner) -> Result<CallbackAck> {
        let mut conn = self.store.pool().acquire().await?;
        let job = jobs::by_id(&mut conn, job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        if !jobs::claim(&mut conn, &job.id).await? {
            warn!(
                "Duplicate callback for job {} (status {:?})",
                job.id, job.status
            );
            return Ok(CallbackAck::Duplicate);
        }
        drop(conn);

        let status = match runner.run(&job).await {
            Ok(result) => {
                let mut conn = self.store.pool().acquire().await?;
                jobs::complete(&mut conn, &job.id, &serde_json::to_string(&result)?).await?;
                JobStatus::Completed
            }
            Err(e) => {
                warn!("Job {} failed: {e}", job.id);
                let mut conn = self.store.pool().acquire().await?;
                jobs::fail(&mut conn, &job.id, &e.to_string()).await?;
                JobStatus::Failed
            }
        };

        info!("Job {} finished as {:?}", job.id, status);
        Ok(CallbackAck::Executed { status })
    }
}
