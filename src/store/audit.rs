//! Append-only audit log.
//!
//! Entries are write-once; this module offers no update or delete path.

use crate::error::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqliteConnection};

/// Audit action written when a new grant is persisted.
pub const ENTITLEMENT_GRANTED: &str = "ENTITLEMENT_GRANTED";

/// Audit action written when a YooKassa payment settles an intent.
pub const PAYMENT_SUCCEEDED: &str = "PAYMENT_SUCCEEDED";

/// One audit entry.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEntry {
    /// Row id.
    pub id: i64,
    /// What happened.
    pub action: String,
    /// Row/entity the action applies to.
    pub target_id: String,
    /// Hashed actor identity.
    pub actor_fingerprint: String,
    /// Request trace id.
    pub trace_id: String,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

/// Derive a short stable fingerprint from an actor identifier. Raw device
/// ids never land in the audit log.
#[must_use]
pub fn fingerprint(actor: &str) -> String {
    let digest = Sha256::digest(actor.as_bytes());
    hex::encode(&digest[..8])
}

/// Append an audit entry.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub async fn append(
    conn: &mut SqliteConnection,
    action: &str,
    target_id: &str,
    actor: &str,
    trace_id: &str,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO audit_log (action, target_id, actor_fingerprint, trace_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        ",
    )
    .bind(action)
    .bind(target_id)
    .bind(fingerprint(actor))
    .bind(trace_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// List entries for a target, oldest first. Diagnostic/test helper.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn for_target(conn: &mut SqliteConnection, target_id: &str) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query_as::<_, AuditEntry>(
        r"
        SELECT id, action, target_id, actor_fingerprint, trace_id, created_at
        FROM audit_log
        WHERE target_id = ?
        ORDER BY id ASC
        ",
    )
    .bind(target_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
