//! Entitlement grant queries.
//!
//! The `(source, source_ref)` unique index on `entitlement_grants` is the
//! only concurrency-safety mechanism for grant creation: writers attempt the
//! insert, and a unique violation means another writer already holds the row.

use crate::error::Result;
use crate::store::{
    is_unique_violation, EntitlementGrant, EntitlementScope, GrantSource, GrantedEntitlement,
    NewGrant,
};
use chrono::Utc;
use sqlx::SqliteConnection;

/// Attempt to insert a grant, forcing constraint evaluation.
///
/// Returns `Ok(None)` when the `(source, source_ref)` uniqueness constraint
/// rejects the row; the caller re-reads the canonical row instead of
/// treating this as an error.
///
/// # Errors
///
/// Returns an error for any database failure other than the uniqueness
/// violation.
pub async fn try_insert(
    conn: &mut SqliteConnection,
    new: &NewGrant,
) -> Result<Option<EntitlementGrant>> {
    let result = sqlx::query_as::<_, EntitlementGrant>(
        r"
        INSERT INTO entitlement_grants
            (device_anon_id, user_id, entitlement_id, source, source_ref, granted_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id, device_anon_id, user_id, entitlement_id, source, source_ref,
                  granted_at, revoked_at
        ",
    )
    .bind(&new.device_anon_id)
    .bind(&new.user_id)
    .bind(new.entitlement_id)
    .bind(new.source)
    .bind(&new.source_ref)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await;

    match result {
        Ok(grant) => Ok(Some(grant)),
        Err(e) if is_unique_violation(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Load the canonical grant row for a provider transaction.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn by_source_ref(
    conn: &mut SqliteConnection,
    source: GrantSource,
    source_ref: &str,
) -> Result<Option<EntitlementGrant>> {
    let grant = sqlx::query_as::<_, EntitlementGrant>(
        r"
        SELECT id, device_anon_id, user_id, entitlement_id, source, source_ref,
               granted_at, revoked_at
        FROM entitlement_grants
        WHERE source = ? AND source_ref = ?
        ",
    )
    .bind(source)
    .bind(source_ref)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(grant)
}

/// Whether the device or the authenticated user holds a non-revoked grant
/// for an active entitlement with the given scope and reference.
///
/// A `NULL` user never matches `g.user_id = ?`, so unauthenticated callers
/// are resolved through the device id alone.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn owner_has_active(
    conn: &mut SqliteConnection,
    scope: EntitlementScope,
    ref_id: &str,
    device_anon_id: &str,
    user_id: Option<&str>,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r"
        SELECT COUNT(*)
        FROM entitlement_grants g
        JOIN entitlements e ON e.id = g.entitlement_id
        WHERE g.revoked_at IS NULL
          AND e.is_active = 1
          AND e.scope = ?
          AND e.ref_id = ?
          AND (g.device_anon_id = ? OR g.user_id = ?)
        ",
    )
    .bind(scope)
    .bind(ref_id)
    .bind(device_anon_id)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

/// List non-revoked grants visible to a device (and optional user), joined
/// with their entitlements, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn list_for_owner(
    conn: &mut SqliteConnection,
    device_anon_id: &str,
    user_id: Option<&str>,
) -> Result<Vec<GrantedEntitlement>> {
    let rows = sqlx::query_as::<_, GrantedEntitlement>(
        r"
        SELECT e.slug AS entitlement_slug, e.scope AS scope, e.ref_id AS ref_id,
               g.granted_at AS granted_at
        FROM entitlement_grants g
        JOIN entitlements e ON e.id = g.entitlement_id
        WHERE g.revoked_at IS NULL
          AND e.is_active = 1
          AND (g.device_anon_id = ? OR g.user_id = ?)
        ORDER BY g.granted_at DESC
        ",
    )
    .bind(device_anon_id)
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Revoke a grant. Admin-facing; the only grant mutation that exists.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn revoke(conn: &mut SqliteConnection, grant_id: i64) -> Result<()> {
    sqlx::query("UPDATE entitlement_grants SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
        .bind(Utc::now())
        .bind(grant_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
