//! Purchase intent and purchase queries (legacy direct-purchase flow).

use crate::error::Result;
use crate::store::{is_unique_violation, IntentStatus, NewIntent, NewPurchase, Purchase, PurchaseIntent};
use chrono::Utc;
use sqlx::SqliteConnection;

const INTENT_COLUMNS: &str =
    "id, city_slug, tour_id, device_anon_id, platform, status, idempotency_key, created_at";

/// Create a purchase intent. A duplicate `idempotency_key` returns the
/// existing intent instead of creating another.
///
/// # Errors
///
/// Returns an error if the insert fails for any other reason, or if the
/// conflicting row cannot be re-read.
pub async fn create(conn: &mut SqliteConnection, new: &NewIntent) -> Result<PurchaseIntent> {
    let result = sqlx::query_as::<_, PurchaseIntent>(&format!(
        r"
        INSERT INTO purchase_intents
            (city_slug, tour_id, device_anon_id, platform, status, idempotency_key, created_at)
        VALUES (?, ?, ?, ?, 'PENDING', ?, ?)
        RETURNING {INTENT_COLUMNS}
        "
    ))
    .bind(&new.city_slug)
    .bind(&new.tour_id)
    .bind(&new.device_anon_id)
    .bind(&new.platform)
    .bind(&new.idempotency_key)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await;

    match result {
        Ok(intent) => Ok(intent),
        Err(e) if is_unique_violation(&e) => {
            by_idempotency_key(conn, &new.idempotency_key)
                .await?
                .ok_or_else(|| {
                    crate::Error::Internal(format!(
                        "intent conflict for idempotency key {} but no row found",
                        new.idempotency_key
                    ))
                })
        }
        Err(e) => Err(e.into()),
    }
}

/// Load an intent by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<PurchaseIntent>> {
    let intent = sqlx::query_as::<_, PurchaseIntent>(&format!(
        "SELECT {INTENT_COLUMNS} FROM purchase_intents WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(intent)
}

/// Load an intent by idempotency key.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn by_idempotency_key(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Option<PurchaseIntent>> {
    let intent = sqlx::query_as::<_, PurchaseIntent>(&format!(
        "SELECT {INTENT_COLUMNS} FROM purchase_intents WHERE idempotency_key = ?"
    ))
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(intent)
}

/// Move a PENDING intent to a terminal status. Terminal intents are final;
/// the conditional update makes replays a no-op.
///
/// Returns `true` when this call performed the transition.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn finish(
    conn: &mut SqliteConnection,
    id: i64,
    status: IntentStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE purchase_intents SET status = ? WHERE id = ? AND status = 'PENDING'")
        .bind(status)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Record the completed payment for an intent. One-to-one with the intent;
/// immutable once written.
///
/// # Errors
///
/// Returns an error if the insert fails (including a second purchase for the
/// same intent).
pub async fn insert_purchase(conn: &mut SqliteConnection, new: &NewPurchase) -> Result<Purchase> {
    let purchase = sqlx::query_as::<_, Purchase>(
        r"
        INSERT INTO purchases (intent_id, store, store_transaction_id, status, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id, intent_id, store, store_transaction_id, status, created_at
        ",
    )
    .bind(new.intent_id)
    .bind(&new.store)
    .bind(&new.store_transaction_id)
    .bind(&new.status)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;
    Ok(purchase)
}

/// Count purchases for an intent. Test/diagnostic helper.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn purchase_count(conn: &mut SqliteConnection, intent_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM purchases WHERE intent_id = ?")
        .bind(intent_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
