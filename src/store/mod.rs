//! SQLite persistence layer.
//!
//! All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) to avoid a
//! compile-time database requirement. Query functions take a
//! `&mut SqliteConnection` so callers can compose them inside one
//! transaction; [`Store`] wraps the pool for single-statement use.

mod models;

pub mod audit;
pub mod grants;
pub mod intents;
pub mod jobs;

pub use models::{
    Entitlement, EntitlementGrant, EntitlementScope, GrantSource, GrantedEntitlement,
    IntentStatus, Job, JobStatus, NewGrant, NewIntent, NewJob, NewPurchase, Purchase,
    PurchaseIntent,
};

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Schema statements, executed in order on startup. `IF NOT EXISTS` keeps
/// them re-runnable.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS entitlements (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        slug         TEXT NOT NULL UNIQUE,
        scope        TEXT NOT NULL CHECK (scope IN ('city', 'tour')),
        ref_id       TEXT NOT NULL,
        price_amount INTEGER NOT NULL DEFAULT 0,
        is_active    INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS entitlement_grants (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        device_anon_id TEXT NOT NULL,
        user_id        TEXT,
        entitlement_id INTEGER NOT NULL REFERENCES entitlements(id),
        source         TEXT NOT NULL,
        source_ref     TEXT NOT NULL,
        granted_at     TEXT NOT NULL,
        revoked_at     TEXT,
        UNIQUE (source, source_ref)
    )",
    "CREATE INDEX IF NOT EXISTS idx_grants_device ON entitlement_grants(device_anon_id)",
    "CREATE INDEX IF NOT EXISTS idx_grants_user ON entitlement_grants(user_id)",
    "CREATE TABLE IF NOT EXISTS purchase_intents (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        city_slug       TEXT,
        tour_id         TEXT,
        device_anon_id  TEXT NOT NULL,
        platform        TEXT NOT NULL,
        status          TEXT NOT NULL DEFAULT 'PENDING',
        idempotency_key TEXT NOT NULL UNIQUE,
        created_at      TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS purchases (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        intent_id            INTEGER NOT NULL UNIQUE REFERENCES purchase_intents(id),
        store                TEXT NOT NULL,
        store_transaction_id TEXT NOT NULL,
        status               TEXT NOT NULL,
        created_at           TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS jobs (
        id              TEXT PRIMARY KEY,
        job_type        TEXT NOT NULL,
        status          TEXT NOT NULL DEFAULT 'PENDING',
        payload         TEXT NOT NULL,
        result          TEXT,
        error           TEXT,
        idempotency_key TEXT NOT NULL UNIQUE,
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS audit_log (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        action            TEXT NOT NULL,
        target_id         TEXT NOT NULL,
        actor_fingerprint TEXT NOT NULL,
        trace_id          TEXT NOT NULL,
        created_at        TEXT NOT NULL
    )",
];

/// Handle to the citygate database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the database at `url` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema application fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(crate::Error::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Store connected ({url})");
        Ok(store)
    }

    /// Open an in-memory database with the schema applied. Test helper; a
    /// single connection keeps every handle on the same memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply schema statements.
    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// True when the error is a uniqueness-constraint violation, the signal the
/// grant and job paths recover from rather than surface.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
