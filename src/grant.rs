//! Idempotent, race-safe grant creation.
//!
//! Concurrent or retried calls with the same `(source, source_ref)` always
//! converge on the same grant row: the insert forces evaluation of the
//! uniqueness constraint, and a detected conflict is resolved by re-reading
//! the canonical row. No locks, no in-process coordination.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::store::{audit, grants, EntitlementGrant, GrantSource, NewGrant, Store};
use tracing::{error, info};

/// Outcome of a grant attempt.
#[derive(Debug, Clone)]
pub struct GrantOutcome {
    /// The canonical grant row for `(source, source_ref)`.
    pub grant: EntitlementGrant,
    /// Whether this call created the row. Losers of a race and retries get
    /// `false` with the winner's row.
    pub is_new: bool,
}

/// Turns verified transactions into persisted entitlement grants.
#[derive(Clone)]
pub struct GrantService {
    store: Store,
    catalog: Catalog,
}

impl GrantService {
    /// Create a grant service.
    #[must_use]
    pub fn new(store: Store, catalog: Catalog) -> Self {
        Self { store, catalog }
    }

    /// Persist a grant for a verified provider transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProduct`] when `product_id` resolves to no
    /// active SKU, or a database error. A uniqueness conflict is not an
    /// error; it resolves to the existing grant with `is_new = false`.
    pub async fn grant(
        &self,
        source: GrantSource,
        source_ref: &str,
        product_id: &str,
        device_anon_id: &str,
        user_id: Option<&str>,
        trace_id: &str,
    ) -> Result<GrantOutcome> {
        let entitlement = self.catalog.resolve_product(product_id).await?;

        let new = NewGrant {
            device_anon_id: device_anon_id.to_string(),
            user_id: user_id.map(str::to_string),
            entitlement_id: entitlement.id,
            source,
            source_ref: source_ref.to_string(),
        };

        let mut tx = self.store.pool().begin().await?;
        if let Some(grant) = grants::try_insert(&mut *tx, &new).await? {
            audit::append(
                &mut *tx,
                audit::ENTITLEMENT_GRANTED,
                &grant.id.to_string(),
                device_anon_id,
                trace_id,
            )
            .await?;
            tx.commit().await?;
            info!(
                "Granted {} to device {} via {:?}/{} (grant {})",
                entitlement.slug,
                audit::fingerprint(device_anon_id),
                source,
                source_ref,
                grant.id
            );
            return Ok(GrantOutcome {
                grant,
                is_new: true,
            });
        }
        // Conflict: another call already holds the row. Abort this write and
        // read the canonical grant outside the failed transaction.
        tx.rollback().await?;

        let mut conn = self.store.pool().acquire().await?;
        let Some(existing) = grants::by_source_ref(&mut conn, source, source_ref).await? else {
            // Uniqueness said the row exists but the re-read found nothing;
            // constraint enforcement is broken if this ever fires.
            error!(
                "Grant conflict for {:?}/{} but no canonical row found",
                source, source_ref
            );
            return Err(Error::Internal(format!(
                "grant conflict for {source:?}/{source_ref} with no matching row"
            )));
        };

        Ok(GrantOutcome {
            grant: existing,
            is_new: false,
        })
    }
}
