//! Access resolution for gated content.
//!
//! Answers "can this device/user see this city or tour" by combining free
//! SKUs, device-owned grants and user-owned grants. Ownership resolves
//! through either identifier, so a grant made while authenticated is
//! visible from any device of the same user.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::store::{grants, EntitlementScope, Store};
use serde::{Deserialize, Serialize};

/// References to resolve in a batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveRequest {
    /// City slugs whose POI content the client wants to show.
    #[serde(default)]
    pub poi_ids: Vec<String>,
    /// Tour ids.
    #[serde(default)]
    pub tour_ids: Vec<String>,
    /// Requesting device.
    pub device_anon_id: String,
    /// Authenticated user, when known.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Batch resolution: which SKUs still need purchase, which references are
/// already owned.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    /// SKU slugs the caller would have to buy.
    pub product_ids: Vec<String>,
    /// References already accessible (owned, or free).
    pub already_owned: Vec<String>,
}

/// Resolves access questions against grants and the catalog.
#[derive(Clone)]
pub struct AccessResolver {
    store: Store,
    catalog: Catalog,
}

impl AccessResolver {
    /// Create an access resolver.
    #[must_use]
    pub fn new(store: Store, catalog: Catalog) -> Self {
        Self { store, catalog }
    }

    /// Whether the caller can see the city's gated content (or, when
    /// `tour_id` is given, that tour).
    ///
    /// Free tour-scoped SKUs grant access unconditionally; otherwise a
    /// non-revoked grant for the city, then for the tour, is required.
    ///
    /// # Errors
    ///
    /// Returns an error if a database lookup fails.
    pub async fn has_access(
        &self,
        city: &str,
        device_anon_id: &str,
        user_id: Option<&str>,
        tour_id: Option<&str>,
    ) -> Result<bool> {
        if let Some(tour) = tour_id {
            if self.catalog.free_tour_exists(tour).await? {
                return Ok(true);
            }
        }

        let mut conn = self.store.pool().acquire().await?;
        if grants::owner_has_active(&mut conn, EntitlementScope::City, city, device_anon_id, user_id)
            .await?
        {
            return Ok(true);
        }
        if let Some(tour) = tour_id {
            return grants::owner_has_active(
                &mut conn,
                EntitlementScope::Tour,
                tour,
                device_anon_id,
                user_id,
            )
            .await;
        }
        Ok(false)
    }

    /// Partition a batch of references into "already owned" and "needs
    /// purchase". References with no matching active SKU are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a database lookup fails.
    pub async fn resolve_many(&self, request: &ResolveRequest) -> Result<Resolution> {
        let mut resolution = Resolution::default();
        let user_id = request.user_id.as_deref();

        // Catalog lookups finish before the grants connection is taken;
        // both draw from the same pool, so holding a connection across a
        // catalog call can exhaust it.
        let mut lookups = Vec::new();
        for city in &request.poi_ids {
            if let Some(sku) = self
                .catalog
                .by_scope_ref(EntitlementScope::City, city)
                .await?
            {
                lookups.push((EntitlementScope::City, city.clone(), sku));
            }
        }
        for tour in &request.tour_ids {
            if let Some(sku) = self
                .catalog
                .by_scope_ref(EntitlementScope::Tour, tour)
                .await?
            {
                lookups.push((EntitlementScope::Tour, tour.clone(), sku));
            }
        }

        let mut conn = self.store.pool().acquire().await?;
        for (scope, reference, sku) in lookups {
            if sku.is_free()
                || grants::owner_has_active(
                    &mut conn,
                    scope,
                    &reference,
                    &request.device_anon_id,
                    user_id,
                )
                .await?
            {
                resolution.already_owned.push(reference);
            } else {
                resolution.product_ids.push(sku.slug);
            }
        }

        Ok(resolution)
    }
}
