//! Read-only entitlement catalog with an LRU lookup cache.
//!
//! Entitlements are maintained by external admin tooling and never written
//! by this core, which makes cached rows safe to serve for the process
//! lifetime. The cache avoids a catalog query on every verify/grant call
//! for popular SKUs.

use crate::error::{Error, Result};
use crate::store::{Entitlement, EntitlementScope, Store};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Default cache capacity. The whole catalog fits comfortably; the bound
/// exists so a misbehaving client cannot grow the map with unknown SKUs.
const DEFAULT_CACHE_CAPACITY: usize = 4_096;

/// Store SKUs shipped in old app builds, mapped to current catalog slugs.
/// Resolution falls back to this table when the product id is not a catalog
/// slug itself.
const LEGACY_SKU_ALIASES: &[(&str, &str)] = &[
    ("com.wowcities.city.spb.full", "city-saint-petersburg"),
    ("com.wowcities.city.msk.full", "city-moscow"),
    ("com.wowcities.tour.spb.hermitage", "tour-spb-hermitage"),
];

/// Catalog lookup statistics.
#[derive(Debug, Default, Clone)]
pub struct CatalogStats {
    /// Cache hits.
    pub hits: u64,
    /// Cache misses (catalog queried).
    pub misses: u64,
}

/// Read-only access to the entitlement catalog.
#[derive(Clone)]
pub struct Catalog {
    store: Store,
    cache: Arc<Mutex<LruCache<String, Entitlement>>>,
    stats: Arc<Mutex<CatalogStats>>,
}

impl Catalog {
    /// Create a catalog over the store with the default cache capacity.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_capacity(store, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a catalog with an explicit cache capacity.
    #[must_use]
    pub fn with_capacity(store: Store, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CatalogStats::default())),
        }
    }

    /// Resolve a store product id to an active entitlement.
    ///
    /// The product id is first tried as a catalog slug; store SKUs from old
    /// app builds resolve through [`LEGACY_SKU_ALIASES`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProduct`] when neither route matches an
    /// active entitlement, or a database error if the lookup fails.
    pub async fn resolve_product(&self, product_id: &str) -> Result<Entitlement> {
        if let Some(found) = self.by_slug(product_id).await? {
            return Ok(found);
        }
        if let Some((_, slug)) = LEGACY_SKU_ALIASES.iter().find(|(sku, _)| *sku == product_id) {
            debug!("Resolved legacy SKU {product_id} via alias {slug}");
            if let Some(found) = self.by_slug(slug).await? {
                return Ok(found);
            }
        }
        Err(Error::UnknownProduct(product_id.to_string()))
    }

    /// Look up an active entitlement by slug, through the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the database lookup fails.
    pub async fn by_slug(&self, slug: &str) -> Result<Option<Entitlement>> {
        if let Some(hit) = self.cache.lock().get(slug).cloned() {
            self.stats.lock().hits += 1;
            return Ok(Some(hit));
        }
        self.stats.lock().misses += 1;

        let found = sqlx::query_as::<_, Entitlement>(
            r"
            SELECT id, slug, scope, ref_id, price_amount, is_active
            FROM entitlements
            WHERE slug = ? AND is_active = 1
            ",
        )
        .bind(slug)
        .fetch_optional(self.store.pool())
        .await?;

        if let Some(ref entitlement) = found {
            self.cache
                .lock()
                .put(slug.to_string(), entitlement.clone());
        }
        Ok(found)
    }

    /// Look up an active entitlement by what it unlocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the database lookup fails.
    pub async fn by_scope_ref(
        &self,
        scope: EntitlementScope,
        ref_id: &str,
    ) -> Result<Option<Entitlement>> {
        let found = sqlx::query_as::<_, Entitlement>(
            r"
            SELECT id, slug, scope, ref_id, price_amount, is_active
            FROM entitlements
            WHERE scope = ? AND ref_id = ? AND is_active = 1
            ",
        )
        .bind(scope)
        .bind(ref_id)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(found)
    }

    /// Whether an active free (price 0) tour-scoped entitlement exists for
    /// the tour. Free content is never gated by ownership.
    ///
    /// # Errors
    ///
    /// Returns an error if the database lookup fails.
    pub async fn free_tour_exists(&self, tour_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM entitlements
            WHERE scope = 'tour' AND ref_id = ? AND price_amount = 0 AND is_active = 1
            ",
        )
        .bind(tour_id)
        .fetch_one(self.store.pool())
        .await?;
        Ok(count > 0)
    }

    /// Current lookup statistics.
    #[must_use]
    pub fn stats(&self) -> CatalogStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_catalog() -> Catalog {
        let store = Store::in_memory().await.expect("store");
        sqlx::query(
            r"
            INSERT INTO entitlements (slug, scope, ref_id, price_amount, is_active) VALUES
                ('city-saint-petersburg', 'city', 'saint-petersburg', 49900, 1),
                ('tour-spb-free-walk', 'tour', 'spb-free-walk', 0, 1),
                ('city-retired', 'city', 'retired', 9900, 0)
            ",
        )
        .execute(store.pool())
        .await
        .expect("seed");
        Catalog::new(store)
    }

    #[tokio::test]
    async fn resolves_slug_and_caches() {
        let catalog = seeded_catalog().await;

        let first = catalog
            .resolve_product("city-saint-petersburg")
            .await
            .expect("resolve");
        assert_eq!(first.ref_id, "saint-petersburg");

        let again = catalog
            .resolve_product("city-saint-petersburg")
            .await
            .expect("resolve");
        assert_eq!(again.id, first.id);

        let stats = catalog.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn resolves_legacy_store_sku() {
        let catalog = seeded_catalog().await;
        let found = catalog
            .resolve_product("com.wowcities.city.spb.full")
            .await
            .expect("resolve alias");
        assert_eq!(found.slug, "city-saint-petersburg");
    }

    #[tokio::test]
    async fn unknown_product_and_inactive_sku_fail() {
        let catalog = seeded_catalog().await;
        assert!(matches!(
            catalog.resolve_product("no-such-sku").await,
            Err(Error::UnknownProduct(_))
        ));
        assert!(matches!(
            catalog.resolve_product("city-retired").await,
            Err(Error::UnknownProduct(_))
        ));
    }

    #[tokio::test]
    async fn free_tour_lookup() {
        let catalog = seeded_catalog().await;
        assert!(catalog.free_tour_exists("spb-free-walk").await.expect("query"));
        assert!(!catalog.free_tour_exists("paid-tour").await.expect("query"));
    }
}
