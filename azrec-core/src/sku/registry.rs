use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::Mutex;
use tracing::info;

use super::SkuCache;
use crate::error::Result;
use crate::models::ResourceSku;

/// Source of the SKU catalog for a location.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceSkuLister: Send + Sync {
    /// List every SKU offered in `location`.
    async fn list(&self, location: &str) -> Result<Vec<ResourceSku>>;
}

/// Location-keyed set of SKU caches shared by all reconciles.
///
/// A location is populated once; later requests share the same snapshot.
#[derive(Default)]
pub struct SkuCacheRegistry {
    caches: Mutex<HashMap<String, Arc<SkuCache>>>,
}

static GLOBAL: OnceLock<SkuCacheRegistry> = OnceLock::new();

impl SkuCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static SkuCacheRegistry {
        GLOBAL.get_or_init(SkuCacheRegistry::new)
    }

    /// Return the cache for `location`, listing it through `lister` on first use.
    pub async fn get_or_populate(
        &self,
        location: &str,
        lister: &dyn ResourceSkuLister,
    ) -> Result<Arc<SkuCache>> {
        let key = location.to_ascii_lowercase();
        let mut caches = self.caches.lock().await;
        if let Some(cache) = caches.get(&key) {
            return Ok(Arc::clone(cache));
        }

        let data = lister.list(location).await?;
        info!("Populated SKU cache for {} with {} entries", location, data.len());
        let cache = Arc::new(SkuCache::new(location, data));
        caches.insert(key, Arc::clone(&cache));
        Ok(cache)
    }

    /// Register an already built cache, replacing nothing that is present.
    pub async fn insert(&self, cache: SkuCache) -> Arc<SkuCache> {
        let key = cache.location().to_ascii_lowercase();
        let mut caches = self.caches.lock().await;
        Arc::clone(caches.entry(key).or_insert_with(|| Arc::new(cache)))
    }

    /// Cached snapshot of `location`, if populated.
    pub async fn get(&self, location: &str) -> Option<Arc<SkuCache>> {
        let caches = self.caches.lock().await;
        caches.get(&location.to_ascii_lowercase()).cloned()
    }
}
