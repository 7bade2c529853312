//! SKU catalogs read from JSON files.
//!
//! Accepts either a bare array of SKUs or the ARM list response shape
//! (`{"value": [...]}`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use azrec_core::models::ResourceSku;
use azrec_core::sku::{ResourceSkuLister, SkuCache, SkuCacheRegistry};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Bare(Vec<ResourceSku>),
    List { value: Vec<ResourceSku> },
}

/// Lists SKUs from a catalog file.
pub struct FileSkuLister {
    path: PathBuf,
}

impl FileSkuLister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResourceSkuLister for FileSkuLister {
    async fn list(&self, location: &str) -> azrec_core::Result<Vec<ResourceSku>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            azrec_core::Error::internal(format!(
                "failed to read SKU catalog {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let skus = match serde_json::from_str(&raw)? {
            CatalogFile::Bare(skus) => skus,
            CatalogFile::List { value } => value,
        };
        let total = skus.len();
        let skus: Vec<ResourceSku> = skus
            .into_iter()
            .filter(|sku| offered_in(sku, location))
            .collect();
        debug!(location, total, kept = skus.len(), "Loaded SKU catalog");
        Ok(skus)
    }
}

/// SKUs without a location list are kept.
fn offered_in(sku: &ResourceSku, location: &str) -> bool {
    sku.locations.is_empty()
        || sku
            .locations
            .iter()
            .any(|l| l.eq_ignore_ascii_case(location))
}

/// Cache for `location` built from the catalog at `path`.
pub async fn load(
    registry: &SkuCacheRegistry,
    path: &Path,
    location: &str,
) -> anyhow::Result<Arc<SkuCache>> {
    let lister = FileSkuLister::new(path);
    Ok(registry.get_or_populate(location, &lister).await?)
}
