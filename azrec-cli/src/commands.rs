use std::path::Path;

use anyhow::{Context, bail};
use azrec_core::future::Future;
use azrec_core::models::ResourceSku;
use azrec_core::scalesets::{ScaleSetSpec, validate};
use azrec_core::sku::{ResourceType, SkuCache, capabilities};
use serde::Deserialize;
use tabled::{Table, Tabled};
use tracing::info;

#[derive(Tabled)]
struct SkuRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "TYPE")]
    resource_type: String,
    #[tabled(rename = "VCPUS")]
    vcpus: String,
    #[tabled(rename = "MEMORY_GB")]
    memory_gb: String,
    #[tabled(rename = "ZONES")]
    zones: String,
    #[tabled(rename = "ACCEL_NET")]
    accelerated_networking: String,
}

impl SkuRow {
    fn new(sku: &ResourceSku, zones: Vec<String>) -> Self {
        let capability = |name: &str| sku.get_capability(name).unwrap_or("-").to_string();
        Self {
            name: sku.name.clone(),
            resource_type: sku.resource_type.clone(),
            vcpus: capability(capabilities::VCPUS),
            memory_gb: capability(capabilities::MEMORY_GB),
            zones: if zones.is_empty() {
                "-".to_string()
            } else {
                zones.join(",")
            },
            accelerated_networking: sku
                .has_capability(capabilities::ACCELERATED_NETWORKING)
                .to_string(),
        }
    }
}

#[derive(Tabled)]
struct FutureRow {
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "RESOURCE")]
    resource: String,
    #[tabled(rename = "POLL_AFTER")]
    poll_after: String,
}

impl From<&Future> for FutureRow {
    fn from(future: &Future) -> Self {
        Self {
            kind: future.kind.to_string(),
            service: future.service_name.clone(),
            resource: format!("{}/{}", future.resource_group, future.name),
            poll_after: future
                .poll_after_seconds
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Parse a resource type filter as accepted on the command line.
pub fn parse_resource_type(value: &str) -> anyhow::Result<ResourceType> {
    [
        ResourceType::VirtualMachines,
        ResourceType::AvailabilitySets,
        ResourceType::Disks,
    ]
    .into_iter()
    .find(|kind| kind.matches(value))
    .with_context(|| format!("unknown resource type '{}'", value))
}

/// Table of the cached SKUs, optionally limited to one resource type.
pub fn skus(cache: &SkuCache, resource_type: Option<ResourceType>) -> String {
    let mut rows: Vec<SkuRow> = cache
        .iter()
        .filter(|sku| resource_type.is_none_or(|kind| kind.matches(&sku.resource_type)))
        .map(|sku| {
            let zones = if ResourceType::VirtualMachines.matches(&sku.resource_type) {
                cache.get_zones_with_vm_size(&sku.name, cache.location())
            } else {
                Vec::new()
            };
            SkuRow::new(sku, zones)
        })
        .collect();
    if rows.is_empty() {
        return "No SKUs found".to_string();
    }
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Table::new(rows).to_string()
}

/// Zones of the cached location, or of one VM size in it.
pub fn zones(cache: &SkuCache, size: Option<&str>) -> String {
    let zones = match size {
        Some(size) => cache.get_zones_with_vm_size(size, cache.location()),
        None => cache.get_zones(cache.location()),
    };
    if zones.is_empty() {
        return "No zones".to_string();
    }
    zones.join("\n")
}

/// Validate the scale set spec in `spec_path` against the catalog.
pub async fn validate_spec(cache: &SkuCache, spec_path: &Path) -> anyhow::Result<String> {
    let raw = tokio::fs::read_to_string(spec_path)
        .await
        .with_context(|| format!("failed to read spec {}", spec_path.display()))?;
    let mut spec: ScaleSetSpec = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse spec {}", spec_path.display()))?;
    if spec.location.is_empty() {
        spec.location = cache.location().to_string();
    }
    if spec.size.is_empty() {
        bail!("spec {} does not name a VM size", spec_path.display());
    }

    let sku = cache.get(&spec.size, ResourceType::VirtualMachines)?;
    validate(&spec, sku, cache)?;
    info!(name = %spec.name, size = %spec.size, "Spec is valid");
    Ok(format!(
        "VMSS {} is valid: size {} in {}",
        spec.name, spec.size, spec.location
    ))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FutureFile {
    Many(Vec<Future>),
    One(Future),
}

/// Describe the Future (or list of Futures) in `path`, including the decoded
/// operation state.
pub async fn describe_futures(path: &Path) -> anyhow::Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let futures = match serde_json::from_str::<FutureFile>(&raw)
        .with_context(|| format!("failed to parse futures in {}", path.display()))?
    {
        FutureFile::Many(futures) => futures,
        FutureFile::One(future) => vec![future],
    };
    if futures.is_empty() {
        return Ok("No futures".to_string());
    }

    let mut out = Table::new(futures.iter().map(FutureRow::from)).to_string();
    for future in &futures {
        let state: serde_json::Value = future.decode_state().with_context(|| {
            format!(
                "failed to decode state of {} on {}/{}",
                future.kind, future.resource_group, future.name
            )
        })?;
        out.push_str(&format!(
            "\n\n{} {}/{}:\n{}",
            future.kind,
            future.resource_group,
            future.name,
            serde_json::to_string_pretty(&state)?
        ));
    }
    Ok(out)
}
