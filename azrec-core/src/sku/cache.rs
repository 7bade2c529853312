use std::collections::BTreeSet;

use tracing::debug;

use super::ResourceType;
use crate::error::{Error, Result};
use crate::models::{ResourceSku, ResourceSkuRestrictionsType};

/// SKU snapshot of a single location.
#[derive(Debug, Clone, Default)]
pub struct SkuCache {
    location: String,
    data: Vec<ResourceSku>,
}

impl SkuCache {
    pub fn new(location: impl Into<String>, data: Vec<ResourceSku>) -> Self {
        Self {
            location: location.into(),
            data,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceSku> {
        self.data.iter()
    }

    /// Look up a SKU by name and category.
    ///
    /// A missing SKU is terminal: a misspelled size does not appear by retrying.
    pub fn get(&self, name: &str, kind: ResourceType) -> Result<&ResourceSku> {
        self.data
            .iter()
            .find(|sku| sku.name == name && kind.matches(&sku.resource_type))
            .ok_or_else(|| {
                Error::terminal(format!(
                    "reconcile error that cannot be recovered occurred: resource sku with name '{}' and category '{}' not found in location '{}'",
                    name, kind, self.location
                ))
            })
    }

    /// Zones in which any virtual machine size is offered in `location`.
    pub fn get_zones(&self, location: &str) -> Vec<String> {
        let mut zones = BTreeSet::new();
        for sku in self
            .data
            .iter()
            .filter(|sku| ResourceType::VirtualMachines.matches(&sku.resource_type))
        {
            zones.extend(available_zones(sku, location));
        }
        debug!(location, count = zones.len(), "Resolved availability zones");
        zones.into_iter().collect()
    }

    /// Zones in which the VM size `size` is offered in `location`.
    pub fn get_zones_with_vm_size(&self, size: &str, location: &str) -> Vec<String> {
        let mut zones = BTreeSet::new();
        for sku in self.data.iter().filter(|sku| {
            sku.name.eq_ignore_ascii_case(size)
                && ResourceType::VirtualMachines.matches(&sku.resource_type)
        }) {
            zones.extend(available_zones(sku, location));
        }
        zones.into_iter().collect()
    }
}

/// Zones of `sku` in `location` with restrictions applied.
///
/// A location restriction hides the whole location; a zone restriction hides
/// the zones it names.
fn available_zones(sku: &ResourceSku, location: &str) -> Vec<String> {
    let mut restricted_zones = BTreeSet::new();
    for restriction in &sku.restrictions {
        let applies = restriction
            .restriction_info
            .locations
            .iter()
            .chain(restriction.values.iter())
            .any(|l| l.eq_ignore_ascii_case(location));
        if !applies {
            continue;
        }
        match restriction.kind {
            ResourceSkuRestrictionsType::Location => return Vec::new(),
            ResourceSkuRestrictionsType::Zone => {
                restricted_zones.extend(restriction.restriction_info.zones.iter().cloned());
            }
        }
    }

    sku.location_info
        .iter()
        .filter(|info| info.location.eq_ignore_ascii_case(location))
        .flat_map(|info| info.zones.iter())
        .filter(|zone| !restricted_zones.contains(*zone))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ResourceSkuLocationInfo, ResourceSkuRestrictionInfo, ResourceSkuRestrictions,
    };

    fn make_sku(name: &str, resource_type: &str, zones: &[&str]) -> ResourceSku {
        ResourceSku {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            locations: vec!["westeurope".to_string()],
            location_info: vec![ResourceSkuLocationInfo {
                location: "westeurope".to_string(),
                zones: zones.iter().map(|z| z.to_string()).collect(),
                zone_details: Vec::new(),
            }],
            ..Default::default()
        }
    }

    fn restriction(kind: ResourceSkuRestrictionsType, zones: &[&str]) -> ResourceSkuRestrictions {
        ResourceSkuRestrictions {
            kind,
            values: vec!["westeurope".to_string()],
            restriction_info: ResourceSkuRestrictionInfo {
                locations: vec!["westeurope".to_string()],
                zones: zones.iter().map(|z| z.to_string()).collect(),
            },
            reason_code: Some("NotAvailableForSubscription".to_string()),
        }
    }

    #[test]
    fn test_get_unknown_sku_is_terminal() {
        let cache = SkuCache::new("westeurope", vec![make_sku("Standard_D2s_v3", "virtualMachines", &["1"])]);

        assert!(cache.get("Standard_D2s_v3", ResourceType::VirtualMachines).is_ok());
        let err = cache.get("Standard_D2s_v3", ResourceType::AvailabilitySets).unwrap_err();
        assert!(err.is_terminal());
        let err = cache.get("Standard_Typo", ResourceType::VirtualMachines).unwrap_err();
        assert!(err.is_terminal());
        assert!(err.to_string().contains("'Standard_Typo'"));
    }

    #[test]
    fn test_get_zones_unions_vm_skus_only() {
        let cache = SkuCache::new(
            "westeurope",
            vec![
                make_sku("Standard_D2s_v3", "virtualMachines", &["1", "2"]),
                make_sku("Standard_D4s_v3", "virtualMachines", &["3"]),
                make_sku("Premium_LRS", "disks", &["4"]),
            ],
        );
        assert_eq!(cache.get_zones("westeurope"), vec!["1", "2", "3"]);
        assert!(cache.get_zones("eastus").is_empty());
    }

    #[test]
    fn test_zone_restriction_hides_zone() {
        let mut sku = make_sku("Standard_D2s_v3", "virtualMachines", &["1", "2", "3"]);
        sku.restrictions.push(restriction(ResourceSkuRestrictionsType::Zone, &["2"]));
        let cache = SkuCache::new("westeurope", vec![sku]);

        assert_eq!(cache.get_zones("westeurope"), vec!["1", "3"]);
        assert_eq!(
            cache.get_zones_with_vm_size("Standard_D2s_v3", "westeurope"),
            vec!["1", "3"]
        );
    }

    #[test]
    fn test_location_restriction_hides_location() {
        let mut sku = make_sku("Standard_D2s_v3", "virtualMachines", &["1", "2", "3"]);
        sku.restrictions.push(restriction(ResourceSkuRestrictionsType::Location, &[]));
        let cache = SkuCache::new("westeurope", vec![sku]);

        assert!(cache.get_zones("westeurope").is_empty());
        assert!(cache
            .get_zones_with_vm_size("Standard_D2s_v3", "westeurope")
            .is_empty());
    }

    #[test]
    fn test_get_zones_with_vm_size_filters_by_name() {
        let cache = SkuCache::new(
            "westeurope",
            vec![
                make_sku("Standard_D2s_v3", "virtualMachines", &["1", "2"]),
                make_sku("Standard_D4s_v3", "virtualMachines", &["3"]),
            ],
        );
        assert_eq!(
            cache.get_zones_with_vm_size("Standard_D4s_v3", "westeurope"),
            vec!["3"]
        );
        assert!(cache
            .get_zones_with_vm_size("Standard_D8s_v3", "westeurope")
            .is_empty());
    }
}
