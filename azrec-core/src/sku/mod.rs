//! Resource SKU capability lookups.
//!
//! A [`SkuCache`] is an immutable snapshot of the SKU catalog of one Azure
//! location. Caches are shared through the process-wide [`SkuCacheRegistry`],
//! which populates a location the first time it is requested.

mod cache;
mod registry;

pub use cache::SkuCache;
pub use registry::{ResourceSkuLister, SkuCacheRegistry};

#[cfg(test)]
pub use registry::MockResourceSkuLister;

use std::fmt;

use crate::error::{Error, Result};
use crate::models::ResourceSku;

/// Minimum vCPU count for a node VM size.
pub const MINIMUM_VCPUS: i64 = 2;
/// Minimum memory (GiB) for a node VM size.
pub const MINIMUM_MEMORY_GB: i64 = 2;

/// Capability names as published in the SKU catalog.
pub mod capabilities {
    pub const VCPUS: &str = "vCPUs";
    pub const MEMORY_GB: &str = "MemoryGB";
    pub const ACCELERATED_NETWORKING: &str = "AcceleratedNetworkingEnabled";
    pub const EPHEMERAL_OS_DISK: &str = "EphemeralOSDiskSupported";
    pub const ENCRYPTION_AT_HOST: &str = "EncryptionAtHostSupported";
    pub const ULTRA_SSD_AVAILABLE: &str = "UltraSSDAvailable";
    pub const MAXIMUM_PLATFORM_FAULT_DOMAIN_COUNT: &str = "MaximumPlatformFaultDomainCount";
}

/// Category of a SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    VirtualMachines,
    AvailabilitySets,
    Disks,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::VirtualMachines => "virtualMachines",
            ResourceType::AvailabilitySets => "availabilitySets",
            ResourceType::Disks => "disks",
        }
    }

    pub fn matches(&self, resource_type: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(resource_type)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

impl ResourceSku {
    /// Raw value of a named capability.
    pub fn get_capability(&self, name: &str) -> Option<&str> {
        self.capabilities
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.value.as_deref())
    }

    /// True when the capability is present with value `True`.
    ///
    /// Unknown capabilities answer false.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.name == name && is_true(c.value.as_deref()))
    }

    /// True when the numeric capability is at least `minimum`.
    ///
    /// Errors when the capability is present without a parseable value.
    pub fn has_capability_with_capacity(&self, name: &str, minimum: i64) -> Result<bool> {
        for capability in self.capabilities.iter().filter(|c| c.name == name) {
            let Some(value) = capability.value.as_deref() else {
                return Err(Error::internal(format!(
                    "capability {} of sku {} has no value",
                    name, self.name
                )));
            };
            let parsed: f64 = value.parse().map_err(|_| {
                Error::internal(format!(
                    "capability {} of sku {} has non-numeric value {:?}",
                    name, self.name, value
                ))
            })?;
            if parsed >= minimum as f64 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// True when the capability is `True` for `zone` in `location`.
    pub fn has_location_capability(&self, name: &str, location: &str, zone: &str) -> bool {
        self.location_info
            .iter()
            .filter(|info| info.location.eq_ignore_ascii_case(location))
            .flat_map(|info| info.zone_details.iter())
            .filter(|details| details.name.iter().any(|z| z == zone))
            .flat_map(|details| details.capabilities.iter())
            .any(|c| c.name == name && is_true(c.value.as_deref()))
    }
}
