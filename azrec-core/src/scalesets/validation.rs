use super::{ScaleSetSpec, diagnostics_storage};
use crate::error::{Error, Result};
use crate::models::ResourceSku;
use crate::sku::{MINIMUM_MEMORY_GB, MINIMUM_VCPUS, SkuCache, capabilities};

/// Check that `sku` and the region can host the scale set.
///
/// Every failure is terminal: retrying cannot help until the desired scale set changes.
pub fn validate(spec: &ScaleSetSpec, sku: &ResourceSku, cache: &SkuCache) -> Result<()> {
    let has_vcpus = sku
        .has_capability_with_capacity(capabilities::VCPUS, MINIMUM_VCPUS)
        .map_err(|err| {
            Error::terminal(format!("failed to validate the vCPU capability: {}", err))
        })?;
    if !has_vcpus {
        return Err(Error::terminal(
            "vm size should be bigger or equal to at least 2 vCPUs",
        ));
    }

    let has_memory = sku
        .has_capability_with_capacity(capabilities::MEMORY_GB, MINIMUM_MEMORY_GB)
        .map_err(|err| {
            Error::terminal(format!("failed to validate the memory capability: {}", err))
        })?;
    if !has_memory {
        return Err(Error::terminal(
            "vm memory should be bigger or equal to at least 2Gi",
        ));
    }

    if spec.os_disk.ephemeral && !sku.has_capability(capabilities::EPHEMERAL_OS_DISK) {
        return Err(Error::terminal(format!(
            "vm size {} does not support ephemeral os. select a different vm size or disable ephemeral os",
            spec.size
        )));
    }

    if spec.encryption_at_host && !sku.has_capability(capabilities::ENCRYPTION_AT_HOST) {
        return Err(Error::terminal(format!(
            "encryption at host is not supported for VM type {}",
            spec.size
        )));
    }

    if spec.wants_ultra_ssd() {
        let zones = if spec.failure_domains.is_empty() {
            cache.get_zones(&spec.location)
        } else {
            spec.failure_domains.clone()
        };
        for zone in &zones {
            if !sku.has_location_capability(capabilities::ULTRA_SSD_AVAILABLE, &spec.location, zone)
            {
                return Err(Error::terminal(format!(
                    "vm size {} does not support ultra disks in location {}. select a different vm size or disable ultra disks",
                    spec.size, spec.location
                )));
            }
        }
    }

    if let Some(boot) = spec.boot_diagnostics.as_ref() {
        if !diagnostics_storage::ALL.contains(&boot.storage_account_type.as_str()) {
            return Err(Error::terminal(format!(
                "invalid storageAccountType: {}. Allowed values are {:?}",
                boot.storage_account_type,
                diagnostics_storage::ALL
            )));
        }
        let has_uri = boot
            .storage_account_uri
            .as_deref()
            .is_some_and(|uri| !uri.is_empty());
        if boot.storage_account_type == diagnostics_storage::USER_MANAGED && !has_uri {
            return Err(Error::terminal(format!(
                "storageAccountURI cannot be empty when storageAccountType is '{}'",
                diagnostics_storage::USER_MANAGED
            )));
        }
    }

    let available = cache.get_zones_with_vm_size(&spec.size, &spec.location);
    for zone in &spec.failure_domains {
        if !available.contains(zone) {
            return Err(Error::terminal(format!(
                "availability zone {} is not available for VM type {} in location {}",
                zone, spec.size, spec.location
            )));
        }
    }

    Ok(())
}
