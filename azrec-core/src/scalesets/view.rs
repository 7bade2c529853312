use crate::models::{
    ExtensionProperties, ImageReference, ManagedDiskParameters, OrchestrationMode,
    ResourceIdentityType, Tags, VirtualMachineScaleSet, VirtualMachineScaleSetDataDisk,
    VirtualMachineScaleSetExtension, VirtualMachineScaleSetOsDisk,
    VirtualMachineScaleSetOsProfile, VirtualMachineScaleSetVm,
};

/// State assumed for instances that do not report one yet.
const STATE_CREATING: &str = "Creating";

/// Observed state of one scale set instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceView {
    pub id: String,
    pub instance_id: String,
    /// Computer name of the VM.
    pub name: String,
    pub availability_zone: Option<String>,
    pub state: String,
    pub image: Option<ImageReference>,
    pub latest_model_applied: bool,
    pub orchestration_mode: OrchestrationMode,
}

impl InstanceView {
    pub fn new(vm: &VirtualMachineScaleSetVm, orchestration_mode: OrchestrationMode) -> Self {
        let props = vm.properties.as_ref();
        let name = props
            .and_then(|p| p.computer_name.clone())
            .or_else(|| vm.name.clone())
            .unwrap_or_default();
        Self {
            id: vm.id.clone().unwrap_or_default(),
            instance_id: vm.instance_id.clone().unwrap_or_default(),
            name,
            availability_zone: vm.zones.first().cloned(),
            state: props
                .and_then(|p| p.provisioning_state.clone())
                .unwrap_or_else(|| STATE_CREATING.to_string()),
            image: props
                .and_then(|p| p.storage_profile.as_ref())
                .and_then(|s| s.image_reference.clone()),
            latest_model_applied: props.and_then(|p| p.latest_model_applied).unwrap_or(false),
            orchestration_mode,
        }
    }
}

/// Observed state of a scale set and its instances, handed to the outer loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleSetView {
    pub id: String,
    pub name: String,
    pub state: Option<String>,
    /// VM size.
    pub sku: String,
    pub capacity: i64,
    pub identity: Option<ResourceIdentityType>,
    pub tags: Tags,
    /// Sorted.
    pub zones: Vec<String>,
    pub image: Option<ImageReference>,
    pub os_disk: Option<VirtualMachineScaleSetOsDisk>,
    /// Sorted by LUN.
    pub data_disks: Vec<VirtualMachineScaleSetDataDisk>,
    /// Custom data is never part of the view.
    pub os_profile: Option<VirtualMachineScaleSetOsProfile>,
    /// Sorted by name, without read-only and protected fields.
    pub extensions: Vec<VirtualMachineScaleSetExtension>,
    pub orchestration_mode: OrchestrationMode,
    pub instances: Vec<InstanceView>,
}

impl ScaleSetView {
    pub fn new(vmss: &VirtualMachineScaleSet, instances: &[VirtualMachineScaleSetVm]) -> Self {
        let orchestration_mode = vmss.orchestration_mode().unwrap_or_default();
        let mut zones = vmss.zones.clone();
        zones.sort();

        let profile = vmss.vm_profile();
        let storage = profile.and_then(|p| p.storage_profile.as_ref());
        let mut data_disks = storage.map(|s| s.data_disks.clone()).unwrap_or_default();
        data_disks.sort_by_key(|d| d.lun);
        let mut extensions: Vec<_> = profile
            .and_then(|p| p.extension_profile.as_ref())
            .map(|e| e.extensions.iter().map(comparable_extension).collect())
            .unwrap_or_default();
        extensions.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            id: vmss.id.clone().unwrap_or_default(),
            name: vmss.name.clone().unwrap_or_default(),
            state: vmss
                .properties
                .as_ref()
                .and_then(|p| p.provisioning_state.clone()),
            sku: vmss
                .sku
                .as_ref()
                .and_then(|s| s.name.clone())
                .unwrap_or_default(),
            capacity: vmss.capacity().unwrap_or(0),
            identity: vmss
                .identity
                .as_ref()
                .map(|i| i.kind)
                .filter(|kind| *kind != ResourceIdentityType::None),
            tags: vmss.tags.clone(),
            zones,
            image: vmss.image_reference().cloned(),
            os_disk: storage.and_then(|s| s.os_disk.clone()),
            data_disks,
            os_profile: profile
                .and_then(|p| p.os_profile.clone())
                .map(|os| VirtualMachineScaleSetOsProfile {
                    custom_data: None,
                    ..os
                }),
            extensions,
            orchestration_mode,
            instances: instances
                .iter()
                .map(|vm| InstanceView::new(vm, orchestration_mode))
                .collect(),
        }
    }

    /// True when a field that changes the VM model differs from `desired`.
    ///
    /// Disk and OS profile fields `desired` leaves unset are not compared. The
    /// network profile is never compared.
    pub fn has_model_changes(&self, desired: &ScaleSetView) -> bool {
        self.image != desired.image
            || self.identity != desired.identity
            || self.zones != desired.zones
            || self.tags != desired.tags
            || self.sku != desired.sku
            || self.extensions != desired.extensions
            || !os_disk_matches(self.os_disk.as_ref(), desired.os_disk.as_ref())
            || !data_disks_match(&self.data_disks, &desired.data_disks)
            || !os_profile_matches(self.os_profile.as_ref(), desired.os_profile.as_ref())
    }

    pub fn has_latest_model_applied_to_all(&self) -> bool {
        self.instances.iter().all(|i| i.latest_model_applied)
    }

    /// True when every instance runs the latest model, or exactly `capacity`
    /// instances do.
    pub fn has_enough_latest_model_or_not_mixed_model(&self) -> bool {
        if self.has_latest_model_applied_to_all() {
            return true;
        }
        let latest = self
            .instances
            .iter()
            .filter(|i| i.latest_model_applied)
            .count() as i64;
        latest == self.capacity
    }
}

fn comparable_extension(
    extension: &VirtualMachineScaleSetExtension,
) -> VirtualMachineScaleSetExtension {
    VirtualMachineScaleSetExtension {
        id: None,
        name: extension.name.clone(),
        properties: extension.properties.as_ref().map(|p| ExtensionProperties {
            protected_settings: None,
            provisioning_state: None,
            ..p.clone()
        }),
    }
}

fn unset_or_eq<T: PartialEq>(desired: Option<&T>, observed: Option<&T>) -> bool {
    desired.is_none() || desired == observed
}

fn storage_type(managed: &Option<ManagedDiskParameters>) -> Option<&String> {
    managed.as_ref().and_then(|m| m.storage_account_type.as_ref())
}

fn os_disk_matches(
    observed: Option<&VirtualMachineScaleSetOsDisk>,
    desired: Option<&VirtualMachineScaleSetOsDisk>,
) -> bool {
    let Some(desired) = desired else {
        return true;
    };
    let Some(observed) = observed else {
        return false;
    };
    unset_or_eq(desired.disk_size_gb.as_ref(), observed.disk_size_gb.as_ref())
        && unset_or_eq(desired.caching.as_ref(), observed.caching.as_ref())
        && unset_or_eq(
            storage_type(&desired.managed_disk),
            storage_type(&observed.managed_disk),
        )
        && unset_or_eq(
            desired.diff_disk_settings.as_ref(),
            observed.diff_disk_settings.as_ref(),
        )
}

/// Both lists sorted by LUN.
fn data_disks_match(
    observed: &[VirtualMachineScaleSetDataDisk],
    desired: &[VirtualMachineScaleSetDataDisk],
) -> bool {
    observed.len() == desired.len()
        && desired.iter().zip(observed).all(|(d, o)| {
            d.lun == o.lun
                && unset_or_eq(d.disk_size_gb.as_ref(), o.disk_size_gb.as_ref())
                && unset_or_eq(d.caching.as_ref(), o.caching.as_ref())
                && unset_or_eq(storage_type(&d.managed_disk), storage_type(&o.managed_disk))
        })
}

fn os_profile_matches(
    observed: Option<&VirtualMachineScaleSetOsProfile>,
    desired: Option<&VirtualMachineScaleSetOsProfile>,
) -> bool {
    let Some(desired) = desired else {
        return true;
    };
    let Some(observed) = observed else {
        return false;
    };
    unset_or_eq(
        desired.computer_name_prefix.as_ref(),
        observed.computer_name_prefix.as_ref(),
    ) && unset_or_eq(desired.admin_username.as_ref(), observed.admin_username.as_ref())
        && unset_or_eq(
            desired.linux_configuration.as_ref(),
            observed.linux_configuration.as_ref(),
        )
        && unset_or_eq(
            desired.windows_configuration.as_ref(),
            observed.windows_configuration.as_ref(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Sku, VirtualMachineScaleSetIdentity, VirtualMachineScaleSetProperties,
        VirtualMachineScaleSetVmProperties,
    };

    fn make_vmss(capacity: i64) -> VirtualMachineScaleSet {
        VirtualMachineScaleSet {
            id: Some("/subscriptions/123/resourceGroups/my-rg/providers/Microsoft.Compute/virtualMachineScaleSets/my-vmss".to_string()),
            name: Some("my-vmss".to_string()),
            sku: Some(Sku {
                name: Some("VM_SIZE".to_string()),
                tier: Some("Standard".to_string()),
                capacity: Some(capacity),
            }),
            zones: vec!["3".to_string(), "1".to_string()],
            properties: Some(VirtualMachineScaleSetProperties {
                provisioning_state: Some("Succeeded".to_string()),
                orchestration_mode: Some(OrchestrationMode::Uniform),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn make_vm(instance_id: &str, latest: bool) -> VirtualMachineScaleSetVm {
        VirtualMachineScaleSetVm {
            id: Some(format!("/virtualMachines/{}", instance_id)),
            instance_id: Some(instance_id.to_string()),
            zones: vec!["1".to_string()],
            properties: Some(VirtualMachineScaleSetVmProperties {
                latest_model_applied: Some(latest),
                computer_name: Some(format!("my-vmss00000{}", instance_id)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_view_from_scale_set() {
        let view = ScaleSetView::new(&make_vmss(2), &[make_vm("0", true)]);
        assert_eq!(view.name, "my-vmss");
        assert_eq!(view.sku, "VM_SIZE");
        assert_eq!(view.capacity, 2);
        assert_eq!(view.state.as_deref(), Some("Succeeded"));
        assert_eq!(view.zones, vec!["1", "3"]);

        let instance = &view.instances[0];
        assert_eq!(instance.instance_id, "0");
        assert_eq!(instance.name, "my-vmss000000");
        assert_eq!(instance.availability_zone.as_deref(), Some("1"));
        assert_eq!(instance.state, STATE_CREATING);
    }

    #[test]
    fn test_identity_none_is_no_identity() {
        let mut vmss = make_vmss(1);
        vmss.identity = Some(VirtualMachineScaleSetIdentity {
            kind: ResourceIdentityType::None,
            user_assigned_identities: Default::default(),
            principal_id: None,
        });
        let with_none = ScaleSetView::new(&vmss, &[]);
        let without = ScaleSetView::new(&make_vmss(1), &[]);
        assert!(!with_none.has_model_changes(&without));
    }

    #[test]
    fn test_capacity_is_not_a_model_change() {
        let a = ScaleSetView::new(&make_vmss(1), &[]);
        let b = ScaleSetView::new(&make_vmss(4), &[]);
        assert!(!a.has_model_changes(&b));

        let mut other = make_vmss(1);
        other.tags.insert("team".to_string(), "infra".to_string());
        assert!(a.has_model_changes(&ScaleSetView::new(&other, &[])));
    }

    #[test]
    fn test_extension_runtime_fields_are_not_model_changes() {
        use crate::models::{
            ExtensionProperties, VirtualMachineScaleSetExtension,
            VirtualMachineScaleSetExtensionProfile, VirtualMachineScaleSetVmProfile,
        };

        let with_extension = |provisioning_state: Option<&str>| {
            let mut vmss = make_vmss(1);
            vmss.properties.as_mut().unwrap().virtual_machine_profile =
                Some(VirtualMachineScaleSetVmProfile {
                    extension_profile: Some(VirtualMachineScaleSetExtensionProfile {
                        extensions: vec![VirtualMachineScaleSetExtension {
                            id: provisioning_state.map(|_| "/extensions/bootstrap".to_string()),
                            name: Some("bootstrap".to_string()),
                            properties: Some(ExtensionProperties {
                                publisher: Some("Microsoft.Azure.Extensions".to_string()),
                                kind: Some("CustomScript".to_string()),
                                type_handler_version: Some("2.1".to_string()),
                                provisioning_state: provisioning_state.map(str::to_string),
                                ..Default::default()
                            }),
                        }],
                    }),
                    ..Default::default()
                });
            ScaleSetView::new(&vmss, &[])
        };

        let observed = with_extension(Some("Succeeded"));
        assert!(!observed.has_model_changes(&with_extension(None)));
        assert!(observed.has_model_changes(&ScaleSetView::new(&make_vmss(1), &[])));
    }

    #[test]
    fn test_unset_disk_fields_are_not_compared() {
        use crate::models::{VirtualMachineScaleSetStorageProfile, VirtualMachineScaleSetVmProfile};

        let with_os_disk = |size: Option<i32>| {
            let mut vmss = make_vmss(1);
            vmss.properties.as_mut().unwrap().virtual_machine_profile =
                Some(VirtualMachineScaleSetVmProfile {
                    storage_profile: Some(VirtualMachineScaleSetStorageProfile {
                        os_disk: Some(VirtualMachineScaleSetOsDisk {
                            disk_size_gb: size,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            ScaleSetView::new(&vmss, &[])
        };

        // The cloud reports a size the desired model never asked for.
        let observed = with_os_disk(Some(30));
        assert!(!observed.has_model_changes(&with_os_disk(None)));
        assert!(observed.has_model_changes(&with_os_disk(Some(128))));
    }

    #[test]
    fn test_latest_model_accounting() {
        let all = ScaleSetView::new(&make_vmss(2), &[make_vm("0", true), make_vm("1", true)]);
        assert!(all.has_latest_model_applied_to_all());
        assert!(all.has_enough_latest_model_or_not_mixed_model());

        // Surged: two of three instances are new, which is the desired capacity.
        let surged = ScaleSetView::new(
            &make_vmss(2),
            &[make_vm("0", false), make_vm("1", true), make_vm("2", true)],
        );
        assert!(!surged.has_latest_model_applied_to_all());
        assert!(surged.has_enough_latest_model_or_not_mixed_model());

        let mixed = ScaleSetView::new(&make_vmss(2), &[make_vm("0", false), make_vm("1", true)]);
        assert!(!mixed.has_enough_latest_model_or_not_mixed_model());
    }
}
