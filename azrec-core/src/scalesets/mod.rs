//! Virtual machine scale sets.
//!
//! A scale set is validated against the SKU catalog before any cloud call,
//! then created with a full PUT or patched with a PATCH whose capacity may be
//! surged above the desired replica count while a new model rolls out. The
//! network profile is observed but never patched; the cloud provider
//! integration owns it.

mod params;
mod service;
mod validation;
mod view;

pub use params::{from_update, to_update};
pub use service::{SERVICE_NAME, ScaleSetClient, ScaleSetScope, Service};
pub use validation::validate;
pub use view::{InstanceView, ScaleSetView};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{
    ImageReference, OrchestrationMode, Plan, Resource, ResourceSku, Tags, VirtualMachineScaleSet,
    VirtualMachineScaleSetVm,
};
use crate::services::vmss_extensions::VmssExtensionSpec;
use crate::spec::{ResourceSpec, existing_as};

/// Storage account types accepted for boot diagnostics.
pub mod diagnostics_storage {
    pub const DISABLED: &str = "Disabled";
    pub const MANAGED: &str = "Managed";
    pub const USER_MANAGED: &str = "UserManaged";

    pub const ALL: [&str; 3] = [DISABLED, MANAGED, USER_MANAGED];
}

/// Identity assigned to the scale set VMs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmIdentity {
    #[default]
    None,
    SystemAssigned,
    UserAssigned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OsDiskSpec {
    pub os_type: String,
    pub disk_size_gb: Option<i32>,
    pub storage_account_type: Option<String>,
    pub caching: Option<String>,
    pub disk_encryption_set_id: Option<String>,
    /// Place the OS disk on the VM's local storage.
    pub ephemeral: bool,
}

impl Default for OsDiskSpec {
    fn default() -> Self {
        Self {
            os_type: "Linux".to_string(),
            disk_size_gb: None,
            storage_account_type: None,
            caching: None,
            disk_encryption_set_id: None,
            ephemeral: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataDiskSpec {
    pub name_suffix: String,
    pub disk_size_gb: i32,
    pub lun: Option<i32>,
    pub storage_account_type: Option<String>,
    pub caching: Option<String>,
}

impl DataDiskSpec {
    pub fn is_ultra_ssd(&self) -> bool {
        self.storage_account_type.as_deref()
            == Some(crate::models::STORAGE_ACCOUNT_TYPE_ULTRA_SSD_LRS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpotVmOptions {
    pub max_price: Option<f64>,
    pub eviction_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootDiagnosticsSpec {
    /// One of [`diagnostics_storage::ALL`].
    pub storage_account_type: String,
    pub storage_account_uri: Option<String>,
}

/// Backend pool of the public load balancer used for outbound traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadBalancerPool {
    pub load_balancer_name: String,
    pub pool_name: String,
}

/// Desired state of a scale set.
///
/// `sku`, `max_surge`, `replicas_externally_managed` and `instances` are
/// filled in by the service before parameters are computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaleSetSpec {
    pub name: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub location: String,
    pub cluster_name: String,
    /// VM size, e.g. `Standard_D2s_v3`.
    pub size: String,
    pub capacity: i64,
    pub orchestration_mode: OrchestrationMode,
    pub failure_domains: Vec<String>,
    pub image: ImageReference,
    /// Marketplace plan for third party images.
    pub image_plan: Option<Plan>,
    pub os_disk: OsDiskSpec,
    pub data_disks: Vec<DataDiskSpec>,
    pub admin_username: String,
    pub ssh_key_data: String,
    /// Raw bootstrap data; sent base64 encoded as custom data.
    pub bootstrap_data: String,
    /// The bootstrap data changed since the model was last written.
    pub should_patch_custom_data: bool,
    pub vnet_name: String,
    pub vnet_resource_group: String,
    pub subnet_name: String,
    pub load_balancer_pool: Option<LoadBalancerPool>,
    /// Defaults to what the SKU supports.
    pub accelerated_networking: Option<bool>,
    pub identity: VmIdentity,
    pub user_assigned_identities: Vec<String>,
    pub encryption_at_host: bool,
    pub spot_vm_options: Option<SpotVmOptions>,
    pub ultra_ssd_enabled: Option<bool>,
    pub boot_diagnostics: Option<BootDiagnosticsSpec>,
    /// Minutes a VM may delay its termination to drain.
    pub terminate_notification_timeout: Option<u32>,
    pub additional_tags: Tags,
    pub extensions: Vec<VmssExtensionSpec>,

    #[serde(skip)]
    pub sku: Option<ResourceSku>,
    #[serde(skip)]
    pub max_surge: i64,
    #[serde(skip)]
    pub replicas_externally_managed: bool,
    #[serde(skip)]
    pub instances: Vec<VirtualMachineScaleSetVm>,
}

impl ScaleSetSpec {
    /// Ultra SSD is requested explicitly or implied by a data disk.
    pub fn wants_ultra_ssd(&self) -> bool {
        self.ultra_ssd_enabled == Some(true) || self.data_disks.iter().any(|d| d.is_ultra_ssd())
    }

    fn resolved_sku(&self) -> Result<&ResourceSku> {
        self.sku.as_ref().ok_or_else(|| {
            Error::terminal(format!(
                "resource sku for VM size {} was not resolved before computing parameters",
                self.size
            ))
        })
    }

    /// Patch for an existing scale set, `None` when nothing needs to change.
    fn existing_parameters(
        &self,
        sku: &ResourceSku,
        existing: &VirtualMachineScaleSet,
    ) -> Result<Option<VirtualMachineScaleSet>> {
        let mut desired = params::build(self, sku)?;
        let current = ScaleSetView::new(existing, &self.instances);
        let has_model_changes = current.has_model_changes(&ScaleSetView::new(&desired, &[]));

        let updated = match self.orchestration_mode {
            OrchestrationMode::Flexible => true,
            OrchestrationMode::Uniform => current.has_enough_latest_model_or_not_mixed_model(),
        };

        let mut capacity = if self.replicas_externally_managed {
            current.capacity
        } else {
            self.capacity
        };
        if self.max_surge > 0 && (has_model_changes || !updated) && !self.replicas_externally_managed
        {
            capacity = self.capacity + self.max_surge;
        }

        if capacity <= current.capacity && !has_model_changes && !self.should_patch_custom_data {
            return Ok(None);
        }

        if let Some(sku) = desired.sku.as_mut() {
            sku.capacity = Some(capacity);
        }
        if !has_model_changes && !self.should_patch_custom_data {
            if let Some(props) = desired.properties.as_mut() {
                props.virtual_machine_profile = None;
            }
        }
        Ok(Some(desired))
    }
}

impl ResourceSpec for ScaleSetSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    /// Full payload for a new scale set, or the patch-shaped desired state
    /// of an existing one.
    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>> {
        let sku = self.resolved_sku()?;
        match existing_as::<VirtualMachineScaleSet>(existing)? {
            Some(existing) => Ok(self.existing_parameters(sku, existing)?.map(Resource::from)),
            None => Ok(Some(Resource::from(params::build(self, sku)?))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        ResourceSkuCapabilities, ResourceSkuLocationInfo, Sku, VirtualMachineScaleSetVmProperties,
    };
    use crate::sku::capabilities;

    pub(crate) fn make_sku() -> ResourceSku {
        ResourceSku {
            name: "VM_SIZE".to_string(),
            resource_type: "virtualMachines".to_string(),
            locations: vec!["westeurope".to_string()],
            location_info: vec![ResourceSkuLocationInfo {
                location: "westeurope".to_string(),
                zones: vec!["1".to_string(), "3".to_string()],
                zone_details: vec![],
            }],
            capabilities: vec![
                ResourceSkuCapabilities::new(capabilities::VCPUS, "4"),
                ResourceSkuCapabilities::new(capabilities::MEMORY_GB, "4"),
            ],
            ..Default::default()
        }
    }

    pub(crate) fn make_spec() -> ScaleSetSpec {
        ScaleSetSpec {
            name: "my-vmss".to_string(),
            resource_group: "my-rg".to_string(),
            subscription_id: "123".to_string(),
            location: "westeurope".to_string(),
            cluster_name: "test-cluster".to_string(),
            size: "VM_SIZE".to_string(),
            capacity: 2,
            failure_domains: vec!["1".to_string(), "3".to_string()],
            image: ImageReference {
                publisher: Some("cncf-upstream".to_string()),
                offer: Some("capi".to_string()),
                sku: Some("ubuntu-2204-gen1".to_string()),
                version: Some("1.0".to_string()),
                ..Default::default()
            },
            admin_username: "capi".to_string(),
            ssh_key_data: "ssh-rsa AAAA".to_string(),
            bootstrap_data: "#cloud-config".to_string(),
            vnet_name: "my-vnet".to_string(),
            vnet_resource_group: "my-rg".to_string(),
            subnet_name: "node-subnet".to_string(),
            sku: Some(make_sku()),
            max_surge: 1,
            ..Default::default()
        }
    }

    fn make_existing(spec: &ScaleSetSpec) -> VirtualMachineScaleSet {
        let mut vmss = params::build(spec, spec.sku.as_ref().unwrap()).unwrap();
        vmss.id = Some(crate::resource_id::vmss_id("123", "my-rg", "my-vmss"));
        vmss
    }

    fn make_instance(id: &str, latest: bool) -> VirtualMachineScaleSetVm {
        VirtualMachineScaleSetVm {
            instance_id: Some(id.to_string()),
            properties: Some(VirtualMachineScaleSetVmProperties {
                latest_model_applied: Some(latest),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parameters_without_sku_is_terminal() {
        let spec = ScaleSetSpec {
            sku: None,
            ..make_spec()
        };
        assert!(spec.parameters(None).unwrap_err().is_terminal());
    }

    #[test]
    fn test_parameters_wrong_kind_is_terminal() {
        let existing = Resource::from(crate::models::Subnet::default());
        assert!(make_spec().parameters(Some(&existing)).unwrap_err().is_terminal());
    }

    #[test]
    fn test_existing_matching_is_no_change() {
        let spec = make_spec();
        let existing = Resource::from(make_existing(&spec));
        assert!(spec.parameters(Some(&existing)).unwrap().is_none());
    }

    #[test]
    fn test_image_change_surges_capacity() {
        let spec = make_spec();
        let mut existing = make_existing(&spec);
        existing.vm_profile_mut().unwrap().storage_profile.as_mut().unwrap().image_reference =
            Some(ImageReference {
                version: Some("0.9".to_string()),
                ..spec.image.clone()
            });

        let params = spec.parameters(Some(&Resource::from(existing))).unwrap().unwrap();
        let vmss = VirtualMachineScaleSet::try_from(params).unwrap();
        assert_eq!(vmss.capacity(), Some(3));
        assert_eq!(vmss.image_reference().unwrap().version.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_mixed_model_instances_surge_without_model_change() {
        let mut spec = make_spec();
        let existing = make_existing(&spec);
        spec.instances = vec![make_instance("0", true), make_instance("1", false), make_instance("2", false)];

        let params = spec.parameters(Some(&Resource::from(existing))).unwrap().unwrap();
        let vmss = VirtualMachineScaleSet::try_from(params).unwrap();
        assert_eq!(vmss.capacity(), Some(3));
        // No model change: the VM profile is left out of the patch.
        assert!(vmss.vm_profile().is_none());
    }

    #[test]
    fn test_externally_managed_suppresses_surge() {
        let mut spec = make_spec();
        spec.replicas_externally_managed = true;
        let mut existing = make_existing(&spec);
        existing.sku = Some(Sku {
            capacity: Some(5),
            ..existing.sku.clone().unwrap()
        });
        existing.zones = vec!["1".to_string()];

        let params = spec.parameters(Some(&Resource::from(existing))).unwrap().unwrap();
        let vmss = VirtualMachineScaleSet::try_from(params).unwrap();
        assert_eq!(vmss.capacity(), Some(5));
    }

    #[test]
    fn test_externally_managed_patches_custom_data() {
        let mut spec = make_spec();
        spec.replicas_externally_managed = true;
        spec.should_patch_custom_data = true;
        let existing = make_existing(&spec);

        let params = spec.parameters(Some(&Resource::from(existing))).unwrap().unwrap();
        let vmss = VirtualMachineScaleSet::try_from(params).unwrap();
        assert!(vmss.vm_profile().unwrap().os_profile.as_ref().unwrap().custom_data.is_some());
    }

    fn patched_model(
        spec: &ScaleSetSpec,
        existing: VirtualMachineScaleSet,
    ) -> VirtualMachineScaleSet {
        let params = spec
            .parameters(Some(&Resource::from(existing)))
            .unwrap()
            .expect("model drift must produce a patch");
        let vmss = VirtualMachineScaleSet::try_from(params).unwrap();
        assert!(vmss.vm_profile().is_some());
        vmss
    }

    #[test]
    fn test_added_extension_is_a_model_change() {
        use crate::services::vm_extensions::ExtensionSpec;

        let existing = make_existing(&make_spec());
        let mut spec = make_spec();
        spec.extensions = vec![VmssExtensionSpec {
            extension: ExtensionSpec {
                name: "CustomScript".to_string(),
                publisher: "Microsoft.Azure.Extensions".to_string(),
                version: "2.1".to_string(),
                ..Default::default()
            },
            scale_set_name: "my-vmss".to_string(),
            resource_group: "my-rg".to_string(),
        }];

        let vmss = patched_model(&spec, existing);
        let profile = vmss.vm_profile().unwrap();
        assert_eq!(profile.extension_profile.as_ref().unwrap().extensions.len(), 1);
        assert_eq!(vmss.capacity(), Some(3));
    }

    #[test]
    fn test_os_disk_change_is_a_model_change() {
        let existing = make_existing(&make_spec());
        let mut spec = make_spec();
        spec.os_disk.storage_account_type = Some("Premium_LRS".to_string());
        spec.os_disk.disk_size_gb = Some(128);

        let vmss = patched_model(&spec, existing);
        let os_disk = vmss
            .vm_profile()
            .unwrap()
            .storage_profile
            .as_ref()
            .unwrap()
            .os_disk
            .as_ref()
            .unwrap();
        assert_eq!(os_disk.disk_size_gb, Some(128));
    }

    #[test]
    fn test_data_disk_change_is_a_model_change() {
        let existing = make_existing(&make_spec());
        let mut spec = make_spec();
        spec.data_disks = vec![DataDiskSpec {
            name_suffix: "etcd".to_string(),
            disk_size_gb: 256,
            ..Default::default()
        }];

        patched_model(&spec, existing);
    }

    #[test]
    fn test_ssh_key_change_is_a_model_change() {
        let existing = make_existing(&make_spec());
        let mut spec = make_spec();
        spec.ssh_key_data = "ssh-ed25519 BBBB".to_string();

        let vmss = patched_model(&spec, existing);
        let linux = vmss
            .vm_profile()
            .unwrap()
            .os_profile
            .as_ref()
            .unwrap()
            .linux_configuration
            .as_ref()
            .unwrap();
        assert_eq!(
            linux.ssh.as_ref().unwrap().public_keys[0].key_data,
            "ssh-ed25519 BBBB"
        );
    }

    #[test]
    fn test_bootstrap_data_alone_is_not_a_model_change() {
        let existing = make_existing(&make_spec());
        let mut spec = make_spec();
        spec.bootstrap_data = "#cloud-config\nruncmd: []".to_string();
        assert!(spec.parameters(Some(&Resource::from(existing))).unwrap().is_none());
    }

    #[test]
    fn test_network_profile_drift_is_ignored() {
        let spec = make_spec();
        let mut existing = make_existing(&spec);
        existing.vm_profile_mut().unwrap().network_profile = None;
        assert!(spec.parameters(Some(&Resource::from(existing))).unwrap().is_none());
    }

    #[test]
    fn test_scale_down_is_no_change() {
        let mut spec = make_spec();
        spec.capacity = 1;
        let existing = make_existing(&make_spec());
        assert!(spec.parameters(Some(&Resource::from(existing))).unwrap().is_none());
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: ScaleSetSpec = serde_json::from_value(serde_json::json!({
            "name": "my-vmss",
            "size": "Standard_D2s_v3",
            "capacity": 3,
            "orchestrationMode": "Flexible",
            "dataDisks": [{"nameSuffix": "etcd", "diskSizeGb": 256, "storageAccountType": "UltraSSD_LRS"}]
        }))
        .unwrap();
        assert_eq!(spec.orchestration_mode, OrchestrationMode::Flexible);
        assert_eq!(spec.os_disk.os_type, "Linux");
        assert!(spec.wants_ultra_ssd());
        assert!(spec.sku.is_none());
    }
}
