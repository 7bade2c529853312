//! Scale set payload shaping.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{BootDiagnosticsSpec, ScaleSetSpec, VmIdentity, diagnostics_storage};
use crate::error::Result;
use crate::models::{
    AdditionalCapabilities, BillingProfile, BootDiagnostics, DiagnosticsProfile, DiffDiskSettings,
    IpConfigurationProperties, LinuxConfiguration, ManagedDiskParameters,
    NETWORK_API_VERSION_2020_11_01, NetworkConfigurationProperties, OrchestrationMode,
    ResourceIdentityType, ResourceSku, ScheduledEventsProfile, SecurityProfile, Sku,
    SshConfiguration, SshPublicKey, SubResource, TerminateNotificationProfile, UpgradeMode,
    UpgradePolicy, UserAssignedIdentity, VirtualMachineScaleSet, VirtualMachineScaleSetDataDisk,
    VirtualMachineScaleSetExtensionProfile, VirtualMachineScaleSetIdentity,
    VirtualMachineScaleSetIpConfiguration, VirtualMachineScaleSetNetworkConfiguration,
    VirtualMachineScaleSetNetworkProfile, VirtualMachineScaleSetOsDisk,
    VirtualMachineScaleSetOsProfile, VirtualMachineScaleSetProperties,
    VirtualMachineScaleSetStorageProfile, VirtualMachineScaleSetUpdate,
    VirtualMachineScaleSetVmProfile, WindowsConfiguration,
};
use crate::resource_id;
use crate::sku::capabilities;
use crate::tags::{self, BuildParams, ResourceLifecycle};

const PRIORITY_SPOT: &str = "Spot";
const EVICTION_POLICY_DEALLOCATE: &str = "Deallocate";
const EVICTION_POLICY_DELETE: &str = "Delete";
const DIFF_DISK_OPTION_LOCAL: &str = "Local";

/// Full (PUT-shaped) desired scale set.
pub(super) fn build(spec: &ScaleSetSpec, sku: &ResourceSku) -> Result<VirtualMachineScaleSet> {
    let mut vm_profile = VirtualMachineScaleSetVmProfile {
        os_profile: Some(os_profile(spec)),
        storage_profile: Some(storage_profile(spec)),
        network_profile: Some(network_profile(spec, sku)),
        security_profile: spec.encryption_at_host.then(|| SecurityProfile {
            encryption_at_host: Some(true),
        }),
        diagnostics_profile: spec.boot_diagnostics.as_ref().map(diagnostics_profile),
        extension_profile: Some(VirtualMachineScaleSetExtensionProfile {
            extensions: spec
                .extensions
                .iter()
                .map(|e| e.to_extension())
                .collect::<Result<Vec<_>>>()?,
        }),
        ..Default::default()
    };

    if let Some(spot) = spec.spot_vm_options.as_ref() {
        vm_profile.priority = Some(PRIORITY_SPOT.to_string());
        vm_profile.eviction_policy = Some(spot.eviction_policy.clone().unwrap_or_else(|| {
            let policy = if spec.os_disk.ephemeral {
                EVICTION_POLICY_DELETE
            } else {
                EVICTION_POLICY_DEALLOCATE
            };
            policy.to_string()
        }));
        vm_profile.billing_profile = spot.max_price.map(|max_price| BillingProfile {
            max_price: Some(max_price),
        });
    }

    let mut properties = VirtualMachineScaleSetProperties {
        orchestration_mode: Some(spec.orchestration_mode),
        single_placement_group: Some(false),
        ..Default::default()
    };

    if let Some(minutes) = spec.terminate_notification_timeout {
        vm_profile.scheduled_events_profile = Some(ScheduledEventsProfile {
            terminate_notification_profile: Some(TerminateNotificationProfile {
                not_before_timeout: Some(format!("PT{}M", minutes)),
                enable: Some(true),
            }),
        });
        // Terminate events must not be acted on by overprovisioned VMs.
        properties.do_not_run_extensions_on_overprovisioned_vms = Some(true);
    }

    match spec.orchestration_mode {
        OrchestrationMode::Uniform => {
            properties.overprovision = Some(false);
            properties.upgrade_policy = Some(UpgradePolicy {
                mode: Some(UpgradeMode::Manual),
            });
        }
        OrchestrationMode::Flexible => {
            if let Some(network) = vm_profile.network_profile.as_mut() {
                network.network_api_version = Some(NETWORK_API_VERSION_2020_11_01.to_string());
            }
            properties.platform_fault_domain_count =
                Some(spec.failure_domains.len().max(1) as i32);
        }
    }

    if spec.data_disks.iter().any(|d| d.is_ultra_ssd()) {
        properties.additional_capabilities = Some(AdditionalCapabilities {
            ultra_ssd_enabled: Some(true),
        });
    }
    if let Some(enabled) = spec.ultra_ssd_enabled {
        properties.additional_capabilities = Some(AdditionalCapabilities {
            ultra_ssd_enabled: Some(enabled),
        });
    }

    properties.virtual_machine_profile = Some(vm_profile);

    Ok(VirtualMachineScaleSet {
        name: Some(spec.name.clone()),
        location: Some(spec.location.clone()),
        tags: tags::build(BuildParams {
            cluster_name: &spec.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&spec.name),
            role: Some(tags::roles::NODE),
            additional: &spec.additional_tags,
        }),
        sku: Some(Sku {
            name: Some(spec.size.clone()),
            tier: Some("Standard".to_string()),
            capacity: Some(spec.capacity),
        }),
        plan: spec.image_plan.clone(),
        identity: identity(spec),
        zones: spec.failure_domains.clone(),
        properties: Some(properties),
        ..Default::default()
    })
}

fn identity(spec: &ScaleSetSpec) -> Option<VirtualMachineScaleSetIdentity> {
    match spec.identity {
        VmIdentity::None => None,
        VmIdentity::SystemAssigned => Some(VirtualMachineScaleSetIdentity {
            kind: ResourceIdentityType::SystemAssigned,
            user_assigned_identities: BTreeMap::new(),
            principal_id: None,
        }),
        VmIdentity::UserAssigned => Some(VirtualMachineScaleSetIdentity {
            kind: ResourceIdentityType::UserAssigned,
            user_assigned_identities: spec
                .user_assigned_identities
                .iter()
                .map(|id| (id.clone(), UserAssignedIdentity::default()))
                .collect(),
            principal_id: None,
        }),
    }
}

fn os_profile(spec: &ScaleSetSpec) -> VirtualMachineScaleSetOsProfile {
    let mut profile = VirtualMachineScaleSetOsProfile {
        computer_name_prefix: Some(spec.name.clone()),
        admin_username: Some(spec.admin_username.clone()),
        custom_data: Some(STANDARD.encode(spec.bootstrap_data.as_bytes())),
        ..Default::default()
    };
    if spec.os_disk.os_type.eq_ignore_ascii_case("windows") {
        profile.windows_configuration = Some(WindowsConfiguration {
            enable_automatic_updates: Some(false),
        });
    } else {
        profile.linux_configuration = Some(LinuxConfiguration {
            disable_password_authentication: Some(true),
            ssh: Some(SshConfiguration {
                public_keys: vec![SshPublicKey {
                    path: format!("/home/{}/.ssh/authorized_keys", spec.admin_username),
                    key_data: spec.ssh_key_data.clone(),
                }],
            }),
        });
    }
    profile
}

fn storage_profile(spec: &ScaleSetSpec) -> VirtualMachineScaleSetStorageProfile {
    let os = &spec.os_disk;
    let os_disk = VirtualMachineScaleSetOsDisk {
        os_type: Some(os.os_type.clone()),
        create_option: Some("FromImage".to_string()),
        disk_size_gb: os.disk_size_gb,
        caching: os.caching.clone(),
        managed_disk: (os.storage_account_type.is_some() || os.disk_encryption_set_id.is_some())
            .then(|| ManagedDiskParameters {
                storage_account_type: os.storage_account_type.clone(),
                disk_encryption_set: os.disk_encryption_set_id.clone().map(SubResource::new),
            }),
        diff_disk_settings: os.ephemeral.then(|| DiffDiskSettings {
            option: Some(DIFF_DISK_OPTION_LOCAL.to_string()),
        }),
    };

    let data_disks = spec
        .data_disks
        .iter()
        .enumerate()
        .map(|(index, disk)| VirtualMachineScaleSetDataDisk {
            name: Some(format!("{}_{}", spec.name, disk.name_suffix)),
            lun: disk.lun.unwrap_or(index as i32),
            create_option: Some("Empty".to_string()),
            disk_size_gb: Some(disk.disk_size_gb),
            caching: disk.caching.clone(),
            managed_disk: disk
                .storage_account_type
                .clone()
                .map(|storage_account_type| ManagedDiskParameters {
                    storage_account_type: Some(storage_account_type),
                    disk_encryption_set: None,
                }),
        })
        .collect();

    VirtualMachineScaleSetStorageProfile {
        image_reference: Some(spec.image.clone()),
        os_disk: Some(os_disk),
        data_disks,
    }
}

fn network_profile(spec: &ScaleSetSpec, sku: &ResourceSku) -> VirtualMachineScaleSetNetworkProfile {
    let accelerated_networking = spec
        .accelerated_networking
        .unwrap_or_else(|| sku.has_capability(capabilities::ACCELERATED_NETWORKING));

    let backend_pools = spec
        .load_balancer_pool
        .iter()
        .map(|pool| {
            SubResource::new(resource_id::address_pool_id(
                &spec.subscription_id,
                &spec.resource_group,
                &pool.load_balancer_name,
                &pool.pool_name,
            ))
        })
        .collect();

    VirtualMachineScaleSetNetworkProfile {
        network_interface_configurations: vec![VirtualMachineScaleSetNetworkConfiguration {
            name: format!("{}-netconfig", spec.name),
            properties: Some(NetworkConfigurationProperties {
                primary: Some(true),
                enable_accelerated_networking: Some(accelerated_networking),
                enable_ip_forwarding: Some(true),
                ip_configurations: vec![VirtualMachineScaleSetIpConfiguration {
                    name: format!("{}-ipconfig", spec.name),
                    properties: Some(IpConfigurationProperties {
                        subnet: Some(SubResource::new(resource_id::subnet_id(
                            &spec.subscription_id,
                            &spec.vnet_resource_group,
                            &spec.vnet_name,
                            &spec.subnet_name,
                        ))),
                        primary: Some(true),
                        private_ip_address_version: Some("IPv4".to_string()),
                        load_balancer_backend_address_pools: backend_pools,
                    }),
                }],
            }),
        }],
        network_api_version: None,
    }
}

fn diagnostics_profile(boot: &BootDiagnosticsSpec) -> DiagnosticsProfile {
    let boot_diagnostics = match boot.storage_account_type.as_str() {
        diagnostics_storage::DISABLED => BootDiagnostics {
            enabled: Some(false),
            storage_uri: None,
        },
        diagnostics_storage::USER_MANAGED => BootDiagnostics {
            enabled: Some(true),
            storage_uri: boot.storage_account_uri.clone(),
        },
        _ => BootDiagnostics {
            enabled: Some(true),
            storage_uri: None,
        },
    };
    DiagnosticsProfile {
        boot_diagnostics: Some(boot_diagnostics),
    }
}

/// PATCH-shaped scale set from a full one.
///
/// Converted through the JSON representation so that fields the update model
/// does not name are carried over. The network profile is cleared.
pub fn to_update(vmss: &VirtualMachineScaleSet) -> Result<VirtualMachineScaleSetUpdate> {
    let mut update: VirtualMachineScaleSetUpdate =
        serde_json::from_value(serde_json::to_value(vmss)?)?;
    update.clear_network_profile();
    Ok(update)
}

/// Full scale set from a PATCH-shaped one.
pub fn from_update(update: &VirtualMachineScaleSetUpdate) -> Result<VirtualMachineScaleSet> {
    Ok(serde_json::from_value(serde_json::to_value(update)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Plan;
    use crate::scalesets::tests::{make_sku, make_spec};
    use crate::scalesets::{DataDiskSpec, LoadBalancerPool, SpotVmOptions};
    use crate::services::vm_extensions::ExtensionSpec;
    use crate::services::vmss_extensions::VmssExtensionSpec;

    fn make_full_spec() -> ScaleSetSpec {
        ScaleSetSpec {
            identity: VmIdentity::UserAssigned,
            user_assigned_identities: vec!["/identities/capz".to_string()],
            encryption_at_host: true,
            spot_vm_options: Some(SpotVmOptions {
                max_price: Some(0.5),
                eviction_policy: None,
            }),
            terminate_notification_timeout: Some(7),
            image_plan: Some(Plan {
                name: Some("capi".to_string()),
                publisher: Some("cncf-upstream".to_string()),
                product: Some("capi".to_string()),
            }),
            data_disks: vec![DataDiskSpec {
                name_suffix: "etcddisk".to_string(),
                disk_size_gb: 256,
                lun: None,
                storage_account_type: Some("UltraSSD_LRS".to_string()),
                caching: None,
            }],
            load_balancer_pool: Some(LoadBalancerPool {
                load_balancer_name: "my-lb".to_string(),
                pool_name: "outbound".to_string(),
            }),
            boot_diagnostics: Some(BootDiagnosticsSpec {
                storage_account_type: diagnostics_storage::USER_MANAGED.to_string(),
                storage_account_uri: Some("https://diag.blob.core.windows.net".to_string()),
            }),
            extensions: vec![VmssExtensionSpec {
                extension: ExtensionSpec {
                    name: "CAPZ.Linux.Bootstrapping".to_string(),
                    publisher: "Microsoft.Azure.ContainerUpstream".to_string(),
                    version: "1.0".to_string(),
                    ..Default::default()
                },
                scale_set_name: "my-vmss".to_string(),
                resource_group: "my-rg".to_string(),
            }],
            ..make_spec()
        }
    }

    #[test]
    fn test_build_uniform() {
        let vmss = build(&make_spec(), &make_sku()).unwrap();
        let props = vmss.properties.as_ref().unwrap();
        assert_eq!(props.overprovision, Some(false));
        assert_eq!(props.upgrade_policy.as_ref().unwrap().mode, Some(UpgradeMode::Manual));
        assert!(props.platform_fault_domain_count.is_none());
        assert_eq!(vmss.capacity(), Some(2));
        assert_eq!(vmss.zones, vec!["1", "3"]);
        assert!(vmss.identity.is_none());

        let profile = vmss.vm_profile().unwrap();
        let os = profile.os_profile.as_ref().unwrap();
        assert_eq!(os.custom_data.as_deref(), Some("I2Nsb3VkLWNvbmZpZw=="));
        let ssh = os.linux_configuration.as_ref().unwrap().ssh.as_ref().unwrap();
        assert_eq!(ssh.public_keys[0].path, "/home/capi/.ssh/authorized_keys");

        // The SKU does not advertise accelerated networking.
        let nic = &profile.network_profile.as_ref().unwrap().network_interface_configurations[0];
        assert_eq!(
            nic.properties.as_ref().unwrap().enable_accelerated_networking,
            Some(false)
        );
    }

    #[test]
    fn test_build_flexible() {
        let spec = ScaleSetSpec {
            orchestration_mode: OrchestrationMode::Flexible,
            failure_domains: vec![],
            ..make_spec()
        };
        let vmss = build(&spec, &make_sku()).unwrap();
        let props = vmss.properties.as_ref().unwrap();
        assert!(props.upgrade_policy.is_none());
        assert!(props.overprovision.is_none());
        assert_eq!(props.platform_fault_domain_count, Some(1));
        assert_eq!(
            vmss.vm_profile()
                .unwrap()
                .network_profile
                .as_ref()
                .unwrap()
                .network_api_version
                .as_deref(),
            Some(NETWORK_API_VERSION_2020_11_01)
        );

        let three = ScaleSetSpec {
            failure_domains: vec!["1".to_string(), "2".to_string(), "3".to_string()],
            ..spec
        };
        let vmss = build(&three, &make_sku()).unwrap();
        assert_eq!(vmss.properties.unwrap().platform_fault_domain_count, Some(3));
    }

    #[test]
    fn test_build_optional_profiles() {
        let vmss = build(&make_full_spec(), &make_sku()).unwrap();
        let props = vmss.properties.as_ref().unwrap();
        assert_eq!(
            props.additional_capabilities.as_ref().unwrap().ultra_ssd_enabled,
            Some(true)
        );
        assert_eq!(props.do_not_run_extensions_on_overprovisioned_vms, Some(true));
        assert_eq!(vmss.plan.as_ref().unwrap().product.as_deref(), Some("capi"));

        let identity = vmss.identity.as_ref().unwrap();
        assert_eq!(identity.kind, ResourceIdentityType::UserAssigned);
        assert!(identity.user_assigned_identities.contains_key("/identities/capz"));

        let profile = vmss.vm_profile().unwrap();
        assert_eq!(profile.priority.as_deref(), Some("Spot"));
        assert_eq!(profile.eviction_policy.as_deref(), Some("Deallocate"));
        assert_eq!(profile.billing_profile.as_ref().unwrap().max_price, Some(0.5));
        assert_eq!(
            profile
                .scheduled_events_profile
                .as_ref()
                .unwrap()
                .terminate_notification_profile
                .as_ref()
                .unwrap()
                .not_before_timeout
                .as_deref(),
            Some("PT7M")
        );
        assert_eq!(
            profile.security_profile.as_ref().unwrap().encryption_at_host,
            Some(true)
        );
        let boot = profile
            .diagnostics_profile
            .as_ref()
            .unwrap()
            .boot_diagnostics
            .as_ref()
            .unwrap();
        assert_eq!(boot.storage_uri.as_deref(), Some("https://diag.blob.core.windows.net"));

        let disk = &profile.storage_profile.as_ref().unwrap().data_disks[0];
        assert_eq!(disk.name.as_deref(), Some("my-vmss_etcddisk"));
        assert_eq!(disk.lun, 0);

        let extensions = &profile.extension_profile.as_ref().unwrap().extensions;
        assert_eq!(extensions[0].name.as_deref(), Some("CAPZ.Linux.Bootstrapping"));

        let ip = &profile.network_profile.as_ref().unwrap().network_interface_configurations[0]
            .properties
            .as_ref()
            .unwrap()
            .ip_configurations[0];
        assert_eq!(
            ip.properties.as_ref().unwrap().load_balancer_backend_address_pools[0].id.as_deref(),
            Some(resource_id::address_pool_id("123", "my-rg", "my-lb", "outbound").as_str())
        );
    }

    #[test]
    fn test_explicit_ultra_ssd_setting_wins() {
        let spec = ScaleSetSpec {
            ultra_ssd_enabled: Some(false),
            ..make_full_spec()
        };
        let vmss = build(&spec, &make_sku()).unwrap();
        assert_eq!(
            vmss.properties.unwrap().additional_capabilities.unwrap().ultra_ssd_enabled,
            Some(false)
        );
    }

    #[test]
    fn test_update_round_trip_drops_only_network_profile() {
        let mut full = build(&make_full_spec(), &make_sku()).unwrap();
        full.id = Some(resource_id::vmss_id("123", "my-rg", "my-vmss"));

        let update = to_update(&full).unwrap();
        assert!(
            update
                .properties
                .as_ref()
                .unwrap()
                .virtual_machine_profile
                .as_ref()
                .unwrap()
                .network_profile
                .is_none()
        );
        assert_eq!(update.sku, full.sku);

        let back = from_update(&update).unwrap();
        full.vm_profile_mut().unwrap().network_profile = None;
        assert_eq!(back, full);
    }
}
