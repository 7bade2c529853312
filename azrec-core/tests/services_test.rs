//! Per-resource service behaviour through the public API.

use std::sync::Arc;

use azrec_core::ServiceReconciler;
use azrec_core::future::{Future, FutureType};
use azrec_core::models::{
    AvailabilitySet, AvailabilitySetProperties, PublicIpAddress, ResourceSku,
    ResourceSkuCapabilities, SubResource,
};
use azrec_core::scalesets::{ScaleSetSpec, from_update, to_update};
use azrec_core::scope::conditions;
use azrec_core::services::availability_sets::{self, AvailabilitySetSpec};
use azrec_core::services::nat_gateways::{self, NatGatewaySpec};
use azrec_core::services::public_ips::{self, PublicIpSpec};
use azrec_core::sku::capabilities;
use azrec_core::spec::ResourceSpec;
use azrec_core::test_util::{FakeCloud, TestScope, Write};
use tokio_util::sync::CancellationToken;

fn make_availability_set_spec() -> AvailabilitySetSpec {
    AvailabilitySetSpec {
        name: "test-as".to_string(),
        resource_group: "my-rg".to_string(),
        cluster_name: "test-cluster".to_string(),
        location: "westeurope".to_string(),
        sku: Some(ResourceSku {
            name: "Aligned".to_string(),
            resource_type: "availabilitySets".to_string(),
            capabilities: vec![ResourceSkuCapabilities::new(
                capabilities::MAXIMUM_PLATFORM_FAULT_DOMAIN_COUNT,
                "3",
            )],
            ..Default::default()
        }),
        additional_tags: Default::default(),
    }
}

fn availability_set_service(
    scope: &Arc<TestScope>,
    cloud: &Arc<FakeCloud>,
) -> availability_sets::Service<TestScope, FakeCloud> {
    availability_sets::Service::new(Arc::clone(scope), Arc::clone(cloud), CancellationToken::new())
}

/// An availability set with an attached VM is kept.
#[tokio::test]
async fn test_availability_set_with_vms_is_not_deleted() {
    let scope = Arc::new(TestScope::new());
    scope.state().availability_set_spec = Some(make_availability_set_spec());
    let cloud = Arc::new(FakeCloud::new());
    cloud.insert(
        "test-as",
        AvailabilitySet {
            name: Some("test-as".to_string()),
            properties: Some(AvailabilitySetProperties {
                virtual_machines: vec![SubResource::new(
                    "/subscriptions/123/resourceGroups/my-rg/providers/Microsoft.Compute/virtualMachines/vm-0",
                )],
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    let futures_before = scope.state().futures.clone();

    availability_set_service(&scope, &cloud).delete().await.unwrap();

    assert!(cloud.writes().is_empty());
    assert!(cloud.get_resource("test-as").is_some());
    assert_eq!(scope.state().futures, futures_before);
    let condition = scope
        .last_condition(conditions::AVAILABILITY_SET_READY)
        .unwrap();
    assert!(condition.error.is_none());
    assert_eq!(condition.operation, FutureType::Delete);
}

#[tokio::test]
async fn test_availability_set_reconcile_is_idempotent() {
    let scope = Arc::new(TestScope::new());
    scope.state().availability_set_spec = Some(make_availability_set_spec());
    let cloud = Arc::new(FakeCloud::new());
    let service = availability_set_service(&scope, &cloud);

    service.reconcile().await.unwrap();
    service.reconcile().await.unwrap();

    let writes = cloud.writes();
    assert_eq!(writes.len(), 1);
    let Write::CreateOrUpdate { parameters, .. } = &writes[0] else {
        panic!("expected a create, got {:?}", writes[0]);
    };
    let set: &AvailabilitySet = parameters.try_into().unwrap();
    assert_eq!(
        set.properties.as_ref().unwrap().platform_fault_domain_count,
        Some(3)
    );
}

#[tokio::test]
async fn test_delete_of_absent_resources_needs_no_writes() {
    let scope = Arc::new(TestScope::new());
    scope.state().availability_set_spec = Some(make_availability_set_spec());
    scope.state().public_ip_specs = vec![PublicIpSpec {
        name: "pip-node".to_string(),
        resource_group: "my-rg".to_string(),
        cluster_name: "test-cluster".to_string(),
        location: "westeurope".to_string(),
        ..Default::default()
    }];
    let cloud = Arc::new(FakeCloud::new());

    availability_set_service(&scope, &cloud).delete().await.unwrap();
    public_ips::Service::new(Arc::clone(&scope), Arc::clone(&cloud), CancellationToken::new())
        .delete()
        .await
        .unwrap();

    assert!(cloud.writes().is_empty());
    assert!(scope.state().futures.is_empty());
}

#[tokio::test]
async fn test_existing_public_ip_is_never_updated() {
    let spec = PublicIpSpec {
        name: "pip-node".to_string(),
        resource_group: "my-rg".to_string(),
        cluster_name: "test-cluster".to_string(),
        location: "westeurope".to_string(),
        dns_name: Some("node.westeurope.cloudapp.azure.com".to_string()),
        ..Default::default()
    };
    let existing = PublicIpAddress {
        name: Some("pip-node".to_string()),
        ..Default::default()
    };
    assert!(spec.parameters(Some(&existing.clone().into())).unwrap().is_none());

    let scope = Arc::new(TestScope::new());
    scope.state().public_ip_specs = vec![spec];
    let cloud = Arc::new(FakeCloud::new());
    cloud.insert("pip-node", existing);

    public_ips::Service::new(Arc::clone(&scope), Arc::clone(&cloud), CancellationToken::new())
        .reconcile()
        .await
        .unwrap();
    assert!(cloud.writes().is_empty());
}

#[tokio::test]
async fn test_pending_nat_gateway_then_subnet_hand_off() {
    let scope = Arc::new(TestScope::new());
    scope.state().nat_gateway_specs = vec![NatGatewaySpec {
        name: "node-natgw".to_string(),
        resource_group: "my-rg".to_string(),
        subscription_id: "123".to_string(),
        location: "westeurope".to_string(),
        cluster_name: "test-cluster".to_string(),
        public_ip_name: "pip-node-natgw".to_string(),
        additional_tags: Default::default(),
    }];
    let cloud = Arc::new(FakeCloud::new());
    cloud.state().pending = true;
    let service =
        nat_gateways::Service::new(Arc::clone(&scope), Arc::clone(&cloud), CancellationToken::new());

    let err = service.reconcile().await.unwrap_err();
    assert!(err.is_operation_not_done());
    assert!(scope.state().nat_gateway_ids.is_empty());
    assert_eq!(scope.state().futures.len(), 1);

    service.reconcile().await.unwrap();
    assert!(scope.state().futures.is_empty());
    assert!(scope.state().nat_gateway_ids.contains_key("node-natgw"));
    // The persisted operation was resumed, not resubmitted.
    assert_eq!(cloud.writes().len(), 1);
}

#[test]
fn test_future_round_trip_keeps_payload() {
    let future = Future::new(
        FutureType::Delete,
        "publicips",
        "pip-node",
        "my-rg",
        &serde_json::json!({"pollingUrl": "https://management.azure.com/operations/42"}),
    )
    .unwrap()
    .with_delay_hint(std::time::Duration::from_secs(20));

    let json = serde_json::to_string(&future).unwrap();
    let decoded: Future = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, future);
    let state: serde_json::Value = decoded.decode_state().unwrap();
    assert_eq!(state["pollingUrl"], "https://management.azure.com/operations/42");
}

#[test]
fn test_update_round_trip_drops_only_network_profile() {
    use azrec_core::models::ImageReference;
    use azrec_core::scalesets::validate;
    use azrec_core::sku::SkuCache;

    let sku = ResourceSku {
        name: "VM_SIZE".to_string(),
        resource_type: "virtualMachines".to_string(),
        capabilities: vec![
            ResourceSkuCapabilities::new(capabilities::VCPUS, "2"),
            ResourceSkuCapabilities::new(capabilities::MEMORY_GB, "8"),
        ],
        ..Default::default()
    };
    let spec = ScaleSetSpec {
        name: "my-vmss".to_string(),
        resource_group: "my-rg".to_string(),
        subscription_id: "123".to_string(),
        location: "westeurope".to_string(),
        cluster_name: "test-cluster".to_string(),
        size: "VM_SIZE".to_string(),
        capacity: 1,
        image: ImageReference {
            id: Some("/subscriptions/123/resourceGroups/images/providers/Microsoft.Compute/images/node".to_string()),
            ..Default::default()
        },
        admin_username: "capi".to_string(),
        ssh_key_data: "ssh-rsa AAAA".to_string(),
        bootstrap_data: "#cloud-config".to_string(),
        vnet_name: "my-vnet".to_string(),
        subnet_name: "node-subnet".to_string(),
        sku: Some(sku.clone()),
        ..Default::default()
    };
    validate(&spec, &sku, &SkuCache::new("westeurope", vec![sku.clone()])).unwrap();

    let resource = spec.parameters(None).unwrap().unwrap();
    let full: azrec_core::models::VirtualMachineScaleSet = resource.try_into().unwrap();
    assert!(full.vm_profile().unwrap().network_profile.is_some());

    let back = from_update(&to_update(&full).unwrap()).unwrap();
    let mut expected = full;
    expected.vm_profile_mut().unwrap().network_profile = None;
    assert_eq!(back, expected);
}
