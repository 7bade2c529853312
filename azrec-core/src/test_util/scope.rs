use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::ReconcileConfig;
use crate::error::{Error, Result};
use crate::future::{Future, FutureType, Futures};
use crate::models::Tags;
use crate::scalesets::{ScaleSetScope, ScaleSetSpec, ScaleSetView};
use crate::scope::{ClusterDescriber, FutureScope, NetworkDescriber};
use crate::services::availability_sets::{AvailabilitySetScope, AvailabilitySetSpec};
use crate::services::nat_gateways::{NatGatewayScope, NatGatewaySpec};
use crate::services::public_ips::{PublicIpScope, PublicIpSpec};
use crate::services::secrets::{SecretScope, SecretSpec};
use crate::services::subnets::{SubnetScope, SubnetSpec};
use crate::services::vaults::{VaultScope, VaultSpec};
use crate::services::vm_extensions::{VmExtensionScope, VmExtensionSpec};
use crate::services::vmss_extensions::{VmssExtensionScope, VmssExtensionSpec};

/// One condition report.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionUpdate {
    pub condition: String,
    pub service: String,
    pub operation: FutureType,
    /// Rendered error, `None` on success.
    pub error: Option<String>,
}

/// Everything the scope holds or records.
#[derive(Debug, Default)]
pub struct ScopeState {
    pub futures: Futures,
    pub conditions: Vec<ConditionUpdate>,
    pub config: ReconcileConfig,
    pub additional_tags: Tags,
    pub vnet_managed: bool,

    pub availability_set_spec: Option<AvailabilitySetSpec>,
    pub subnet_specs: Vec<SubnetSpec>,
    pub public_ip_specs: Vec<PublicIpSpec>,
    pub nat_gateway_specs: Vec<NatGatewaySpec>,
    pub vault_spec: Option<VaultSpec>,
    pub secret_specs: Vec<SecretSpec>,
    pub vm_extension_specs: Vec<VmExtensionSpec>,
    pub vmss_extension_specs: Vec<VmssExtensionSpec>,
    pub scale_set_spec: Option<ScaleSetSpec>,
    pub max_surge: i64,
    pub replicas_externally_managed: bool,

    pub subnet_ids: BTreeMap<String, String>,
    pub subnet_cidrs: BTreeMap<String, Vec<String>>,
    pub nat_gateway_ids: BTreeMap<String, String>,
    pub vmss_state: Option<ScaleSetView>,
    pub provider_id: Option<String>,
    pub replicas_reconciled: usize,
}

/// In-memory scope for cluster `test-cluster` in `my-rg`, `westeurope`.
pub struct TestScope {
    subscription_id: String,
    location: String,
    resource_group: String,
    cluster_name: String,
    vnet_name: String,
    state: Mutex<ScopeState>,
}

impl Default for TestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TestScope {
    pub fn new() -> Self {
        Self {
            subscription_id: "123".to_string(),
            location: "westeurope".to_string(),
            resource_group: "my-rg".to_string(),
            cluster_name: "test-cluster".to_string(),
            vnet_name: "my-vnet".to_string(),
            state: Mutex::new(ScopeState {
                vnet_managed: true,
                ..Default::default()
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most recent report for `condition`.
    pub fn last_condition(&self, condition: &str) -> Option<ConditionUpdate> {
        self.state()
            .conditions
            .iter()
            .rev()
            .find(|c| c.condition == condition)
            .cloned()
    }

    fn record(&self, condition: &str, service: &str, operation: FutureType, err: Option<&Error>) {
        self.state().conditions.push(ConditionUpdate {
            condition: condition.to_string(),
            service: service.to_string(),
            operation,
            error: err.map(|e| e.to_string()),
        });
    }
}

impl FutureScope for TestScope {
    fn get_long_running_operation_state(
        &self,
        name: &str,
        service_name: &str,
        kind: FutureType,
    ) -> Option<Future> {
        self.state().futures.get(name, service_name, kind).cloned()
    }

    fn set_long_running_operation_state(&self, future: Future) {
        self.state().futures.set(future);
    }

    fn delete_long_running_operation_state(&self, name: &str, service_name: &str, kind: FutureType) {
        self.state().futures.delete(name, service_name, kind);
    }

    fn update_put_status(&self, condition: &str, service_name: &str, err: Option<&Error>) {
        self.record(condition, service_name, FutureType::Put, err);
    }

    fn update_patch_status(&self, condition: &str, service_name: &str, err: Option<&Error>) {
        self.record(condition, service_name, FutureType::Patch, err);
    }

    fn update_delete_status(&self, condition: &str, service_name: &str, err: Option<&Error>) {
        self.record(condition, service_name, FutureType::Delete, err);
    }

    fn reconcile_config(&self) -> ReconcileConfig {
        self.state().config
    }
}

impl ClusterDescriber for TestScope {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn resource_group(&self) -> &str {
        &self.resource_group
    }

    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn additional_tags(&self) -> Tags {
        self.state().additional_tags.clone()
    }
}

impl NetworkDescriber for TestScope {
    fn is_vnet_managed(&self) -> bool {
        self.state().vnet_managed
    }

    fn vnet_name(&self) -> &str {
        &self.vnet_name
    }
}

impl AvailabilitySetScope for TestScope {
    fn availability_set_spec(&self) -> Option<AvailabilitySetSpec> {
        self.state().availability_set_spec.clone()
    }
}

impl SubnetScope for TestScope {
    fn subnet_specs(&self) -> Vec<SubnetSpec> {
        self.state().subnet_specs.clone()
    }

    fn update_subnet_id(&self, subnet_name: &str, id: &str) {
        self.state()
            .subnet_ids
            .insert(subnet_name.to_string(), id.to_string());
    }

    fn update_subnet_cidrs(&self, subnet_name: &str, cidrs: &[String]) {
        self.state()
            .subnet_cidrs
            .insert(subnet_name.to_string(), cidrs.to_vec());
    }
}

impl PublicIpScope for TestScope {
    fn public_ip_specs(&self) -> Vec<PublicIpSpec> {
        self.state().public_ip_specs.clone()
    }
}

impl NatGatewayScope for TestScope {
    fn nat_gateway_specs(&self) -> Vec<NatGatewaySpec> {
        self.state().nat_gateway_specs.clone()
    }

    fn set_nat_gateway_id_in_subnets(&self, nat_gateway_name: &str, id: &str) {
        self.state()
            .nat_gateway_ids
            .insert(nat_gateway_name.to_string(), id.to_string());
    }
}

impl VaultScope for TestScope {
    fn vault_spec(&self) -> Option<VaultSpec> {
        self.state().vault_spec.clone()
    }
}

impl SecretScope for TestScope {
    fn secret_specs(&self) -> Vec<SecretSpec> {
        self.state().secret_specs.clone()
    }
}

impl VmExtensionScope for TestScope {
    fn vm_extension_specs(&self) -> Vec<VmExtensionSpec> {
        self.state().vm_extension_specs.clone()
    }
}

impl VmssExtensionScope for TestScope {
    fn vmss_extension_specs(&self) -> Vec<VmssExtensionSpec> {
        self.state().vmss_extension_specs.clone()
    }
}

impl ScaleSetScope for TestScope {
    fn scale_set_spec(&self) -> Option<ScaleSetSpec> {
        self.state().scale_set_spec.clone()
    }

    fn max_surge(&self) -> i64 {
        self.state().max_surge
    }

    fn has_replicas_externally_managed(&self) -> bool {
        self.state().replicas_externally_managed
    }

    fn reconcile_replicas(&self, _view: &ScaleSetView) -> Result<()> {
        self.state().replicas_reconciled += 1;
        Ok(())
    }

    fn set_vmss_state(&self, view: &ScaleSetView) {
        self.state().vmss_state = Some(view.clone());
    }

    fn set_provider_id(&self, provider_id: &str) {
        self.state().provider_id = Some(provider_id.to_string());
    }
}
