//! Subnets of the cluster virtual network.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ServiceReconciler, within_service_timeout};
use crate::error::{ErrorPrecedence, Result};
use crate::models::{Resource, ServiceEndpoint, SubResource, Subnet, SubnetProperties};
use crate::reconciler::{AsyncReconciler, Creator};
use crate::resource_id;
use crate::scope::{FutureScope, NetworkDescriber, conditions};
use crate::spec::{ResourceSpec, existing_as};

pub const SERVICE_NAME: &str = "subnets";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetSpec {
    pub name: String,
    pub subscription_id: String,
    pub cidrs: Vec<String>,
    pub vnet_name: String,
    pub vnet_resource_group: String,
    pub is_vnet_managed: bool,
    pub route_table_name: Option<String>,
    pub security_group_name: Option<String>,
    pub nat_gateway_name: Option<String>,
    pub service_endpoints: Vec<ServiceEndpoint>,
}

impl ResourceSpec for SubnetSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.vnet_resource_group
    }

    fn owner_resource_name(&self) -> &str {
        &self.vnet_name
    }

    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>> {
        if existing_as::<Subnet>(existing)?.is_some() {
            // Subnets are not updated once created.
            return Ok(None);
        }

        let mut properties = SubnetProperties {
            service_endpoints: self.service_endpoints.clone(),
            ..Default::default()
        };
        // A single prefix goes into addressPrefix; some subscriptions reject
        // addressPrefixes without the IPv6 feature registered.
        match self.cidrs.as_slice() {
            [single] => properties.address_prefix = Some(single.clone()),
            cidrs => properties.address_prefixes = cidrs.to_vec(),
        }
        let group = &self.vnet_resource_group;
        if let Some(route_table) = &self.route_table_name {
            properties.route_table = Some(SubResource::new(resource_id::route_table_id(
                &self.subscription_id,
                group,
                route_table,
            )));
        }
        if let Some(security_group) = &self.security_group_name {
            properties.network_security_group = Some(SubResource::new(
                resource_id::security_group_id(&self.subscription_id, group, security_group),
            ));
        }
        if let Some(nat_gateway) = &self.nat_gateway_name {
            properties.nat_gateway = Some(SubResource::new(resource_id::nat_gateway_id(
                &self.subscription_id,
                group,
                nat_gateway,
            )));
        }

        Ok(Some(Resource::from(Subnet {
            name: Some(self.name.clone()),
            properties: Some(properties),
            ..Default::default()
        })))
    }
}

pub trait SubnetScope: FutureScope + NetworkDescriber {
    fn subnet_specs(&self) -> Vec<SubnetSpec>;
    fn update_subnet_id(&self, subnet_name: &str, id: &str);
    fn update_subnet_cidrs(&self, subnet_name: &str, cidrs: &[String]);
}

/// Canonical form of a CIDR list for comparison.
fn normalized_cidrs(cidrs: &[String]) -> BTreeSet<String> {
    cidrs
        .iter()
        .map(|cidr| match cidr.parse::<IpNet>() {
            Ok(net) => net.trunc().to_string(),
            Err(_) => cidr.clone(),
        })
        .collect()
}

/// True when both lists name the same networks in any order.
pub fn cidrs_equal(a: &[String], b: &[String]) -> bool {
    normalized_cidrs(a) == normalized_cidrs(b)
}

pub struct Service<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    reconciler: AsyncReconciler<S, C>,
}

impl<S, C> Service<S, C>
where
    S: SubnetScope + ?Sized,
    C: Creator + ?Sized,
{
    pub fn new(scope: Arc<S>, client: Arc<C>, cancel: CancellationToken) -> Self {
        Self {
            reconciler: AsyncReconciler::new(Arc::clone(&scope), client, cancel),
            scope,
        }
    }

    async fn reconcile_specs(&self, specs: &[SubnetSpec]) -> Result<()> {
        let mut precedence = ErrorPrecedence::new();
        for spec in specs {
            let result = self
                .reconciler
                .create_or_update_resource(spec, SERVICE_NAME)
                .await
                .and_then(|result| {
                    if let Some(resource) = result {
                        self.record_observed(spec, Subnet::try_from(resource)?);
                    }
                    Ok(())
                });
            precedence.observe(result);
        }
        precedence.into_result()
    }

    fn record_observed(&self, spec: &SubnetSpec, subnet: Subnet) {
        if let Some(id) = subnet.id.as_deref() {
            self.scope.update_subnet_id(&spec.name, id);
        }
        let observed = subnet.cidr_blocks();
        if !observed.is_empty() && !cidrs_equal(&observed, &spec.cidrs) {
            debug!(
                "Subnet {} has CIDRs {:?}, desired {:?}",
                spec.name, observed, spec.cidrs
            );
            self.scope.update_subnet_cidrs(&spec.name, &observed);
        }
    }
}

#[async_trait]
impl<S, C> ServiceReconciler for Service<S, C>
where
    S: SubnetScope + ?Sized,
    C: Creator + ?Sized,
{
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<()> {
        let specs = self.scope.subnet_specs();
        if specs.is_empty() {
            return Ok(());
        }
        let result = within_service_timeout(
            self.scope.as_ref(),
            self.reconciler.cancellation_token(),
            SERVICE_NAME,
            self.reconcile_specs(&specs),
        )
        .await;
        if self.scope.is_vnet_managed() {
            self.scope
                .update_put_status(conditions::SUBNETS_READY, SERVICE_NAME, result.as_ref().err());
        }
        result
    }

    /// Subnets go away with their virtual network.
    async fn delete(&self) -> Result<()> {
        if self.scope.is_vnet_managed() {
            self.scope
                .update_delete_status(conditions::SUBNETS_READY, SERVICE_NAME, None);
        }
        Ok(())
    }
}
