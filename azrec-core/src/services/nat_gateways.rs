//! NAT gateways giving node subnets outbound connectivity.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ServiceReconciler, within_service_timeout};
use crate::error::{ErrorPrecedence, Result};
use crate::models::{NatGateway, NatGatewayProperties, NatGatewaySku, Resource, SubResource, Tags};
use crate::reconciler::{AsyncReconciler, Creator, Deleter};
use crate::resource_id;
use crate::scope::{FutureScope, NetworkDescriber, conditions};
use crate::spec::{ResourceSpec, existing_as};
use crate::tags::{self, BuildParams, ResourceLifecycle};

pub const SERVICE_NAME: &str = "natgateways";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NatGatewaySpec {
    pub name: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub location: String,
    pub cluster_name: String,
    /// Public IP attached to the gateway; created by the public IP service.
    pub public_ip_name: String,
    pub additional_tags: Tags,
}

impl ResourceSpec for NatGatewaySpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>> {
        let existing = existing_as::<NatGateway>(existing)?;
        if existing.is_some_and(|gateway| gateway.has_public_ip(&self.public_ip_name)) {
            return Ok(None);
        }

        Ok(Some(Resource::from(NatGateway {
            name: Some(self.name.clone()),
            location: Some(self.location.clone()),
            sku: Some(NatGatewaySku {
                name: Some("Standard".to_string()),
            }),
            tags: tags::build(BuildParams {
                cluster_name: &self.cluster_name,
                lifecycle: ResourceLifecycle::Owned,
                name: Some(&self.name),
                role: None,
                additional: &self.additional_tags,
            }),
            properties: Some(NatGatewayProperties {
                public_ip_addresses: vec![SubResource::new(resource_id::public_ip_id(
                    &self.subscription_id,
                    &self.resource_group,
                    &self.public_ip_name,
                ))],
                ..Default::default()
            }),
            ..Default::default()
        })))
    }
}

pub trait NatGatewayScope: FutureScope + NetworkDescriber {
    fn nat_gateway_specs(&self) -> Vec<NatGatewaySpec>;

    /// Point every subnet that uses `nat_gateway_name` at the gateway ID.
    fn set_nat_gateway_id_in_subnets(&self, nat_gateway_name: &str, id: &str);
}

pub struct Service<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    reconciler: AsyncReconciler<S, C>,
}

impl<S, C> Service<S, C>
where
    S: NatGatewayScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    pub fn new(scope: Arc<S>, client: Arc<C>, cancel: CancellationToken) -> Self {
        Self {
            reconciler: AsyncReconciler::new(Arc::clone(&scope), client, cancel),
            scope,
        }
    }

    async fn reconcile_specs(&self, specs: &[NatGatewaySpec]) -> Result<()> {
        let mut precedence = ErrorPrecedence::new();
        for spec in specs {
            let result = self
                .reconciler
                .create_or_update_resource(spec, SERVICE_NAME)
                .await
                .and_then(|result| {
                    if let Some(resource) = result {
                        let gateway = NatGateway::try_from(resource)?;
                        if let Some(id) = gateway.id.as_deref() {
                            self.scope.set_nat_gateway_id_in_subnets(&spec.name, id);
                        }
                    }
                    Ok(())
                });
            precedence.observe(result);
        }
        precedence.into_result()
    }

    async fn delete_specs(&self, specs: &[NatGatewaySpec]) -> Result<()> {
        let mut precedence = ErrorPrecedence::new();
        for spec in specs {
            precedence.observe(self.reconciler.delete_resource(spec, SERVICE_NAME).await);
        }
        precedence.into_result()
    }
}

#[async_trait]
impl<S, C> ServiceReconciler for Service<S, C>
where
    S: NatGatewayScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<()> {
        if !self.scope.is_vnet_managed() {
            debug!("Skipping NAT gateway reconcile in custom vnet mode");
            return Ok(());
        }
        let specs = self.scope.nat_gateway_specs();
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
        self.scope.update_put_status(
            conditions::NAT_GATEWAYS_READY,
            SERVICE_NAME,
            result.as_ref().err(),
        );
        result
    }

    async fn delete(&self) -> Result<()> {
        if !self.scope.is_vnet_managed() {
            debug!("Skipping NAT gateway deletion in custom vnet mode");
            return Ok(());
        }
        let specs = self.scope.nat_gateway_specs();
        if specs.is_empty() {
            return Ok(());
        }
        let result = within_service_timeout(
            self.scope.as_ref(),
            self.reconciler.cancellation_token(),
            SERVICE_NAME,
            self.delete_specs(&specs),
        )
        .await;
        self.scope.update_delete_status(
            conditions::NAT_GATEWAYS_READY,
            SERVICE_NAME,
            result.as_ref().err(),
        );
        result
    }
}
