//! Availability sets for clusters that do not use availability zones.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ServiceReconciler, within_service_timeout};
use crate::error::{Error, Result};
use crate::future::FutureType;
use crate::models::{
    AVAILABILITY_SET_SKU_ALIGNED, AvailabilitySet, AvailabilitySetProperties, Resource,
    ResourceSku, Sku, Tags,
};
use crate::reconciler::{AsyncReconciler, Creator, Deleter};
use crate::scope::{FutureScope, conditions};
use crate::sku::capabilities;
use crate::spec::{ResourceSpec, existing_as};
use crate::tags::{self, BuildParams, ResourceLifecycle};

pub const SERVICE_NAME: &str = "availabilitysets";

#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilitySetSpec {
    pub name: String,
    pub resource_group: String,
    pub cluster_name: String,
    pub location: String,
    /// `Aligned` availability set SKU of the location, resolved by the scope.
    pub sku: Option<ResourceSku>,
    pub additional_tags: Tags,
}

impl ResourceSpec for AvailabilitySetSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>> {
        if existing_as::<AvailabilitySet>(existing)?.is_some() {
            // Availability sets are immutable once created.
            return Ok(None);
        }

        let sku = self.sku.as_ref().ok_or_else(|| {
            Error::terminal("unable to get required availability set SKU from machine cache")
        })?;
        let fault_domains = sku
            .get_capability(capabilities::MAXIMUM_PLATFORM_FAULT_DOMAIN_COUNT)
            .ok_or_else(|| {
                Error::terminal(format!(
                    "unable to get required availability set SKU capability {}",
                    capabilities::MAXIMUM_PLATFORM_FAULT_DOMAIN_COUNT
                ))
            })?;
        let fault_domains: i32 = fault_domains.parse().map_err(|_| {
            Error::terminal(format!(
                "unable to parse availability set fault domain count {:?}",
                fault_domains
            ))
        })?;

        Ok(Some(Resource::from(AvailabilitySet {
            name: Some(self.name.clone()),
            location: Some(self.location.clone()),
            tags: tags::build(BuildParams {
                cluster_name: &self.cluster_name,
                lifecycle: ResourceLifecycle::Owned,
                name: Some(&self.name),
                role: Some(tags::roles::COMMON),
                additional: &self.additional_tags,
            }),
            sku: Some(Sku {
                name: Some(AVAILABILITY_SET_SKU_ALIGNED.to_string()),
                ..Default::default()
            }),
            properties: Some(AvailabilitySetProperties {
                platform_fault_domain_count: Some(fault_domains),
                ..Default::default()
            }),
            ..Default::default()
        })))
    }
}

pub trait AvailabilitySetScope: FutureScope {
    /// `None` when the cluster does not use an availability set.
    fn availability_set_spec(&self) -> Option<AvailabilitySetSpec>;
}

pub struct Service<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    reconciler: AsyncReconciler<S, C>,
}

impl<S, C> Service<S, C>
where
    S: AvailabilitySetScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    pub fn new(scope: Arc<S>, client: Arc<C>, cancel: CancellationToken) -> Self {
        Self {
            reconciler: AsyncReconciler::new(Arc::clone(&scope), client, cancel),
            scope,
        }
    }

    async fn delete_if_empty(&self, spec: &AvailabilitySetSpec) -> Result<()> {
        if self
            .scope
            .get_long_running_operation_state(&spec.name, SERVICE_NAME, FutureType::Delete)
            .is_some()
        {
            return self.reconciler.delete_resource(spec, SERVICE_NAME).await;
        }

        let Some(existing) = self.reconciler.get_existing(spec, SERVICE_NAME).await? else {
            return Ok(());
        };
        let set = AvailabilitySet::try_from(existing)?;
        if set.properties.is_none() || set.has_virtual_machines() {
            info!(
                "Skipping deletion of availability set {}: virtual machines still attached",
                spec.name
            );
            return Ok(());
        }
        self.reconciler.delete_resource(spec, SERVICE_NAME).await
    }
}

#[async_trait]
impl<S, C> ServiceReconciler for Service<S, C>
where
    S: AvailabilitySetScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<()> {
        let Some(spec) = self.scope.availability_set_spec() else {
            return Ok(());
        };
        let result = within_service_timeout(
            self.scope.as_ref(),
            self.reconciler.cancellation_token(),
            SERVICE_NAME,
            self.reconciler.create_or_update_resource(&spec, SERVICE_NAME),
        )
        .await
        .map(|_| ());
        self.scope.update_put_status(
            conditions::AVAILABILITY_SET_READY,
            SERVICE_NAME,
            result.as_ref().err(),
        );
        result
    }

    async fn delete(&self) -> Result<()> {
        let Some(spec) = self.scope.availability_set_spec() else {
            return Ok(());
        };
        let result = within_service_timeout(
            self.scope.as_ref(),
            self.reconciler.cancellation_token(),
            SERVICE_NAME,
            self.delete_if_empty(&spec),
        )
        .await;
        self.scope.update_delete_status(
            conditions::AVAILABILITY_SET_READY,
            SERVICE_NAME,
            result.as_ref().err(),
        );
        result
    }
}
