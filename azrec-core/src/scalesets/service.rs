use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ScaleSetSpec, ScaleSetView, to_update, validate};
use crate::error::{CONFLICT_REQUEUE, Error, Result};
use crate::future::FutureType;
use crate::models::{
    Resource, VirtualMachineScaleSet, VirtualMachineScaleSetUpdate, VirtualMachineScaleSetVm,
};
use crate::reconciler::{AsyncOutcome, AsyncReconciler, Creator, Deleter};
use crate::resource_id;
use crate::scope::{FutureScope, conditions};
use crate::services::{ServiceReconciler, within_service_timeout};
use crate::sku::{ResourceType, SkuCache};
use crate::spec::ResourceSpec;

pub const SERVICE_NAME: &str = "scalesets";

/// Scale set specific calls on top of the generic create and delete.
#[async_trait]
pub trait ScaleSetClient: Creator + Deleter {
    async fn list(&self, resource_group: &str) -> Result<Vec<VirtualMachineScaleSet>>;

    async fn list_instances(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Vec<VirtualMachineScaleSetVm>>;

    /// Submit a PATCH. Client side retries must be off so that conflicts
    /// reach the caller.
    async fn update_async(
        &self,
        spec: &dyn ResourceSpec,
        parameters: VirtualMachineScaleSetUpdate,
    ) -> Result<AsyncOutcome>;

    /// Roll the given instances to the latest model.
    async fn update_instances(
        &self,
        resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<()>;
}

/// Outer loop hooks of a machine pool.
pub trait ScaleSetScope: FutureScope {
    fn scale_set_spec(&self) -> Option<ScaleSetSpec>;

    /// Extra instances allowed above the desired capacity during a rollout.
    fn max_surge(&self) -> i64;

    /// An external autoscaler owns the replica count.
    fn has_replicas_externally_managed(&self) -> bool;

    /// Create or delete per-instance records for the fetched scale set.
    fn reconcile_replicas(&self, view: &ScaleSetView) -> Result<()>;

    fn set_vmss_state(&self, view: &ScaleSetView);

    fn set_provider_id(&self, provider_id: &str);
}

pub struct Service<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    reconciler: AsyncReconciler<S, C>,
    skus: Arc<SkuCache>,
}

impl<S, C> Service<S, C>
where
    S: ScaleSetScope + ?Sized,
    C: ScaleSetClient + ?Sized,
{
    pub fn new(
        scope: Arc<S>,
        client: Arc<C>,
        skus: Arc<SkuCache>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reconciler: AsyncReconciler::new(Arc::clone(&scope), client, cancel),
            scope,
            skus,
        }
    }

    /// Resolve the SKU and validate the desired scale set. Nothing is sent to the cloud.
    fn resolve(&self, mut spec: ScaleSetSpec) -> Result<ScaleSetSpec> {
        let sku = self.skus.get(&spec.size, ResourceType::VirtualMachines)?;
        validate(&spec, sku, &self.skus)?;
        spec.sku = Some(sku.clone());
        spec.max_surge = self.scope.max_surge();
        spec.replicas_externally_managed = self.scope.has_replicas_externally_managed();
        Ok(spec)
    }

    /// Fetch the scale set and its instances.
    async fn fetch(
        &self,
        spec: &ScaleSetSpec,
    ) -> Result<Option<(VirtualMachineScaleSet, Vec<VirtualMachineScaleSetVm>)>> {
        let Some(resource) = self.reconciler.get_existing(spec, SERVICE_NAME).await? else {
            return Ok(None);
        };
        let vmss = VirtualMachineScaleSet::try_from(resource)?;
        let instances = self
            .reconciler
            .call(
                "list_instances",
                self.reconciler
                    .client()
                    .list_instances(&spec.resource_group, &spec.name),
            )
            .await
            .map_err(|err| {
                err.context(format!(
                    "failed to list instances of VMSS {}/{}",
                    spec.resource_group, spec.name
                ))
            })?;
        Ok(Some((vmss, instances)))
    }

    /// Hand the observed state to the outer loop.
    fn publish(&self, view: &ScaleSetView) -> Result<()> {
        self.scope
            .reconcile_replicas(view)
            .map_err(|err| err.context("unable to reconcile VMSS replicas"))?;
        if !view.id.is_empty() {
            let provider_id = resource_id::provider_id(&view.id)?;
            self.scope.set_provider_id(&provider_id);
        }
        self.scope.set_vmss_state(view);
        Ok(())
    }

    async fn fetch_and_publish(&self, spec: &ScaleSetSpec) -> Result<()> {
        if let Some((vmss, instances)) = self.fetch(spec).await? {
            self.publish(&ScaleSetView::new(&vmss, &instances))?;
        }
        Ok(())
    }

    async fn reconcile_scale_set(&self, spec: ScaleSetSpec) -> Result<()> {
        let mut spec = self.resolve(spec)?;

        for kind in [FutureType::Put, FutureType::Patch] {
            if let Some(future) =
                self.scope
                    .get_long_running_operation_state(&spec.name, SERVICE_NAME, kind)
            {
                self.reconciler.process_ongoing_operation(future).await?;
                return self.fetch_and_publish(&spec).await;
            }
        }

        let Some((vmss, instances)) = self.fetch(&spec).await? else {
            return self.create(&spec).await;
        };
        self.publish(&ScaleSetView::new(&vmss, &instances))?;
        spec.instances = instances;
        self.patch(&spec, vmss).await
    }

    async fn create(&self, spec: &ScaleSetSpec) -> Result<()> {
        let parameters = spec.parameters(None)?.ok_or_else(|| {
            Error::internal(format!("no create parameters for VMSS {}", spec.name))
        })?;

        info!(
            service = SERVICE_NAME,
            resource = %spec.name,
            resource_group = %spec.resource_group,
            "Creating VMSS"
        );
        let outcome = self
            .reconciler
            .call(
                "create_or_update",
                self.reconciler
                    .client()
                    .create_or_update_async(spec, parameters),
            )
            .await
            .map_err(|err| {
                err.context(format!(
                    "failed to create VMSS {}/{}",
                    spec.resource_group, spec.name
                ))
            })?;

        match outcome {
            AsyncOutcome::Completed(Some(resource)) => {
                let vmss = VirtualMachineScaleSet::try_from(resource)?;
                self.publish(&ScaleSetView::new(&vmss, &[]))
            }
            AsyncOutcome::Completed(None) => Ok(()),
            AsyncOutcome::Pending(handle) => {
                Err(self
                    .reconciler
                    .park(handle, FutureType::Put, spec, SERVICE_NAME))
            }
        }
    }

    async fn patch(&self, spec: &ScaleSetSpec, existing: VirtualMachineScaleSet) -> Result<()> {
        let existing = Resource::from(existing);
        let desired = spec.parameters(Some(&existing)).map_err(|err| {
            err.context(format!(
                "failed to get desired parameters for VMSS {}/{}",
                spec.resource_group, spec.name
            ))
        })?;
        let Some(desired) = desired else {
            debug!(
                service = SERVICE_NAME,
                resource = %spec.name,
                "VMSS is up to date"
            );
            return Ok(());
        };
        let desired = VirtualMachineScaleSet::try_from(desired)?;
        let update = to_update(&desired)?;

        info!(
            service = SERVICE_NAME,
            resource = %spec.name,
            resource_group = %spec.resource_group,
            capacity = ?desired.capacity(),
            "Patching VMSS"
        );
        let result = self
            .reconciler
            .call(
                "update",
                self.reconciler.client().update_async(spec, update),
            )
            .await;

        match result {
            Ok(AsyncOutcome::Completed(Some(resource))) => {
                let vmss = VirtualMachineScaleSet::try_from(resource)?;
                self.publish(&ScaleSetView::new(&vmss, &spec.instances))
            }
            Ok(AsyncOutcome::Completed(None)) => Ok(()),
            Ok(AsyncOutcome::Pending(handle)) => {
                Err(self
                    .reconciler
                    .park(handle, FutureType::Patch, spec, SERVICE_NAME))
            }
            Err(err) if err.is_conflict() => Err(Error::transient(
                err.context(format!(
                    "conflict while patching VMSS {}/{}",
                    spec.resource_group, spec.name
                )),
                CONFLICT_REQUEUE,
            )),
            Err(err) => Err(err.context(format!(
                "failed to patch VMSS {}/{}",
                spec.resource_group, spec.name
            ))),
        }
    }

    /// Scale sets in `resource_group`.
    pub async fn list(&self, resource_group: &str) -> Result<Vec<VirtualMachineScaleSet>> {
        self.reconciler
            .call("list", self.reconciler.client().list(resource_group))
            .await
            .map_err(|err| {
                err.context(format!("failed to list VMSS in resource group {}", resource_group))
            })
    }

    /// Roll `instance_ids` of the desired scale set to the latest model.
    pub async fn update_instances(&self, instance_ids: &[String]) -> Result<()> {
        let Some(spec) = self.scope.scale_set_spec() else {
            return Ok(());
        };
        if instance_ids.is_empty() {
            return Ok(());
        }
        info!(
            service = SERVICE_NAME,
            resource = %spec.name,
            count = instance_ids.len(),
            "Updating VMSS instances to the latest model"
        );
        self.reconciler
            .call(
                "update_instances",
                self.reconciler.client().update_instances(
                    &spec.resource_group,
                    &spec.name,
                    instance_ids,
                ),
            )
            .await
            .map_err(|err| {
                err.context(format!(
                    "failed to update instances of VMSS {}/{}",
                    spec.resource_group, spec.name
                ))
            })
    }
}

#[async_trait]
impl<S, C> ServiceReconciler for Service<S, C>
where
    S: ScaleSetScope + ?Sized,
    C: ScaleSetClient + ?Sized,
{
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<()> {
        let Some(spec) = self.scope.scale_set_spec() else {
            return Ok(());
        };
        let result = within_service_timeout(
            self.scope.as_ref(),
            self.reconciler.cancellation_token(),
            SERVICE_NAME,
            self.reconcile_scale_set(spec),
        )
        .await;
        self.scope.update_put_status(
            conditions::BOOTSTRAP_SUCCEEDED,
            SERVICE_NAME,
            result.as_ref().err(),
        );
        result
    }

    async fn delete(&self) -> Result<()> {
        let Some(spec) = self.scope.scale_set_spec() else {
            return Ok(());
        };
        let result = within_service_timeout(
            self.scope.as_ref(),
            self.reconciler.cancellation_token(),
            SERVICE_NAME,
            self.reconciler.delete_resource(&spec, SERVICE_NAME),
        )
        .await;

        // Best effort: publish whatever is left of the scale set.
        match self.fetch(&spec).await {
            Ok(Some((vmss, instances))) => {
                self.scope
                    .set_vmss_state(&ScaleSetView::new(&vmss, &instances));
            }
            Ok(None) => {}
            Err(err) => {
                warn!("failed to get VMSS {} in deferred update: {}", spec.name, err);
            }
        }

        self.scope.update_delete_status(
            conditions::BOOTSTRAP_SUCCEEDED,
            SERVICE_NAME,
            result.as_ref().err(),
        );
        result
    }
}
