//! Extensions installed on scale sets.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::vm_extensions::ExtensionSpec;
use super::{ServiceReconciler, within_service_timeout};
use crate::error::{ErrorPrecedence, Result};
use crate::models::{Resource, VirtualMachineScaleSetExtension};
use crate::reconciler::{AsyncReconciler, Creator};
use crate::scope::{FutureScope, conditions};
use crate::spec::{ResourceSpec, existing_as};

pub const SERVICE_NAME: &str = "vmssextensions";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmssExtensionSpec {
    pub extension: ExtensionSpec,
    pub scale_set_name: String,
    pub resource_group: String,
}

impl VmssExtensionSpec {
    /// Extension entry of a scale set extension profile.
    pub fn to_extension(&self) -> Result<VirtualMachineScaleSetExtension> {
        Ok(VirtualMachineScaleSetExtension {
            id: None,
            name: Some(self.extension.name.clone()),
            properties: Some(self.extension.properties()?),
        })
    }
}

impl ResourceSpec for VmssExtensionSpec {
    fn resource_name(&self) -> &str {
        &self.extension.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> &str {
        &self.scale_set_name
    }

    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>> {
        if existing_as::<VirtualMachineScaleSetExtension>(existing)?.is_some() {
            return Ok(None);
        }
        Ok(Some(Resource::from(self.to_extension()?)))
    }
}

pub trait VmssExtensionScope: FutureScope {
    fn vmss_extension_specs(&self) -> Vec<VmssExtensionSpec>;
}

pub struct Service<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    reconciler: AsyncReconciler<S, C>,
}

impl<S, C> Service<S, C>
where
    S: VmssExtensionScope + ?Sized,
    C: Creator + ?Sized,
{
    pub fn new(scope: Arc<S>, client: Arc<C>, cancel: CancellationToken) -> Self {
        Self {
            reconciler: AsyncReconciler::new(Arc::clone(&scope), client, cancel),
            scope,
        }
    }

    async fn reconcile_specs(&self, specs: &[VmssExtensionSpec]) -> Result<()> {
        let mut precedence = ErrorPrecedence::new();
        for spec in specs {
            precedence.observe(
                self.reconciler
                    .create_or_update_resource(spec, SERVICE_NAME)
                    .await
                    .map(|_| ()),
            );
        }
        precedence.into_result()
    }
}

#[async_trait]
impl<S, C> ServiceReconciler for Service<S, C>
where
    S: VmssExtensionScope + ?Sized,
    C: Creator + ?Sized,
{
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<()> {
        let specs = self.scope.vmss_extension_specs();
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
            conditions::BOOTSTRAP_SUCCEEDED,
            SERVICE_NAME,
            result.as_ref().err(),
        );
        result
    }

    /// Extensions are removed together with their scale set.
    async fn delete(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FakeCloud, TestScope};

    fn make_spec() -> VmssExtensionSpec {
        VmssExtensionSpec {
            extension: ExtensionSpec {
                name: "CAPZ.Linux.Bootstrapping".to_string(),
                publisher: "Microsoft.Azure.ContainerUpstream".to_string(),
                version: "1.0".to_string(),
                ..Default::default()
            },
            scale_set_name: "my-vmss".to_string(),
            resource_group: "my-rg".to_string(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_installs_missing_extension_once() {
        let scope = Arc::new(TestScope::new());
        scope.state().vmss_extension_specs = vec![make_spec()];
        let cloud = Arc::new(FakeCloud::new());

        let service = Service::new(Arc::clone(&scope), Arc::clone(&cloud), CancellationToken::new());
        service.reconcile().await.unwrap();
        service.reconcile().await.unwrap();

        assert_eq!(cloud.writes().len(), 1);
        assert_eq!(make_spec().owner_resource_name(), "my-vmss");
    }

    #[tokio::test]
    async fn test_pending_install_reports_not_done() {
        let scope = Arc::new(TestScope::new());
        scope.state().vmss_extension_specs = vec![make_spec()];
        let cloud = Arc::new(FakeCloud::new());
        cloud.state().pending = true;

        let service = Service::new(Arc::clone(&scope), Arc::clone(&cloud), CancellationToken::new());
        let err = service.reconcile().await.unwrap_err();

        assert!(err.is_operation_not_done());
        let condition = scope.last_condition(conditions::BOOTSTRAP_SUCCEEDED).unwrap();
        assert!(condition.error.as_deref().unwrap().contains("is not done"));
    }
}
