//! Extensions installed on individual virtual machines.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{ServiceReconciler, within_service_timeout};
use crate::error::{ErrorPrecedence, Result};
use crate::models::{ExtensionProperties, Resource, VirtualMachineExtension};
use crate::reconciler::{AsyncReconciler, Creator};
use crate::scope::{FutureScope, conditions};
use crate::spec::{ResourceSpec, existing_as};

pub const SERVICE_NAME: &str = "vmextensions";

/// Publisher side description of an extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionSpec {
    pub name: String,
    pub publisher: String,
    pub version: String,
    pub settings: BTreeMap<String, String>,
    pub protected_settings: BTreeMap<String, String>,
}

impl ExtensionSpec {
    /// Extension properties payload.
    pub fn properties(&self) -> Result<ExtensionProperties> {
        let settings = if self.settings.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&self.settings)?)
        };
        let protected_settings = if self.protected_settings.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&self.protected_settings)?)
        };
        Ok(ExtensionProperties {
            publisher: Some(self.publisher.clone()),
            kind: Some(self.name.clone()),
            type_handler_version: Some(self.version.clone()),
            settings,
            protected_settings,
            provisioning_state: None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmExtensionSpec {
    pub extension: ExtensionSpec,
    pub vm_name: String,
    pub resource_group: String,
    pub location: String,
}

impl ResourceSpec for VmExtensionSpec {
    fn resource_name(&self) -> &str {
        &self.extension.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> &str {
        &self.vm_name
    }

    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>> {
        if existing_as::<VirtualMachineExtension>(existing)?.is_some() {
            return Ok(None);
        }
        Ok(Some(Resource::from(VirtualMachineExtension {
            name: Some(self.extension.name.clone()),
            location: Some(self.location.clone()),
            properties: Some(self.extension.properties()?),
            ..Default::default()
        })))
    }
}

pub trait VmExtensionScope: FutureScope {
    fn vm_extension_specs(&self) -> Vec<VmExtensionSpec>;
}

pub struct Service<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    reconciler: AsyncReconciler<S, C>,
}

impl<S, C> Service<S, C>
where
    S: VmExtensionScope + ?Sized,
    C: Creator + ?Sized,
{
    pub fn new(scope: Arc<S>, client: Arc<C>, cancel: CancellationToken) -> Self {
        Self {
            reconciler: AsyncReconciler::new(Arc::clone(&scope), client, cancel),
            scope,
        }
    }

    async fn reconcile_specs(&self, specs: &[VmExtensionSpec]) -> Result<()> {
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
    S: VmExtensionScope + ?Sized,
    C: Creator + ?Sized,
{
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<()> {
        let specs = self.scope.vm_extension_specs();
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

    /// Extensions are removed together with their virtual machine.
    async fn delete(&self) -> Result<()> {
        Ok(())
    }
}
