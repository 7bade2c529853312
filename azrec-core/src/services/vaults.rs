//! Key vault holding cluster secrets.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ServiceReconciler, within_service_timeout};
use crate::error::Result;
use crate::models::{AccessPolicyEntry, Resource, Tags, Vault, VaultProperties, VaultSku};
use crate::reconciler::{AsyncReconciler, Creator, Deleter};
use crate::scope::{FutureScope, conditions};
use crate::spec::{ResourceSpec, existing_as};
use crate::tags::{self, BuildParams, ResourceLifecycle};

pub const SERVICE_NAME: &str = "vaults";

const DEFAULT_VAULT_SKU: &str = "standard";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub cluster_name: String,
    pub tenant_id: String,
    /// Defaults to `standard`.
    pub sku_name: Option<String>,
    pub access_policies: Vec<AccessPolicyEntry>,
    pub additional_tags: Tags,
}

impl VaultSpec {
    fn sku_name(&self) -> &str {
        self.sku_name.as_deref().unwrap_or(DEFAULT_VAULT_SKU)
    }

    fn is_satisfied_by(&self, vault: &Vault) -> bool {
        let Some(props) = vault.properties.as_ref() else {
            return false;
        };
        let sku_matches = props
            .sku
            .as_ref()
            .and_then(|sku| sku.name.as_deref())
            .is_some_and(|name| name.eq_ignore_ascii_case(self.sku_name()));
        props.tenant_id.as_deref() == Some(self.tenant_id.as_str())
            && sku_matches
            && self
                .access_policies
                .iter()
                .all(|policy| props.access_policies.contains(policy))
    }
}

impl ResourceSpec for VaultSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>> {
        let existing = existing_as::<Vault>(existing)?;
        if existing.is_some_and(|vault| self.is_satisfied_by(vault)) {
            return Ok(None);
        }

        Ok(Some(Resource::from(Vault {
            name: Some(self.name.clone()),
            location: Some(self.location.clone()),
            tags: tags::build(BuildParams {
                cluster_name: &self.cluster_name,
                lifecycle: ResourceLifecycle::Owned,
                name: Some(&self.name),
                role: Some(tags::roles::COMMON),
                additional: &self.additional_tags,
            }),
            properties: Some(VaultProperties {
                tenant_id: Some(self.tenant_id.clone()),
                sku: Some(VaultSku {
                    family: Some("A".to_string()),
                    name: Some(self.sku_name().to_string()),
                }),
                access_policies: self.access_policies.clone(),
                enable_soft_delete: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        })))
    }
}

pub trait VaultScope: FutureScope {
    fn vault_spec(&self) -> Option<VaultSpec>;
}

pub struct Service<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    reconciler: AsyncReconciler<S, C>,
}

impl<S, C> Service<S, C>
where
    S: VaultScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    pub fn new(scope: Arc<S>, client: Arc<C>, cancel: CancellationToken) -> Self {
        Self {
            reconciler: AsyncReconciler::new(Arc::clone(&scope), client, cancel),
            scope,
        }
    }
}

#[async_trait]
impl<S, C> ServiceReconciler for Service<S, C>
where
    S: VaultScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<()> {
        let Some(spec) = self.scope.vault_spec() else {
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
        self.scope
            .update_put_status(conditions::VAULT_READY, SERVICE_NAME, result.as_ref().err());
        result
    }

    async fn delete(&self) -> Result<()> {
        let Some(spec) = self.scope.vault_spec() else {
            return Ok(());
        };
        let result = within_service_timeout(
            self.scope.as_ref(),
            self.reconciler.cancellation_token(),
            SERVICE_NAME,
            self.reconciler.delete_resource(&spec, SERVICE_NAME),
        )
        .await;
        self.scope
            .update_delete_status(conditions::VAULT_READY, SERVICE_NAME, result.as_ref().err());
        result
    }
}
