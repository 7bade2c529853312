//! Secrets stored in the cluster key vault.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ServiceReconciler, within_service_timeout};
use crate::error::{ErrorPrecedence, Result};
use crate::models::{Resource, Secret, SecretProperties, Tags};
use crate::reconciler::{AsyncReconciler, Creator, Deleter};
use crate::scope::{FutureScope, conditions};
use crate::spec::{ResourceSpec, existing_as};

pub const SERVICE_NAME: &str = "secrets";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretSpec {
    pub name: String,
    pub vault_name: String,
    pub resource_group: String,
    pub value: String,
    pub content_type: Option<String>,
    pub tags: Tags,
}

impl fmt::Debug for SecretSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretSpec")
            .field("name", &self.name)
            .field("vault_name", &self.vault_name)
            .field("resource_group", &self.resource_group)
            .field("value", &"<redacted>")
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl ResourceSpec for SecretSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> &str {
        &self.vault_name
    }

    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>> {
        if existing_as::<Secret>(existing)?.is_some() {
            // The service never returns secret values; a stored secret is kept.
            return Ok(None);
        }

        Ok(Some(Resource::from(Secret {
            name: Some(self.name.clone()),
            tags: self.tags.clone(),
            properties: Some(SecretProperties {
                value: Some(self.value.clone()),
                content_type: self.content_type.clone(),
                secret_uri: None,
            }),
            ..Default::default()
        })))
    }
}

pub trait SecretScope: FutureScope {
    fn secret_specs(&self) -> Vec<SecretSpec>;
}

pub struct Service<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    reconciler: AsyncReconciler<S, C>,
}

impl<S, C> Service<S, C>
where
    S: SecretScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    pub fn new(scope: Arc<S>, client: Arc<C>, cancel: CancellationToken) -> Self {
        Self {
            reconciler: AsyncReconciler::new(Arc::clone(&scope), client, cancel),
            scope,
        }
    }

    async fn reconcile_specs(&self, specs: &[SecretSpec]) -> Result<()> {
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

    async fn delete_specs(&self, specs: &[SecretSpec]) -> Result<()> {
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
    S: SecretScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<()> {
        let specs = self.scope.secret_specs();
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
        self.scope
            .update_put_status(conditions::SECRETS_READY, SERVICE_NAME, result.as_ref().err());
        result
    }

    async fn delete(&self) -> Result<()> {
        let specs = self.scope.secret_specs();
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
        self.scope
            .update_delete_status(conditions::SECRETS_READY, SERVICE_NAME, result.as_ref().err());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FakeCloud, TestScope};

    fn make_spec(name: &str) -> SecretSpec {
        SecretSpec {
            name: name.to_string(),
            vault_name: "test-kv".to_string(),
            resource_group: "my-rg".to_string(),
            value: "hunter2".to_string(),
            content_type: Some("text/plain".to_string()),
            tags: Tags::new(),
        }
    }

    #[test]
    fn test_owner_is_vault() {
        assert_eq!(make_spec("join-token").owner_resource_name(), "test-kv");
    }

    #[test]
    fn test_debug_redacts_value() {
        let rendered = format!("{:?}", make_spec("join-token"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_not_done_does_not_mask_failure() {
        let scope = Arc::new(TestScope::new());
        scope.state().secret_specs = vec![make_spec("first"), make_spec("second")];
        let cloud = Arc::new(FakeCloud::new());
        cloud.state().pending = true;

        let service = Service::new(Arc::clone(&scope), Arc::clone(&cloud), CancellationToken::new());
        let err = service.reconcile().await.unwrap_err();
        assert!(err.is_operation_not_done());
        assert_eq!(scope.state().futures.len(), 2);

        // The first secret is still running, the second one now fails outright.
        cloud.state().is_done = false;
        scope
            .state()
            .futures
            .delete("second", SERVICE_NAME, crate::future::FutureType::Put);
        cloud.fail_writes(crate::error::CloudError::new(400, "BadRequest", "invalid secret"));

        let err = service.reconcile().await.unwrap_err();
        assert!(!err.is_operation_not_done());
        assert!(err.to_string().contains("invalid secret"));
        let condition = scope.last_condition(conditions::SECRETS_READY).unwrap();
        assert!(condition.error.as_deref().unwrap().contains("invalid secret"));
    }
}
