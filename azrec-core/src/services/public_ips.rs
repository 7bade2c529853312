//! Public IP addresses for load balancers, NAT gateways and bastions.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ServiceReconciler, within_service_timeout};
use crate::error::{ErrorPrecedence, Result};
use crate::future::FutureType;
use crate::models::{
    PublicIpAddress, PublicIpAddressDnsSettings, PublicIpAddressProperties, PublicIpAddressSku,
    Resource, Tags,
};
use crate::reconciler::{AsyncReconciler, Creator, Deleter};
use crate::scope::{ClusterDescriber, FutureScope, conditions};
use crate::spec::{ResourceSpec, existing_as};
use crate::tags::{self, BuildParams, ResourceLifecycle};

pub const SERVICE_NAME: &str = "publicips";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicIpSpec {
    pub name: String,
    pub resource_group: String,
    pub cluster_name: String,
    pub location: String,
    /// Fully qualified DNS name; the first label becomes the domain name label.
    pub dns_name: Option<String>,
    pub is_ipv6: bool,
    pub failure_domains: Vec<String>,
    pub additional_tags: Tags,
}

impl ResourceSpec for PublicIpSpec {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>> {
        if existing_as::<PublicIpAddress>(existing)?.is_some() {
            // Existing public IPs are never updated.
            return Ok(None);
        }

        let dns_settings = self.dns_name.as_ref().map(|fqdn| PublicIpAddressDnsSettings {
            domain_name_label: fqdn.split('.').next().map(str::to_string),
            fqdn: Some(fqdn.clone()),
        });

        Ok(Some(Resource::from(PublicIpAddress {
            name: Some(self.name.clone()),
            location: Some(self.location.clone()),
            tags: tags::build(BuildParams {
                cluster_name: &self.cluster_name,
                lifecycle: ResourceLifecycle::Owned,
                name: Some(&self.name),
                role: None,
                additional: &self.additional_tags,
            }),
            sku: Some(PublicIpAddressSku {
                name: Some("Standard".to_string()),
            }),
            zones: self.failure_domains.clone(),
            properties: Some(PublicIpAddressProperties {
                public_ip_address_version: Some(
                    if self.is_ipv6 { "IPv6" } else { "IPv4" }.to_string(),
                ),
                public_ip_allocation_method: Some("Static".to_string()),
                dns_settings,
                ip_address: None,
            }),
            ..Default::default()
        })))
    }
}

pub trait PublicIpScope: FutureScope + ClusterDescriber {
    fn public_ip_specs(&self) -> Vec<PublicIpSpec>;
}

pub struct Service<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    reconciler: AsyncReconciler<S, C>,
}

impl<S, C> Service<S, C>
where
    S: PublicIpScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    pub fn new(scope: Arc<S>, client: Arc<C>, cancel: CancellationToken) -> Self {
        Self {
            reconciler: AsyncReconciler::new(Arc::clone(&scope), client, cancel),
            scope,
        }
    }

    async fn reconcile_specs(&self, specs: &[PublicIpSpec]) -> Result<()> {
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

    async fn delete_specs(&self, specs: &[PublicIpSpec]) -> Result<()> {
        let mut precedence = ErrorPrecedence::new();
        for spec in specs {
            precedence.observe(self.delete_if_owned(spec).await);
        }
        precedence.into_result()
    }

    /// Delete `spec` unless the observed IP belongs to someone else. An
    /// in-flight delete is always followed to completion.
    async fn delete_if_owned(&self, spec: &PublicIpSpec) -> Result<()> {
        let in_flight = self
            .scope
            .get_long_running_operation_state(&spec.name, SERVICE_NAME, FutureType::Delete)
            .is_some();
        if !in_flight {
            let Some(existing) = self.reconciler.get_existing(spec, SERVICE_NAME).await? else {
                return Ok(());
            };
            let ip = PublicIpAddress::try_from(existing)?;
            if !tags::is_owned(&ip.tags, self.scope.cluster_name()) {
                info!("Skipping deletion of unmanaged public IP {}", spec.name);
                return Ok(());
            }
        }
        self.reconciler.delete_resource(spec, SERVICE_NAME).await
    }
}

#[async_trait]
impl<S, C> ServiceReconciler for Service<S, C>
where
    S: PublicIpScope + ?Sized,
    C: Creator + Deleter + ?Sized,
{
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<()> {
        let specs = self.scope.public_ip_specs();
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
            .update_put_status(conditions::PUBLIC_IPS_READY, SERVICE_NAME, result.as_ref().err());
        result
    }

    async fn delete(&self) -> Result<()> {
        let specs = self.scope.public_ip_specs();
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
            conditions::PUBLIC_IPS_READY,
            SERVICE_NAME,
            result.as_ref().err(),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FakeCloud, TestScope, Write};

    fn make_spec(name: &str) -> PublicIpSpec {
        PublicIpSpec {
            name: name.to_string(),
            resource_group: "my-rg".to_string(),
            cluster_name: "test-cluster".to_string(),
            location: "westeurope".to_string(),
            dns_name: Some("my-cluster.westeurope.cloudapp.azure.com".to_string()),
            is_ipv6: false,
            failure_domains: vec!["1".to_string(), "2".to_string()],
            additional_tags: Tags::new(),
        }
    }

    fn owned_ip(name: &str, cluster: &str) -> PublicIpAddress {
        PublicIpAddress {
            name: Some(name.to_string()),
            tags: tags::build(BuildParams {
                cluster_name: cluster,
                lifecycle: ResourceLifecycle::Owned,
                name: Some(name),
                role: None,
                additional: &Tags::new(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parameters_for_new_ip() {
        let params = make_spec("pip-apiserver").parameters(None).unwrap().unwrap();
        let ip = PublicIpAddress::try_from(params).unwrap();
        let props = ip.properties.unwrap();
        assert_eq!(props.public_ip_address_version.as_deref(), Some("IPv4"));
        assert_eq!(props.public_ip_allocation_method.as_deref(), Some("Static"));
        assert_eq!(
            props.dns_settings.unwrap().domain_name_label.as_deref(),
            Some("my-cluster")
        );
        assert_eq!(ip.zones, vec!["1", "2"]);
        assert!(tags::is_owned(&ip.tags, "test-cluster"));
    }

    #[test]
    fn test_parameters_existing_ip_is_no_change_even_with_drift() {
        let mut drifted = owned_ip("pip-apiserver", "test-cluster");
        drifted.zones = vec!["3".to_string()];
        let existing = Resource::from(drifted);
        assert!(make_spec("pip-apiserver")
            .parameters(Some(&existing))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_only_owned_ips() {
        let scope = Arc::new(TestScope::new());
        scope.state().public_ip_specs = vec![
            make_spec("pip-owned"),
            make_spec("pip-foreign"),
            make_spec("pip-gone"),
        ];
        let cloud = Arc::new(FakeCloud::new());
        cloud.insert("pip-owned", owned_ip("pip-owned", "test-cluster"));
        cloud.insert("pip-foreign", owned_ip("pip-foreign", "other-cluster"));

        let service = Service::new(Arc::clone(&scope), Arc::clone(&cloud), CancellationToken::new());
        service.delete().await.unwrap();

        assert_eq!(
            cloud.writes(),
            vec![Write::Delete {
                name: "pip-owned".to_string()
            }]
        );
        let condition = scope.last_condition(conditions::PUBLIC_IPS_READY).unwrap();
        assert!(condition.error.is_none());
    }

    #[tokio::test]
    async fn test_in_flight_delete_completes_after_ip_is_gone() {
        let scope = Arc::new(TestScope::new());
        scope.state().public_ip_specs = vec![make_spec("pip-owned")];
        let cloud = Arc::new(FakeCloud::new());
        cloud.insert("pip-owned", owned_ip("pip-owned", "test-cluster"));
        cloud.state().pending = true;
        let service = Service::new(Arc::clone(&scope), Arc::clone(&cloud), CancellationToken::new());

        assert!(service.delete().await.unwrap_err().is_operation_not_done());
        assert_eq!(scope.state().futures.len(), 1);

        cloud.state().resources.remove("pip-owned");
        service.delete().await.unwrap();

        assert!(scope.state().futures.is_empty());
        assert_eq!(cloud.writes().len(), 1);
    }
}
