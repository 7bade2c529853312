//! Ports implemented by the outer reconcile loop.
//!
//! The core never persists anything itself: long-running operation handles
//! and condition reports live in the status of the object being reconciled,
//! which the outer loop owns. Service specific scopes (specs, hand-off
//! callbacks) are declared next to each service and extend these traits.

use crate::config::ReconcileConfig;
use crate::error::Error;
use crate::future::{Future, FutureType};
use crate::models::Tags;

/// Names of the condition slots published by the services.
pub mod conditions {
    pub const AVAILABILITY_SET_READY: &str = "AvailabilitySetReady";
    pub const SUBNETS_READY: &str = "SubnetsReady";
    pub const PUBLIC_IPS_READY: &str = "PublicIPsReady";
    pub const NAT_GATEWAYS_READY: &str = "NATGatewaysReady";
    pub const VAULT_READY: &str = "VaultReady";
    pub const SECRETS_READY: &str = "SecretsReady";
    pub const BOOTSTRAP_SUCCEEDED: &str = "BootstrapSucceeded";
}

/// Future store and condition publication.
pub trait FutureScope: Send + Sync {
    /// In-flight operation for (name, service, kind), if any.
    fn get_long_running_operation_state(
        &self,
        name: &str,
        service_name: &str,
        kind: FutureType,
    ) -> Option<Future>;

    /// Insert or replace the Future for its (name, service, kind).
    fn set_long_running_operation_state(&self, future: Future);

    fn delete_long_running_operation_state(&self, name: &str, service_name: &str, kind: FutureType);

    /// Publish the outcome of a create or update.
    fn update_put_status(&self, condition: &str, service_name: &str, err: Option<&Error>);

    /// Publish the outcome of a patch.
    fn update_patch_status(&self, condition: &str, service_name: &str, err: Option<&Error>);

    /// Publish the outcome of a delete.
    fn update_delete_status(&self, condition: &str, service_name: &str, err: Option<&Error>);

    fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig::default()
    }
}

/// Cluster wide metadata.
pub trait ClusterDescriber: Send + Sync {
    fn subscription_id(&self) -> &str;
    fn location(&self) -> &str;
    fn resource_group(&self) -> &str;
    fn cluster_name(&self) -> &str;

    /// Tags applied to every resource in addition to the ownership tags.
    fn additional_tags(&self) -> Tags {
        Tags::new()
    }
}

/// Network layout of the cluster.
pub trait NetworkDescriber: ClusterDescriber {
    /// True when the virtual network is created and owned by this cluster.
    fn is_vnet_managed(&self) -> bool;

    fn vnet_name(&self) -> &str;

    fn vnet_resource_group(&self) -> &str {
        self.resource_group()
    }
}
