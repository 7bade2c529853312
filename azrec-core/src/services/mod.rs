//! Per-resource services.
//!
//! Each service reads its specs from its scope, drives them through the
//! [`AsyncReconciler`](crate::reconciler::AsyncReconciler) one at a time and
//! publishes a condition with the most pressing outcome.

pub mod availability_sets;
pub mod nat_gateways;
pub mod public_ips;
pub mod secrets;
pub mod subnets;
pub mod vaults;
pub mod vm_extensions;
pub mod vmss_extensions;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::reconciler::with_deadline;
use crate::scope::FutureScope;

/// A service the outer loop reconciles.
#[async_trait]
pub trait ServiceReconciler: Send + Sync {
    /// Service identifier; also keys the service's Futures.
    fn name(&self) -> &'static str;

    /// Converge the cloud towards the desired state.
    async fn reconcile(&self) -> Result<()>;

    /// Remove what the service created.
    async fn delete(&self) -> Result<()>;
}

/// Bound a whole service reconcile by the configured service timeout.
pub(crate) async fn within_service_timeout<T>(
    scope: &(impl FutureScope + ?Sized),
    cancel: &CancellationToken,
    service_name: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    let timeout = scope.reconcile_config().service_reconcile_timeout;
    with_deadline(service_name, timeout, cancel, fut).await
}
