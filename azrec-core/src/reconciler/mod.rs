//! Generic driver for Azure long-running operations.
//!
//! Each resource family supplies a client adapter implementing the capability
//! traits below; [`AsyncReconciler`] drives create, update and delete through
//! them and checkpoints in-flight operations in the scope's Future store.

mod lro;

pub use lro::AsyncReconciler;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::future::{Future, FutureType};
use crate::models::Resource;
use crate::spec::ResourceSpec;

/// Polling state of an operation the cloud accepted but has not finished.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationHandle {
    /// Vendor polling state; persisted verbatim inside the Future.
    pub state: Value,
    /// `Retry-After` advertised when the operation was accepted.
    pub retry_after: Option<Duration>,
}

impl OperationHandle {
    pub fn new(state: Value) -> Self {
        Self {
            state,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Persistable Future for this handle.
    pub fn into_future(
        self,
        kind: FutureType,
        service_name: &str,
        spec: &dyn ResourceSpec,
    ) -> Result<Future> {
        let future = Future::new(
            kind,
            service_name,
            spec.resource_name(),
            spec.resource_group_name(),
            &self.state,
        )?;
        Ok(match self.retry_after {
            Some(delay) => future.with_delay_hint(delay),
            None => future,
        })
    }
}

/// Result of submitting a write.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncOutcome {
    /// The operation finished within the call; carries the resulting resource.
    Completed(Option<Resource>),
    /// The operation is still running.
    Pending(OperationHandle),
}

#[async_trait]
pub trait Getter: Send + Sync {
    /// Fetch the observed resource. A missing resource is a 404 cloud error.
    async fn get(&self, spec: &dyn ResourceSpec) -> Result<Resource>;
}

#[async_trait]
pub trait FutureHandler: Send + Sync {
    async fn is_done(&self, future: &Future) -> Result<bool>;

    /// Final resource of a finished operation.
    async fn result(&self, future: &Future, kind: FutureType) -> Result<Option<Resource>>;
}

#[async_trait]
pub trait Creator: Getter + FutureHandler {
    async fn create_or_update_async(
        &self,
        spec: &dyn ResourceSpec,
        parameters: Resource,
    ) -> Result<AsyncOutcome>;
}

#[async_trait]
pub trait Deleter: Getter + FutureHandler {
    async fn delete_async(&self, spec: &dyn ResourceSpec) -> Result<AsyncOutcome>;
}

/// Run `fut` under `timeout` and the caller's cancellation token.
///
/// A cancelled token wins over a result that is ready at the same time.
pub async fn with_deadline<T>(
    operation: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled {
            operation: operation.to_string(),
        }),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                elapsed: timeout,
            }),
        },
    }
}
