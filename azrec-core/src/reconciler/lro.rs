use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{AsyncOutcome, Creator, Deleter, FutureHandler, with_deadline};
use crate::error::{Error, Result};
use crate::future::{Future, FutureType};
use crate::models::Resource;
use crate::scope::FutureScope;
use crate::spec::ResourceSpec;

/// Create/update/delete driver over a client adapter `C`.
///
/// Every cloud call runs under the configured call timeout and the
/// cancellation token. An operation still running when a call returns is
/// persisted as a Future and reported as operation-not-done.
pub struct AsyncReconciler<S: ?Sized, C: ?Sized> {
    scope: Arc<S>,
    client: Arc<C>,
    cancel: CancellationToken,
}

impl<S: ?Sized, C: ?Sized> Clone for AsyncReconciler<S, C> {
    fn clone(&self) -> Self {
        Self {
            scope: Arc::clone(&self.scope),
            client: Arc::clone(&self.client),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S, C> AsyncReconciler<S, C>
where
    S: FutureScope + ?Sized,
    C: FutureHandler + ?Sized,
{
    pub fn new(scope: Arc<S>, client: Arc<C>, cancel: CancellationToken) -> Self {
        Self {
            scope,
            client,
            cancel,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run a single cloud call under the call timeout.
    pub(crate) async fn call<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout = self.scope.reconcile_config().call_timeout;
        with_deadline(operation, timeout, &self.cancel, fut).await
    }

    /// Poll a persisted operation.
    ///
    /// Returns the resulting resource once done and removes the Future. A
    /// Future whose state cannot be decoded is removed and reported as a
    /// terminal error so the next reconcile starts over.
    pub async fn process_ongoing_operation(&self, future: Future) -> Result<Option<Resource>> {
        let config = self.scope.reconcile_config();

        if let Err(err) = future.decode_state::<serde_json::Value>() {
            self.scope.delete_long_running_operation_state(
                &future.name,
                &future.service_name,
                future.kind,
            );
            return Err(Error::terminal(format!(
                "could not decode future data, resetting long-running operation state: {}",
                err
            )));
        }

        let requeue_after = config.requeue_after(future.delay_hint());
        let done = match self.call("is_done", self.client.is_done(&future)).await {
            Ok(done) => done,
            Err(Error::Timeout { .. } | Error::Cancelled { .. }) => {
                debug!(
                    service = %future.service_name,
                    resource = %future.name,
                    "Polling interrupted, resuming on next reconcile"
                );
                return Err(Error::operation_not_done(future, requeue_after));
            }
            Err(err) => {
                return Err(err.context("failed checking if the operation was complete"));
            }
        };

        if !done {
            debug!(
                service = %future.service_name,
                resource = %future.name,
                resource_group = %future.resource_group,
                "Operation {} still in progress",
                future.kind
            );
            return Err(Error::operation_not_done(future, requeue_after));
        }

        let result = match self.call("result", self.client.result(&future, future.kind)).await {
            Err(Error::Timeout { .. } | Error::Cancelled { .. }) => {
                return Err(Error::operation_not_done(future, requeue_after));
            }
            other => other,
        };

        // Done: a failed operation is retried from scratch by the next reconcile.
        self.scope.delete_long_running_operation_state(
            &future.name,
            &future.service_name,
            future.kind,
        );
        info!(
            service = %future.service_name,
            resource = %future.name,
            resource_group = %future.resource_group,
            "Operation {} finished",
            future.kind
        );
        result.map_err(|err| {
            err.context(format!(
                "failed to get result of long running operation on {}/{}",
                future.resource_group, future.name
            ))
        })
    }

    /// Persist `handle` as a Future of `kind` and report it as not done.
    pub fn park(
        &self,
        handle: super::OperationHandle,
        kind: FutureType,
        spec: &dyn ResourceSpec,
        service_name: &str,
    ) -> Error {
        let future = match handle.into_future(kind, service_name, spec) {
            Ok(future) => future,
            Err(err) => return err.context("failed to persist long running operation"),
        };
        let requeue_after = self.scope.reconcile_config().requeue_after(future.delay_hint());
        self.scope.set_long_running_operation_state(future.clone());
        Error::operation_not_done(future, requeue_after)
    }

    /// Observed resource for `spec`, `None` when it does not exist.
    pub async fn get_existing(
        &self,
        spec: &dyn ResourceSpec,
        service_name: &str,
    ) -> Result<Option<Resource>>
    where
        C: super::Getter,
    {
        match self.call("get", self.client.get(spec)).await {
            Ok(resource) => Ok(Some(resource)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.context(format!(
                "failed to get existing resource {}/{} (service: {})",
                spec.resource_group_name(),
                spec.resource_name(),
                service_name
            ))),
        }
    }
}

impl<S, C> AsyncReconciler<S, C>
where
    S: FutureScope + ?Sized,
    C: Creator + ?Sized,
{
    /// Create or update the resource described by `spec`.
    ///
    /// Returns the resulting resource, or the observed one when no change is
    /// needed.
    pub async fn create_or_update_resource(
        &self,
        spec: &dyn ResourceSpec,
        service_name: &str,
    ) -> Result<Option<Resource>> {
        let name = spec.resource_name();
        let resource_group = spec.resource_group_name();

        for kind in [FutureType::Put, FutureType::Patch] {
            if let Some(future) =
                self.scope
                    .get_long_running_operation_state(name, service_name, kind)
            {
                return self.process_ongoing_operation(future).await;
            }
        }

        let existing = self.get_existing(spec, service_name).await?;

        let parameters = spec.parameters(existing.as_ref()).map_err(|err| {
            err.context(format!(
                "failed to get desired parameters for resource {}/{} (service: {})",
                resource_group, name, service_name
            ))
        })?;
        let Some(parameters) = parameters else {
            debug!(
                service = service_name,
                resource = name,
                resource_group,
                "Resource is up to date"
            );
            return Ok(existing);
        };

        info!(
            service = service_name,
            resource = name,
            resource_group,
            "Creating or updating resource"
        );
        let outcome = self
            .call(
                "create_or_update",
                self.client.create_or_update_async(spec, parameters),
            )
            .await
            .map_err(|err| {
                err.context(format!(
                    "failed to create or update resource {}/{} (service: {})",
                    resource_group, name, service_name
                ))
            })?;

        match outcome {
            AsyncOutcome::Completed(result) => {
                info!(
                    service = service_name,
                    resource = name,
                    resource_group,
                    "Successfully created or updated resource"
                );
                Ok(result)
            }
            AsyncOutcome::Pending(handle) => {
                Err(self.park(handle, FutureType::Put, spec, service_name))
            }
        }
    }
}

impl<S, C> AsyncReconciler<S, C>
where
    S: FutureScope + ?Sized,
    C: Deleter + ?Sized,
{
    /// Delete the resource described by `spec`. Deleting an absent resource
    /// succeeds without a write.
    pub async fn delete_resource(&self, spec: &dyn ResourceSpec, service_name: &str) -> Result<()> {
        let name = spec.resource_name();
        let resource_group = spec.resource_group_name();

        if let Some(future) =
            self.scope
                .get_long_running_operation_state(name, service_name, FutureType::Delete)
        {
            return self.process_ongoing_operation(future).await.map(|_| ());
        }

        if self.get_existing(spec, service_name).await?.is_none() {
            debug!(
                service = service_name,
                resource = name,
                resource_group,
                "Resource already deleted"
            );
            return Ok(());
        }

        info!(
            service = service_name,
            resource = name,
            resource_group,
            "Deleting resource"
        );
        match self.call("delete", self.client.delete_async(spec)).await {
            Ok(AsyncOutcome::Completed(_)) => {
                info!(
                    service = service_name,
                    resource = name,
                    resource_group,
                    "Successfully deleted resource"
                );
                Ok(())
            }
            Ok(AsyncOutcome::Pending(handle)) => {
                Err(self.park(handle, FutureType::Delete, spec, service_name))
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.context(format!(
                "failed to delete resource {}/{} (service: {})",
                resource_group, name, service_name
            ))),
        }
    }
}
