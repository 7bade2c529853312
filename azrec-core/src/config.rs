//! Reconcile timing knobs.

use std::time::Duration;

/// Lower bound for the requeue delay of an in-flight operation.
pub const DEFAULT_RECONCILER_REQUEUE: Duration = Duration::from_secs(15);

/// Upper bound applied to `Retry-After` style polling hints.
pub const MAX_RECONCILER_REQUEUE: Duration = Duration::from_secs(5 * 60);

/// Overall deadline for one service reconcile.
pub const DEFAULT_AZURE_SERVICE_RECONCILE_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Deadline for a single cloud call.
pub const DEFAULT_AZURE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Timing configuration supplied by the outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub default_requeue: Duration,
    pub max_requeue: Duration,
    pub service_reconcile_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            default_requeue: DEFAULT_RECONCILER_REQUEUE,
            max_requeue: MAX_RECONCILER_REQUEUE,
            service_reconcile_timeout: DEFAULT_AZURE_SERVICE_RECONCILE_TIMEOUT,
            call_timeout: DEFAULT_AZURE_CALL_TIMEOUT,
        }
    }
}

impl ReconcileConfig {
    /// Requeue delay for an operation that advertised `hint`.
    ///
    /// Never shorter than `default_requeue`, never longer than `max_requeue`.
    pub fn requeue_after(&self, hint: Option<Duration>) -> Duration {
        let floor = self.default_requeue;
        let ceiling = self.max_requeue.max(floor);
        hint.unwrap_or(floor).clamp(floor, ceiling)
    }
}
