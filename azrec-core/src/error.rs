//! Error taxonomy for Azure reconciliation.
//!
//! Every error the core produces falls into one of four classes that the outer
//! reconcile loop acts on:
//! - not-found: the cloud answered 404, the resource is absent
//! - transient: requeue after the advised delay (includes operation-not-done)
//! - terminal: stop retrying until the input changes
//! - anything else: retry with the outer loop's default backoff
//!
//! Context added with [`Error::context`] never changes the class; the
//! classification helpers walk through context wrappers.

use std::time::Duration;

use thiserror::Error;

use crate::future::Future;

/// Delay used when a VMSS patch hits a 409 conflict.
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(30);

/// Error returned by the Azure Resource Manager API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status} {code}: {message}")]
pub struct CloudError {
    /// HTTP status code of the response.
    pub status: u16,
    /// ARM error code (e.g. `ResourceNotFound`, `Conflict`).
    pub code: String,
    /// Human readable message from the service.
    pub message: String,
    /// `Retry-After` hint from the response, if any.
    pub retry_after: Option<Duration>,
}

impl CloudError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// 404 with the canonical `ResourceNotFound` code.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, "ResourceNotFound", message)
    }

    /// 409 with the canonical `Conflict` code.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, "Conflict", message)
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }
}

/// Errors produced while reconciling Azure resources.
#[derive(Debug, Error)]
pub enum Error {
    /// The cloud API rejected or failed a request.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// A long-running operation is still in flight.
    #[error(
        "operation type {} on {}/{} is not done",
        .future.kind,
        .future.resource_group,
        .future.name
    )]
    OperationNotDone {
        future: Box<Future>,
        requeue_after: Duration,
    },

    /// Retryable after the given delay.
    #[error("{source}")]
    Transient {
        source: Box<Error>,
        requeue_after: Duration,
    },

    /// Not retryable until the desired state changes.
    #[error("{message}")]
    Terminal { message: String },

    /// A cloud call exceeded its deadline.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// The caller cancelled the reconcile.
    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    /// Payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Additional context around another error.
    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<Error>,
    },

    /// Anything else; retried with the default backoff.
    #[error("{0}")]
    Internal(String),
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a terminal (non-retryable) error.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal {
            message: message.into(),
        }
    }

    /// Create a generic retryable error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap an error so the outer loop requeues after `requeue_after`.
    pub fn transient(source: Error, requeue_after: Duration) -> Self {
        Self::Transient {
            source: Box::new(source),
            requeue_after,
        }
    }

    pub fn operation_not_done(future: Future, requeue_after: Duration) -> Self {
        Self::OperationNotDone {
            future: Box::new(future),
            requeue_after,
        }
    }

    /// Annotate with context, keeping the classification of `self`.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context and transient wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } | Error::Transient { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the cloud answered 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::Cloud(e) if e.is_not_found())
    }

    /// True when the cloud answered 409.
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Error::Cloud(e) if e.is_conflict())
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Error::Terminal { .. } => true,
            Error::Context { source, .. } => source.is_terminal(),
            _ => false,
        }
    }

    pub fn is_operation_not_done(&self) -> bool {
        match self {
            Error::OperationNotDone { .. } => true,
            Error::Context { source, .. } | Error::Transient { source, .. } => {
                source.is_operation_not_done()
            }
            _ => false,
        }
    }

    /// True when the error carries an explicit requeue delay.
    pub fn is_transient(&self) -> bool {
        self.requeue_after().is_some()
    }

    /// The delay the outer loop should wait before the next reconcile.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::OperationNotDone { requeue_after, .. }
            | Error::Transient { requeue_after, .. } => Some(*requeue_after),
            Error::Context { source, .. } => source.requeue_after(),
            _ => None,
        }
    }

    /// The in-flight Future carried by an operation-not-done error.
    pub fn future(&self) -> Option<&Future> {
        match self {
            Error::OperationNotDone { future, .. } => Some(future.as_ref()),
            Error::Context { source, .. } | Error::Transient { source, .. } => source.future(),
            _ => None,
        }
    }

    /// `Retry-After` advertised by the underlying cloud error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.root() {
            Error::Cloud(e) => e.retry_after,
            _ => None,
        }
    }
}

/// Keeps the most pressing outcome across several reconciles of one service.
///
/// A real error outranks an operation-not-done error, which outranks success.
/// Among equals the first one observed wins.
#[derive(Debug, Default)]
pub struct ErrorPrecedence {
    current: Option<Error>,
}

impl ErrorPrecedence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one spec.
    pub fn observe(&mut self, result: Result<()>) {
        let Err(err) = result else {
            return;
        };
        let replace = match &self.current {
            None => true,
            Some(current) => current.is_operation_not_done() && !err.is_operation_not_done(),
        };
        if replace {
            self.current = Some(err);
        }
    }

    pub fn error(&self) -> Option<&Error> {
        self.current.as_ref()
    }

    pub fn into_result(self) -> Result<()> {
        match self.current {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
