//! Reconciliation core for Azure resources.
//!
//! Services converge one resource family each towards a desired spec. Cloud
//! operations that outlive a call are checkpointed as Futures in the scope
//! and resumed by later reconciles.

pub mod config;
pub mod error;
pub mod future;
pub mod models;
pub mod reconciler;
pub mod resource_id;
pub mod scalesets;
pub mod scope;
pub mod services;
pub mod sku;
pub mod spec;
pub mod tags;
pub mod test_util;

pub use config::ReconcileConfig;
pub use error::{CloudError, Error, ErrorPrecedence, Result};
pub use future::{Future, FutureType, Futures};
pub use reconciler::{AsyncOutcome, AsyncReconciler, OperationHandle};
pub use scope::{ClusterDescriber, FutureScope, NetworkDescriber};
pub use services::ServiceReconciler;
pub use sku::{ResourceType, SkuCache, SkuCacheRegistry};
pub use spec::ResourceSpec;
