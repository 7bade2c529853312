//! Test utilities: an in-memory scope and cloud
//!
//! [`TestScope`] plays the outer reconcile loop (Future store, conditions,
//! specs) and [`FakeCloud`] plays ARM, including long-running operations that
//! stay pending until told otherwise. Both are used by unit tests and by the
//! integration tests under `tests/`.

pub mod cloud;
pub mod scope;

pub use cloud::{CloudState, FakeCloud, Write};
pub use scope::{ConditionUpdate, ScopeState, TestScope};
