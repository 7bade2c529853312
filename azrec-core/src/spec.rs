//! The contract every reconcilable resource implements.

use crate::error::Result;
use crate::models::Resource;

/// Desired state of one Azure resource.
pub trait ResourceSpec: Send + Sync {
    /// Name of the resource.
    fn resource_name(&self) -> &str;

    /// Resource group holding the resource.
    fn resource_group_name(&self) -> &str;

    /// Name of the parent resource for child resources (a secret's vault, an
    /// extension's VM). Empty for top level resources.
    fn owner_resource_name(&self) -> &str {
        ""
    }

    /// Payload to send for a create or update given the observed resource.
    ///
    /// `Ok(None)` means the observed resource needs no change. Must be
    /// deterministic and free of I/O; an observed resource of the wrong kind
    /// is a terminal error.
    fn parameters(&self, existing: Option<&Resource>) -> Result<Option<Resource>>;
}

/// Borrow `existing` as the concrete payload type `T`.
///
/// A payload of another kind is a terminal error.
pub fn existing_as<'a, T>(existing: Option<&'a Resource>) -> Result<Option<&'a T>>
where
    &'a T: TryFrom<&'a Resource, Error = crate::error::Error>,
{
    existing.map(<&T>::try_from).transpose()
}
