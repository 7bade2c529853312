//! Azure Resource Manager payload models.
//!
//! These mirror the ARM JSON wire shape (camelCase keys, nested `properties`)
//! so a cloud client adapter can send and receive them unchanged. Only the
//! fields this controller reads or writes are modelled.

pub mod compute;
pub mod keyvault;
pub mod network;
pub mod sku;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use compute::*;
pub use keyvault::*;
pub use network::*;
pub use sku::*;

/// Resource tags.
pub type Tags = BTreeMap<String, String>;

/// Reference to another resource by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SubResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }
}

macro_rules! resources {
    ($($variant:ident($ty:ty) => $kind:literal),+ $(,)?) => {
        /// Any resource payload exchanged with a cloud client adapter.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Resource {
            $($variant($ty),)+
        }

        impl Resource {
            /// Human readable resource kind.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Resource::$variant(_) => $kind,)+
                }
            }

            pub fn id(&self) -> Option<&str> {
                match self {
                    $(Resource::$variant(inner) => inner.id.as_deref(),)+
                }
            }

            pub fn set_id(&mut self, id: impl Into<String>) {
                match self {
                    $(Resource::$variant(inner) => inner.id = Some(id.into()),)+
                }
            }

            pub fn name(&self) -> Option<&str> {
                match self {
                    $(Resource::$variant(inner) => inner.name.as_deref(),)+
                }
            }
        }

        $(
            impl From<$ty> for Resource {
                fn from(value: $ty) -> Self {
                    Resource::$variant(value)
                }
            }

            impl TryFrom<Resource> for $ty {
                type Error = Error;

                fn try_from(value: Resource) -> Result<Self, Self::Error> {
                    match value {
                        Resource::$variant(inner) => Ok(inner),
                        other => Err(Error::terminal(format!(
                            "{} is not a {}",
                            other.kind(),
                            $kind
                        ))),
                    }
                }
            }

            impl<'a> TryFrom<&'a Resource> for &'a $ty {
                type Error = Error;

                fn try_from(value: &'a Resource) -> Result<Self, Self::Error> {
                    match value {
                        Resource::$variant(inner) => Ok(inner),
                        other => Err(Error::terminal(format!(
                            "{} is not a {}",
                            other.kind(),
                            $kind
                        ))),
                    }
                }
            }
        )+
    };
}

resources! {
    AvailabilitySet(AvailabilitySet) => "compute.AvailabilitySet",
    ScaleSet(VirtualMachineScaleSet) => "compute.VirtualMachineScaleSet",
    VmExtension(VirtualMachineExtension) => "compute.VirtualMachineExtension",
    ScaleSetExtension(VirtualMachineScaleSetExtension) => "compute.VirtualMachineScaleSetExtension",
    Subnet(Subnet) => "network.Subnet",
    PublicIp(PublicIpAddress) => "network.PublicIPAddress",
    NatGateway(NatGateway) => "network.NatGateway",
    Vault(Vault) => "keyvault.Vault",
    Secret(Secret) => "keyvault.Secret",
}
