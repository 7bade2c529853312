//! Resource SKU catalog entries as returned by `Microsoft.Compute/skus`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSkuCapabilities {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ResourceSkuCapabilities {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSkuZoneDetails {
    /// Zones these capabilities apply to.
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<ResourceSkuCapabilities>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSkuLocationInfo {
    pub location: String,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub zone_details: Vec<ResourceSkuZoneDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceSkuRestrictionsType {
    Location,
    Zone,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSkuRestrictionInfo {
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub zones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSkuRestrictions {
    #[serde(rename = "type")]
    pub kind: ResourceSkuRestrictionsType,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub restriction_info: ResourceSkuRestrictionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
}

/// One SKU of one resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSku {
    pub name: String,
    /// Category, e.g. `virtualMachines` or `availabilitySets`.
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub location_info: Vec<ResourceSkuLocationInfo>,
    #[serde(default)]
    pub capabilities: Vec<ResourceSkuCapabilities>,
    #[serde(default)]
    pub restrictions: Vec<ResourceSkuRestrictions>,
}
