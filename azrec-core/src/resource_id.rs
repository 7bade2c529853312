//! Azure Resource Manager resource IDs and provider IDs.

use std::fmt;

use crate::error::{Error, Result};

/// Prefix of the provider ID handed to the node lifecycle controller.
pub const PROVIDER_ID_PREFIX: &str = "azure://";

fn group_id(subscription_id: &str, resource_group: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}",
        subscription_id, resource_group
    )
}

pub fn subnet_id(subscription_id: &str, resource_group: &str, vnet: &str, subnet: &str) -> String {
    format!(
        "{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}",
        group_id(subscription_id, resource_group),
        vnet,
        subnet
    )
}

pub fn public_ip_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "{}/providers/Microsoft.Network/publicIPAddresses/{}",
        group_id(subscription_id, resource_group),
        name
    )
}

pub fn nat_gateway_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "{}/providers/Microsoft.Network/natGateways/{}",
        group_id(subscription_id, resource_group),
        name
    )
}

pub fn route_table_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "{}/providers/Microsoft.Network/routeTables/{}",
        group_id(subscription_id, resource_group),
        name
    )
}

pub fn security_group_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "{}/providers/Microsoft.Network/networkSecurityGroups/{}",
        group_id(subscription_id, resource_group),
        name
    )
}

pub fn address_pool_id(
    subscription_id: &str,
    resource_group: &str,
    load_balancer: &str,
    pool: &str,
) -> String {
    format!(
        "{}/providers/Microsoft.Network/loadBalancers/{}/backendAddressPools/{}",
        group_id(subscription_id, resource_group),
        load_balancer,
        pool
    )
}

pub fn vmss_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}",
        group_id(subscription_id, resource_group),
        name
    )
}

pub fn availability_set_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "{}/providers/Microsoft.Compute/availabilitySets/{}",
        group_id(subscription_id, resource_group),
        name
    )
}

/// Parsed form of `/subscriptions/<sub>/resourceGroups/<rg>/providers/<ns>/<type>/<name>[/<type>/<name>...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub provider: String,
    /// (type, name) pairs from outermost to innermost.
    pub resources: Vec<(String, String)>,
}

impl ResourceId {
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = || Error::terminal(format!("invalid resource ID {:?}", id));
        let segments: Vec<&str> = id.trim_start_matches('/').split('/').collect();
        if segments.len() < 4
            || !segments[0].eq_ignore_ascii_case("subscriptions")
            || !segments[2].eq_ignore_ascii_case("resourceGroups")
        {
            return Err(invalid());
        }

        let mut parsed = ResourceId {
            subscription_id: segments[1].to_string(),
            resource_group: segments[3].to_string(),
            provider: String::new(),
            resources: Vec::new(),
        };
        let rest = &segments[4..];
        if rest.is_empty() {
            return Ok(parsed);
        }
        if rest.len() < 4 || !rest[0].eq_ignore_ascii_case("providers") || rest.len() % 2 != 0 {
            return Err(invalid());
        }
        parsed.provider = rest[1].to_string();
        parsed.resources = rest[2..]
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();
        if parsed.resources.iter().any(|(t, n)| t.is_empty() || n.is_empty()) {
            return Err(invalid());
        }
        Ok(parsed)
    }

    /// Name of the innermost resource.
    pub fn name(&self) -> Option<&str> {
        self.resources.last().map(|(_, name)| name.as_str())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", group_id(&self.subscription_id, &self.resource_group))?;
        if !self.provider.is_empty() {
            write!(f, "/providers/{}", self.provider)?;
            for (kind, name) in &self.resources {
                write!(f, "/{}/{}", kind, name)?;
            }
        }
        Ok(())
    }
}

/// Provider ID for a resource ID, with the resource group lowercased.
pub fn provider_id(resource_id: &str) -> Result<String> {
    let mut parsed = ResourceId::parse(resource_id)?;
    parsed.resource_group = parsed.resource_group.to_lowercase();
    Ok(format!("{}{}", PROVIDER_ID_PREFIX, parsed))
}
