//! Ownership tags stamped on every resource the controller creates.

use crate::models::Tags;

const CLUSTER_TAG_PREFIX: &str = "sigs.k8s.io_cluster-api-provider-azure_cluster_";

/// Tag key holding the role of a resource in the cluster.
pub const ROLE_TAG_KEY: &str = "sigs.k8s.io_cluster-api-provider-azure_role";

/// Tag key holding the display name of a resource.
pub const NAME_TAG_KEY: &str = "Name";

pub mod roles {
    pub const NODE: &str = "node";
    pub const CONTROL_PLANE: &str = "control-plane";
    pub const COMMON: &str = "common";
}

/// Whether the cluster created a resource or merely uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLifecycle {
    Owned,
    Shared,
}

impl ResourceLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceLifecycle::Owned => "owned",
            ResourceLifecycle::Shared => "shared",
        }
    }
}

/// Key of the tag marking a resource as belonging to `cluster_name`.
pub fn cluster_tag_key(cluster_name: &str) -> String {
    format!("{}{}", CLUSTER_TAG_PREFIX, cluster_name)
}

/// Inputs of [`build`].
#[derive(Debug, Clone)]
pub struct BuildParams<'a> {
    pub cluster_name: &'a str,
    pub lifecycle: ResourceLifecycle,
    pub name: Option<&'a str>,
    pub role: Option<&'a str>,
    pub additional: &'a Tags,
}

/// Tags for a resource: additional tags first, ownership tags on top.
pub fn build(params: BuildParams<'_>) -> Tags {
    let mut tags = params.additional.clone();
    tags.insert(
        cluster_tag_key(params.cluster_name),
        params.lifecycle.as_str().to_string(),
    );
    if let Some(role) = params.role {
        tags.insert(ROLE_TAG_KEY.to_string(), role.to_string());
    }
    if let Some(name) = params.name {
        tags.insert(NAME_TAG_KEY.to_string(), name.to_string());
    }
    tags
}

/// True when `tags` mark the resource as owned by `cluster_name`.
pub fn is_owned(tags: &Tags, cluster_name: &str) -> bool {
    tags.get(&cluster_tag_key(cluster_name))
        .is_some_and(|v| v == ResourceLifecycle::Owned.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_overrides_additional_tags() {
        let mut additional = Tags::new();
        additional.insert("team".to_string(), "infra".to_string());
        additional.insert(NAME_TAG_KEY.to_string(), "spoofed".to_string());

        let tags = build(BuildParams {
            cluster_name: "test-cluster",
            lifecycle: ResourceLifecycle::Owned,
            name: Some("my-vmss"),
            role: Some(roles::NODE),
            additional: &additional,
        });

        assert_eq!(tags.get("team").map(String::as_str), Some("infra"));
        assert_eq!(tags.get(NAME_TAG_KEY).map(String::as_str), Some("my-vmss"));
        assert_eq!(tags.get(ROLE_TAG_KEY).map(String::as_str), Some("node"));
        assert_eq!(
            tags.get("sigs.k8s.io_cluster-api-provider-azure_cluster_test-cluster")
                .map(String::as_str),
            Some("owned")
        );
    }

    #[test]
    fn test_is_owned() {
        let tags = build(BuildParams {
            cluster_name: "test-cluster",
            lifecycle: ResourceLifecycle::Owned,
            name: None,
            role: None,
            additional: &Tags::new(),
        });
        assert!(is_owned(&tags, "test-cluster"));
        assert!(!is_owned(&tags, "other-cluster"));

        let shared = build(BuildParams {
            cluster_name: "test-cluster",
            lifecycle: ResourceLifecycle::Shared,
            name: None,
            role: None,
            additional: &Tags::new(),
        });
        assert!(!is_owned(&shared, "test-cluster"));
    }
}
