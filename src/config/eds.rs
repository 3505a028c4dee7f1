//! Endpoint discovery (EDS) document.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// One endpoint group from `eds.yaml` (top-level sequence). The name refers
/// to the cluster declared in `cds.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EdsConfig {
    #[validate(length(min = 1, message = "Cluster name cannot be empty"))]
    pub name: String,

    /// Balancing-policy tag: normal (flat) or locality (grouped by
    /// region/zone). Anything else falls back to locality.
    #[serde(rename = "balancing-policy", default)]
    pub balancing_policy: String,

    #[validate(length(min = 1, message = "At least one instance is required"))]
    #[validate(nested)]
    pub instances: Vec<EdsInstanceConfig>,
}

/// A single upstream instance.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EdsInstanceConfig {
    #[serde(rename = "instance-name")]
    #[validate(length(min = 1, message = "Instance name cannot be empty"))]
    pub instance_name: String,

    #[validate(custom(function = crate::config::validate_ip_literal))]
    pub ip: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u32,

    #[validate(length(min = 1, message = "Region cannot be empty"))]
    pub region: String,

    #[serde(default)]
    pub zone: String,

    /// Transport-protocol tag: tcp or udp, default tcp.
    #[serde(default)]
    pub protocol: String,
}
