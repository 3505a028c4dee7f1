//! Cluster discovery (CDS) document.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// One cluster definition from `cds.yaml` (top-level sequence).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CdsConfig {
    #[validate(length(min = 1, message = "Cluster name cannot be empty"))]
    pub name: String,

    /// Load-balancing policy tag: round-robin, least-request or random.
    /// Unknown values fall back to round-robin at translation time.
    #[serde(rename = "lb-policy")]
    #[validate(length(min = 1, message = "lb-policy cannot be empty"))]
    pub lb_policy: String,

    #[serde(rename = "health-check")]
    #[validate(nested)]
    pub health_check: CdsHealthCheckConfig,
}

/// HTTP health-check specification for a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CdsHealthCheckConfig {
    #[serde(default)]
    pub host: String,

    #[validate(length(min = 1, message = "Health check path cannot be empty"))]
    pub path: String,

    /// Expected HTTP statuses. The translator treats an empty list as
    /// "any 2xx", but documents must name at least one status.
    #[validate(length(min = 1, message = "At least one expected status is required"))]
    #[validate(custom(function = crate::config::validate_unique_statuses))]
    pub status: Vec<u32>,

    #[validate(range(min = 1, max = 900, message = "timeout must be between 1 and 900 seconds"))]
    pub timeout: u32,

    #[validate(range(min = 1, max = 180, message = "interval must be between 1 and 180 seconds"))]
    pub interval: u32,

    #[serde(rename = "healthy")]
    #[validate(range(min = 1, max = 10, message = "healthy threshold must be between 1 and 10"))]
    pub healthy_count: u32,

    #[serde(rename = "unhealthy")]
    #[validate(range(min = 1, max = 10, message = "unhealthy threshold must be between 1 and 10"))]
    pub unhealthy_count: u32,
}

impl CdsHealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval))
    }
}
