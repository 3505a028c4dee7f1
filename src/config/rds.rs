//! Route discovery (RDS) document.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// One virtual host from `rds.yaml` (top-level sequence).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RdsConfig {
    #[serde(rename = "vhost")]
    #[validate(length(min = 1, message = "Virtual host name cannot be empty"))]
    pub vhost_name: String,

    #[serde(rename = "domain")]
    #[validate(length(min = 1, message = "At least one domain is required"))]
    #[validate(custom(function = crate::config::validate_unique_strings))]
    pub domains: Vec<String>,

    #[serde(rename = "cluster")]
    #[validate(length(min = 1, message = "At least one cluster route is required"))]
    #[validate(nested)]
    pub clusters: Vec<RdsClusterConfig>,

    #[validate(nested)]
    pub action: RdsActionConfig,
}

/// A path-prefix route to one or more weighted cluster targets.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RdsClusterConfig {
    #[validate(length(min = 1, message = "Route prefix cannot be empty"))]
    pub prefix: String,

    #[serde(rename = "target")]
    #[validate(length(min = 1, message = "At least one weighted target is required"))]
    #[validate(nested)]
    pub targets: Vec<RdsTargetConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub headers: Vec<RdsHeaderConfig>,
}

/// A weighted cluster target; weights are not normalized.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RdsTargetConfig {
    #[validate(length(min = 1, message = "Target cluster name cannot be empty"))]
    pub name: String,

    #[validate(range(max = 100, message = "Weight must be between 0 and 100"))]
    pub weight: u32,
}

/// An exact-match header predicate.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RdsHeaderConfig {
    #[validate(length(min = 1, message = "Header name cannot be empty"))]
    pub name: String,

    #[serde(rename = "string-match")]
    pub string_match: RdsStringMatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RdsStringMatcherConfig {
    pub exact: String,
}

/// Retry/timeout action shared by every route of a virtual host.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RdsActionConfig {
    #[validate(range(min = 1, message = "timeout must be at least 1 second"))]
    pub timeout: u32,

    #[serde(rename = "idle-timeout")]
    #[validate(range(min = 1, message = "idle-timeout must be at least 1 second"))]
    pub idle_timeout: u32,

    /// Retry-policy tag: off/no (no retry), retry1 or retry5. Anything else
    /// means no retry.
    #[serde(rename = "retry-policy")]
    #[validate(length(min = 1, message = "retry-policy cannot be empty"))]
    pub retry_policy: String,
}

impl RdsActionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.idle_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vhost() -> RdsConfig {
        RdsConfig {
            vhost_name: "storefront".to_string(),
            domains: vec!["shop.example.com".to_string()],
            clusters: vec![RdsClusterConfig {
                prefix: "/cart".to_string(),
                targets: vec![RdsTargetConfig { name: "cart".to_string(), weight: 100 }],
                headers: vec![],
            }],
            action: RdsActionConfig {
                timeout: 30,
                idle_timeout: 60,
                retry_policy: "retry1".to_string(),
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(vhost().validate().is_ok());
    }

    #[test]
    fn test_duplicate_domains_rejected() {
        let mut config = vhost();
        config.domains = vec!["a.example.com".to_string(), "a.example.com".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_weight_bounds() {
        let mut config = vhost();
        config.clusters[0].targets[0].weight = 101;
        assert!(config.validate().is_err());
        config.clusters[0].targets[0].weight = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_kebab_case_yaml() {
        let yaml = r#"
- vhost: storefront
  domain: [shop.example.com, www.example.com]
  cluster:
    - prefix: /cart
      target:
        - name: cart
          weight: 80
        - name: cart-canary
          weight: 20
      headers:
        - name: x-canary
          string-match:
            exact: "1"
  action:
    timeout: 30
    idle-timeout: 60
    retry-policy: retry5
"#;
        let configs: Vec<RdsConfig> = serde_yaml::from_str(yaml).unwrap();
        let config = &configs[0];
        assert_eq!(config.domains.len(), 2);
        assert_eq!(config.clusters[0].targets[1].name, "cart-canary");
        assert_eq!(config.clusters[0].headers[0].string_match.exact, "1");
        assert_eq!(config.action.retry_policy, "retry5");
    }
}
