//! # Configuration Management
//!
//! Declarative configuration for the four discovery documents. Each document
//! is a YAML file with kebab-case field names, deserialized with serde and
//! validated with the `validator` derive before translation.

mod cds;
mod eds;
mod lds;
mod loader;
mod rds;

pub use cds::{CdsConfig, CdsHealthCheckConfig};
pub use eds::{EdsConfig, EdsInstanceConfig};
pub use lds::{
    LdsAccessLogConfig, LdsConfig, LdsListenConfig, LdsServerConfig, LdsTimeoutConfig,
};
pub use loader::{load_cds, load_eds, load_lds, load_rds};
pub use rds::{
    RdsActionConfig, RdsClusterConfig, RdsConfig, RdsHeaderConfig, RdsStringMatcherConfig,
    RdsTargetConfig,
};

use validator::ValidationError;

// Checks the validator derive cannot express declaratively.

pub(crate) fn validate_ip_literal(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("ip"))
}

pub(crate) fn validate_unique_strings(values: &[String]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(ValidationError::new("unique"));
        }
    }
    Ok(())
}

pub(crate) fn validate_unique_statuses(values: &[u32]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(ValidationError::new("unique"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_literal() {
        assert!(validate_ip_literal("10.0.0.1").is_ok());
        assert!(validate_ip_literal("::1").is_ok());
        assert!(validate_ip_literal("cart.internal").is_err());
        assert!(validate_ip_literal("").is_err());
    }

    #[test]
    fn test_unique_strings() {
        let unique = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        assert!(validate_unique_strings(&unique).is_ok());

        let duplicated = vec!["a.example.com".to_string(), "a.example.com".to_string()];
        assert!(validate_unique_strings(&duplicated).is_err());
    }

    #[test]
    fn test_unique_statuses() {
        assert!(validate_unique_statuses(&[200, 404]).is_ok());
        assert!(validate_unique_statuses(&[200, 200]).is_err());
    }
}
