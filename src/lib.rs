//! # Seiryu
//!
//! Seiryu (清流, "clear stream") is a file-driven control plane for an Envoy
//! proxy fleet. Four YAML documents (clusters, endpoints, routes and a
//! listener) are watched on disk, validated, translated into typed Envoy
//! resources and published as consistent snapshots to subscribed proxies over
//! the streaming xDS protocol. A second gRPC endpoint terminates the Envoy
//! access-log stream and emits LTSV records.
//!
//! ## Architecture
//!
//! ```text
//! cds/eds/rds/lds.yaml → reconciler → translators → resource store
//!                                                        ↓
//!                            snapshot (consistency-checked) → per-node cache
//!                                                        ↓
//!                                 discovery gRPC services → Envoy fleet
//! ```
//!
//! The access-log path is independent: `Envoy → ALS gRPC → LTSV writer`.

pub mod accesslog;
pub mod cli;
pub mod config;
pub mod errors;
pub mod observability;
pub mod startup;
pub mod xds;

pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "seiryu");
    }
}
