//! Listener discovery (LDS) document.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// The single listener definition from `lds.yaml` (top-level mapping).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LdsConfig {
    #[validate(nested)]
    pub listen: LdsListenConfig,

    #[validate(nested)]
    pub server: LdsServerConfig,

    #[validate(nested)]
    pub timeout: LdsTimeoutConfig,

    #[serde(rename = "accesslog")]
    #[validate(nested)]
    pub access_log: LdsAccessLogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LdsListenConfig {
    /// Transport-protocol tag: tcp or udp, default tcp.
    #[serde(default)]
    pub protocol: String,

    #[validate(custom(function = crate::config::validate_ip_literal))]
    pub ip: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LdsServerConfig {
    #[validate(length(min = 1, message = "Server name cannot be empty"))]
    pub name: String,

    #[serde(rename = "use-remote-addr", default)]
    pub use_remote_addr: bool,

    #[serde(rename = "skip-xff-append", default)]
    pub skip_xff_append: bool,

    #[serde(rename = "xff-trusted-hops", default)]
    pub xff_trusted_hops: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LdsTimeoutConfig {
    #[serde(rename = "request-timeout")]
    #[validate(range(min = 1, message = "request-timeout must be at least 1 second"))]
    pub request_timeout: u32,

    #[serde(rename = "drain-timeout")]
    #[validate(range(min = 1, message = "drain-timeout must be at least 1 second"))]
    pub drain_timeout: u32,

    #[serde(rename = "idle-timeout")]
    #[validate(range(min = 1, message = "idle-timeout must be at least 1 second"))]
    pub idle_timeout: u32,

    #[serde(rename = "max-duration")]
    #[validate(range(min = 1, message = "max-duration must be at least 1 second"))]
    pub max_duration: u32,
}

impl LdsTimeoutConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.request_timeout))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.drain_timeout))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.idle_timeout))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_duration))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LdsAccessLogConfig {
    #[serde(rename = "log-id")]
    #[validate(length(min = 1, message = "log-id cannot be empty"))]
    pub log_id: String,

    #[serde(rename = "flush-interval")]
    #[validate(range(min = 1, message = "flush-interval must be at least 1 second"))]
    pub flush_interval: u32,

    #[serde(rename = "buffer-size")]
    #[validate(range(min = 1, message = "buffer-size must be at least 1 byte"))]
    pub buffer_size: u32,
}

impl LdsAccessLogConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.flush_interval))
    }
}
