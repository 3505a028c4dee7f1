//! CDS translation using envoy-types
//!
//! Maps validated `CdsConfig` documents onto Envoy `Cluster` messages. Every
//! cluster is EDS-backed and points its endpoint discovery at the service
//! name derived from the same document, so CDS and EDS stay in lock-step
//! through the canonical naming table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use envoy_types::pb::envoy::config::cluster::v3::{
    cluster::{
        self, ClusterDiscoveryType, CommonLbConfig, DiscoveryType, DnsLookupFamily,
        EdsClusterConfig, LbPolicy, LbSubsetConfig, RefreshRate,
    },
    Cluster, OutlierDetection, UpstreamConnectionOptions,
};
use envoy_types::pb::envoy::config::core::v3::{
    health_check::{self, HttpHealthCheck},
    ConfigSource, HealthCheck, TcpKeepalive,
};
use envoy_types::pb::envoy::r#type::v3::{Int64Range, Percent};
use envoy_types::pb::google::protobuf::UInt32Value;
use tracing::warn;

use crate::config::{CdsConfig, CdsHealthCheckConfig};
use crate::errors::Result;

use super::naming;
use super::source::duration_proto;

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_KEEPALIVE_INTERVAL_SECS: u32 = 60;
const DEFAULT_KEEPALIVE_TIME_SECS: u32 = 60;
const DEFAULT_REFRESH_INTERVAL_BASE: Duration = Duration::from_secs(5);
const DEFAULT_REFRESH_INTERVAL_MAX: Duration = Duration::from_secs(10);
const DEFAULT_HEALTH_CHECK_INITIAL_JITTER: Duration = Duration::from_secs(1);
const DEFAULT_HEALTH_CHECK_NO_TRAFFIC_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_OUTLIER_CONSECUTIVE_5XX: u32 = 10;
const DEFAULT_OUTLIER_CONSECUTIVE_GATEWAY_FAILURE: u32 = 30;
const DEFAULT_OUTLIER_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_OUTLIER_BASE_EJECTION_TIME: Duration = Duration::from_secs(30);
const DEFAULT_OUTLIER_SUCCESS_RATE_MIN_HOSTS: u32 = 5;

/// Operator-tunable knobs for cluster translation.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub connection_timeout: Duration,
    pub keepalive_interval_secs: u32,
    pub keepalive_time_secs: u32,
    pub refresh_interval_base: Duration,
    pub refresh_interval_max: Duration,
    pub health_check_initial_jitter: Duration,
    pub health_check_no_traffic_interval: Duration,
    pub outlier_consecutive_5xx: u32,
    pub outlier_consecutive_gateway_failure: u32,
    pub outlier_interval: Duration,
    pub outlier_base_ejection_time: Duration,
    pub outlier_success_rate_min_hosts: u32,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            keepalive_interval_secs: DEFAULT_KEEPALIVE_INTERVAL_SECS,
            keepalive_time_secs: DEFAULT_KEEPALIVE_TIME_SECS,
            refresh_interval_base: DEFAULT_REFRESH_INTERVAL_BASE,
            refresh_interval_max: DEFAULT_REFRESH_INTERVAL_MAX,
            health_check_initial_jitter: DEFAULT_HEALTH_CHECK_INITIAL_JITTER,
            health_check_no_traffic_interval: DEFAULT_HEALTH_CHECK_NO_TRAFFIC_INTERVAL,
            outlier_consecutive_5xx: DEFAULT_OUTLIER_CONSECUTIVE_5XX,
            outlier_consecutive_gateway_failure: DEFAULT_OUTLIER_CONSECUTIVE_GATEWAY_FAILURE,
            outlier_interval: DEFAULT_OUTLIER_INTERVAL,
            outlier_base_ejection_time: DEFAULT_OUTLIER_BASE_EJECTION_TIME,
            outlier_success_rate_min_hosts: DEFAULT_OUTLIER_SUCCESS_RATE_MIN_HOSTS,
        }
    }
}

/// Translates CDS documents; carries the class version counter.
#[derive(Debug)]
pub struct ClusterTranslator {
    options: ClusterOptions,
    xds_config: ConfigSource,
    version: AtomicU64,
}

impl ClusterTranslator {
    pub fn new(xds_config: ConfigSource) -> Self {
        Self::with_options(xds_config, ClusterOptions::default())
    }

    pub fn with_options(xds_config: ConfigSource, options: ClusterOptions) -> Self {
        Self { options, xds_config, version: AtomicU64::new(0) }
    }

    /// Translate all cluster documents, assigning the next class version.
    pub fn create(&self, configs: &[CdsConfig]) -> Result<(String, Vec<Cluster>)> {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let clusters = configs.iter().map(|config| self.cluster(config)).collect();
        Ok((version.to_string(), clusters))
    }

    fn cluster(&self, config: &CdsConfig) -> Cluster {
        // ref: route.rs weighted targets
        let cluster_name = naming::cluster_name(&config.name);
        Cluster {
            name: cluster_name,
            connect_timeout: Some(duration_proto(self.options.connection_timeout)),
            upstream_connection_options: Some(self.upstream_connection_options()),
            cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32)),
            eds_cluster_config: Some(self.eds_config(&config.name)),
            common_lb_config: Some(self.common_lb_config()),
            lb_subset_config: Some(self.subset_lb_config()),
            lb_policy: self.lb_policy(&config.lb_policy) as i32,
            dns_lookup_family: DnsLookupFamily::Auto as i32,
            dns_failure_refresh_rate: Some(self.refresh_rate()),
            respect_dns_ttl: true,
            health_checks: self.health_checks(&config.health_check),
            ignore_health_on_host_removal: true,
            outlier_detection: Some(self.outlier_detection()),
            ..Default::default()
        }
    }

    fn lb_policy(&self, tag: &str) -> LbPolicy {
        match tag {
            "round-robin" => LbPolicy::RoundRobin,
            "least-request" => LbPolicy::LeastRequest,
            "least-reqest" => {
                // historical misspelling still found in older documents
                warn!(tag, "deprecated lb-policy spelling, use least-request");
                LbPolicy::LeastRequest
            }
            "random" => LbPolicy::Random,
            other => {
                warn!(tag = other, "unknown lb-policy, falling back to round-robin");
                LbPolicy::RoundRobin
            }
        }
    }

    fn common_lb_config(&self) -> CommonLbConfig {
        CommonLbConfig {
            // never exclude the whole cluster on mass health-check failure
            healthy_panic_threshold: Some(Percent { value: 1.0 }),
            locality_config_specifier: Some(
                cluster::common_lb_config::LocalityConfigSpecifier::LocalityWeightedLbConfig(
                    cluster::common_lb_config::LocalityWeightedLbConfig::default(),
                ),
            ),
            ..Default::default()
        }
    }

    fn subset_lb_config(&self) -> LbSubsetConfig {
        LbSubsetConfig {
            fallback_policy: cluster::lb_subset_config::LbSubsetFallbackPolicy::AnyEndpoint as i32,
            locality_weight_aware: true,
            scale_locality_weight: true,
            ..Default::default()
        }
    }

    fn refresh_rate(&self) -> RefreshRate {
        RefreshRate {
            base_interval: Some(duration_proto(self.options.refresh_interval_base)),
            max_interval: Some(duration_proto(self.options.refresh_interval_max)),
        }
    }

    fn upstream_connection_options(&self) -> UpstreamConnectionOptions {
        UpstreamConnectionOptions {
            tcp_keepalive: Some(TcpKeepalive {
                keepalive_time: Some(UInt32Value { value: self.options.keepalive_time_secs }),
                keepalive_interval: Some(UInt32Value {
                    value: self.options.keepalive_interval_secs,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn eds_config(&self, name: &str) -> EdsClusterConfig {
        // ref: endpoint.rs cluster_load_assignment
        EdsClusterConfig {
            service_name: naming::eds_service_name(name),
            eds_config: Some(self.xds_config.clone()),
        }
    }

    fn health_checks(&self, config: &CdsHealthCheckConfig) -> Vec<HealthCheck> {
        vec![HealthCheck {
            timeout: Some(duration_proto(config.timeout())),
            interval: Some(duration_proto(config.interval())),
            healthy_threshold: Some(UInt32Value { value: config.healthy_count }),
            unhealthy_threshold: Some(UInt32Value { value: config.unhealthy_count }),
            initial_jitter: Some(duration_proto(self.options.health_check_initial_jitter)),
            no_traffic_interval: Some(duration_proto(
                self.options.health_check_no_traffic_interval,
            )),
            health_checker: Some(health_check::HealthChecker::HttpHealthCheck(HttpHealthCheck {
                host: config.host.clone(),
                path: config.path.clone(),
                expected_statuses: expected_statuses(&config.status),
                ..Default::default()
            })),
            ..Default::default()
        }]
    }

    fn outlier_detection(&self) -> OutlierDetection {
        OutlierDetection {
            consecutive_5xx: Some(UInt32Value { value: self.options.outlier_consecutive_5xx }),
            consecutive_gateway_failure: Some(UInt32Value {
                value: self.options.outlier_consecutive_gateway_failure,
            }),
            interval: Some(duration_proto(self.options.outlier_interval)),
            base_ejection_time: Some(duration_proto(self.options.outlier_base_ejection_time)),
            success_rate_minimum_hosts: Some(UInt32Value {
                value: self.options.outlier_success_rate_min_hosts,
            }),
            ..Default::default()
        }
    }
}

fn http_status_ok_range() -> Vec<Int64Range> {
    vec![Int64Range { start: 200, end: 300 }]
}

/// Expected-status translation. Empty means "any 2xx"; a lone 200 widens to
/// the whole 2xx range; otherwise each status becomes the half-open range
/// `[s, s+1)`, sorted, with the last range widened by one when every value
/// is identical so no range collapses to zero width.
fn expected_statuses(statuses: &[u32]) -> Vec<Int64Range> {
    if statuses.is_empty() {
        return http_status_ok_range();
    }

    if statuses.len() == 1 {
        if statuses[0] == 200 {
            return http_status_ok_range();
        }
        let status = i64::from(statuses[0]);
        return vec![Int64Range { start: status, end: status + 1 }];
    }

    let mut sorted: Vec<u32> = statuses.to_vec();
    sorted.sort_unstable();
    let all_identical = sorted.first() == sorted.last();

    let mut ranges: Vec<Int64Range> = sorted
        .into_iter()
        .map(|status| Int64Range { start: i64::from(status), end: i64::from(status) + 1 })
        .collect();

    if all_identical {
        if let Some(last) = ranges.last_mut() {
            last.end += 1;
        }
    }
    ranges
}
