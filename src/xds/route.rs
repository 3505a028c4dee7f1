//! RDS translation using envoy-types
//!
//! Maps validated `RdsConfig` documents onto a single `RouteConfiguration`
//! holding every virtual host. Weighted-cluster targets reference CDS
//! clusters through the canonical naming table; the total weight is the
//! plain arithmetic sum of the configured weights, never normalized.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, retry_policy::RetryBackOff, route::Action,
    route_action::ClusterSpecifier, route_match::PathSpecifier, weighted_cluster::ClusterWeight,
    HeaderMatcher, RetryPolicy, Route, RouteAction, RouteConfiguration, RouteMatch, VirtualHost,
    WeightedCluster,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use envoy_types::pb::google::protobuf::UInt32Value;

use crate::config::{RdsActionConfig, RdsClusterConfig, RdsConfig, RdsHeaderConfig};
use crate::errors::Result;

use super::naming;
use super::source::duration_proto;

const DEFAULT_RETRY_BACKOFF_BASE: Duration = Duration::from_millis(100);
const DEFAULT_RETRY_BACKOFF_MAX: Duration = Duration::from_secs(3);
const DEFAULT_RETRY_PER_TRY_TIMEOUT: Duration = Duration::from_secs(1);

const RETRY_ON: &str = "5xx,gateway-error,reset,connect-failure";

/// Operator-tunable knobs for route translation.
#[derive(Debug, Clone)]
pub struct RouteOptions {
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub retry_per_try_timeout: Duration,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
            retry_backoff_max: DEFAULT_RETRY_BACKOFF_MAX,
            retry_per_try_timeout: DEFAULT_RETRY_PER_TRY_TIMEOUT,
        }
    }
}

/// Translates RDS documents; carries the class version counter.
#[derive(Debug)]
pub struct RouteTranslator {
    options: RouteOptions,
    version: AtomicU64,
}

impl Default for RouteTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTranslator {
    pub fn new() -> Self {
        Self::with_options(RouteOptions::default())
    }

    pub fn with_options(options: RouteOptions) -> Self {
        Self { options, version: AtomicU64::new(0) }
    }

    /// Translate all virtual hosts into the single route configuration,
    /// assigning the next class version.
    pub fn create(&self, configs: &[RdsConfig]) -> Result<(String, RouteConfiguration)> {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((version.to_string(), self.route_configuration(configs)))
    }

    fn route_configuration(&self, configs: &[RdsConfig]) -> RouteConfiguration {
        // ref: listener.rs route_specifier
        RouteConfiguration {
            name: naming::route_config_name(),
            virtual_hosts: self.virtual_hosts(configs),
            ..Default::default()
        }
    }

    fn virtual_hosts(&self, configs: &[RdsConfig]) -> Vec<VirtualHost> {
        configs
            .iter()
            .map(|config| VirtualHost {
                name: naming::vhost_name(&config.vhost_name),
                domains: config.domains.clone(),
                routes: self.routes(&config.clusters, &config.action),
                ..Default::default()
            })
            .collect()
    }

    fn routes(&self, clusters: &[RdsClusterConfig], action: &RdsActionConfig) -> Vec<Route> {
        clusters.iter().map(|cluster| self.route(cluster, action)).collect()
    }

    fn route(&self, cluster: &RdsClusterConfig, action: &RdsActionConfig) -> Route {
        Route {
            name: naming::route_name(&cluster.prefix),
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix(cluster.prefix.clone())),
                headers: self.headers(&cluster.headers),
                ..Default::default()
            }),
            action: Some(Action::Route(RouteAction {
                cluster_specifier: Some(self.weighted_clusters(cluster)),
                retry_policy: Some(self.retry_policy(&action.retry_policy)),
                timeout: Some(duration_proto(action.timeout())),
                idle_timeout: Some(duration_proto(action.idle_timeout())),
                ..Default::default()
            })),
            ..Default::default()
        }
    }

    fn headers(&self, headers: &[RdsHeaderConfig]) -> Vec<HeaderMatcher> {
        headers
            .iter()
            .map(|header| HeaderMatcher {
                name: header.name.clone(),
                header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
                    match_pattern: Some(MatchPattern::Exact(header.string_match.exact.clone())),
                    ..Default::default()
                })),
                ..Default::default()
            })
            .collect()
    }

    fn weighted_clusters(&self, cluster: &RdsClusterConfig) -> ClusterSpecifier {
        let total_weight: u32 = cluster.targets.iter().map(|target| target.weight).sum();
        let clusters = cluster
            .targets
            .iter()
            .map(|target| ClusterWeight {
                // ref: cluster.rs cluster name
                name: naming::cluster_name(&target.name),
                weight: Some(UInt32Value { value: target.weight }),
                ..Default::default()
            })
            .collect();

        ClusterSpecifier::WeightedClusters(WeightedCluster {
            clusters,
            total_weight: Some(UInt32Value { value: total_weight }),
            ..Default::default()
        })
    }

    fn retry_policy(&self, tag: &str) -> RetryPolicy {
        match tag {
            "off" | "no" => self.no_retry(),
            "retry1" => self.retry_on(1),
            "retry5" => self.retry_on(5),
            _ => self.no_retry(),
        }
    }

    fn retry_on(&self, retry_count: u32) -> RetryPolicy {
        RetryPolicy {
            retry_on: RETRY_ON.to_string(),
            num_retries: Some(UInt32Value { value: retry_count }),
            per_try_timeout: Some(duration_proto(self.options.retry_per_try_timeout)),
            retry_back_off: Some(RetryBackOff {
                base_interval: Some(duration_proto(self.options.retry_backoff_base)),
                max_interval: Some(duration_proto(self.options.retry_backoff_max)),
            }),
            ..Default::default()
        }
    }

    fn no_retry(&self) -> RetryPolicy {
        RetryPolicy {
            retry_on: String::new(),
            num_retries: Some(UInt32Value { value: 0 }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RdsStringMatcherConfig, RdsTargetConfig};

    fn action(retry_policy: &str) -> RdsActionConfig {
        RdsActionConfig {
            timeout: 30,
            idle_timeout: 60,
            retry_policy: retry_policy.to_string(),
        }
    }

    fn vhost(retry_policy: &str, targets: Vec<RdsTargetConfig>) -> RdsConfig {
        RdsConfig {
            vhost_name: "storefront".to_string(),
            domains: vec!["shop.example.com".to_string()],
            clusters: vec![RdsClusterConfig {
                prefix: "/cart".to_string(),
                targets,
                headers: vec![],
            }],
            action: action(retry_policy),
        }
    }

    fn single_target() -> Vec<RdsTargetConfig> {
        vec![RdsTargetConfig { name: "cart".to_string(), weight: 100 }]
    }

    fn first_route_action(config: &RouteConfiguration) -> &RouteAction {
        let Some(Action::Route(route_action)) = &config.virtual_hosts[0].routes[0].action else {
            panic!("expected route action");
        };
        route_action
    }

    #[test]
    fn test_versions_strictly_increase() {
        let translator = RouteTranslator::new();
        let configs = vec![vhost("no", single_target())];
        let (v1, _) = translator.create(&configs).unwrap();
        let (v2, _) = translator.create(&configs).unwrap();
        assert_eq!(v1, "1");
        assert_eq!(v2, "2");
    }

    #[test]
    fn test_single_route_configuration_holds_all_vhosts() {
        let translator = RouteTranslator::new();
        let mut second = vhost("no", single_target());
        second.vhost_name = "api".to_string();
        second.domains = vec!["api.example.com".to_string()];
        let configs = vec![vhost("no", single_target()), second];

        let (_, route_config) = translator.create(&configs).unwrap();
        assert_eq!(route_config.name, "seiryu_route_config");
        assert_eq!(route_config.virtual_hosts.len(), 2);
        assert_eq!(route_config.virtual_hosts[0].name, "seiryu_vhost_storefront");
        assert_eq!(route_config.virtual_hosts[1].name, "seiryu_vhost_api");
    }

    #[test]
    fn test_total_weight_is_arithmetic_sum() {
        let translator = RouteTranslator::new();
        let targets = vec![
            RdsTargetConfig { name: "cart".to_string(), weight: 80 },
            RdsTargetConfig { name: "cart-canary".to_string(), weight: 20 },
        ];
        let (_, route_config) = translator.create(&[vhost("no", targets)]).unwrap();

        let Some(ClusterSpecifier::WeightedClusters(weighted)) =
            &first_route_action(&route_config).cluster_specifier
        else {
            panic!("expected weighted clusters");
        };
        assert_eq!(weighted.total_weight.as_ref().unwrap().value, 100);
        assert_eq!(weighted.clusters.len(), 2);
        assert_eq!(weighted.clusters[0].name, "seiryu_cluster_cart");
        assert_eq!(weighted.clusters[1].name, "seiryu_cluster_cart_canary");
        assert_eq!(weighted.clusters[1].weight.as_ref().unwrap().value, 20);
    }

    #[test]
    fn test_uneven_total_weight_not_normalized() {
        let translator = RouteTranslator::new();
        let targets = vec![
            RdsTargetConfig { name: "a".to_string(), weight: 1 },
            RdsTargetConfig { name: "b".to_string(), weight: 2 },
        ];
        let (_, route_config) = translator.create(&[vhost("no", targets)]).unwrap();
        let Some(ClusterSpecifier::WeightedClusters(weighted)) =
            &first_route_action(&route_config).cluster_specifier
        else {
            panic!("expected weighted clusters");
        };
        assert_eq!(weighted.total_weight.as_ref().unwrap().value, 3);
    }

    #[test]
    fn test_retry5_selection() {
        let translator = RouteTranslator::new();
        let (_, route_config) = translator.create(&[vhost("retry5", single_target())]).unwrap();
        let retry = first_route_action(&route_config).retry_policy.as_ref().unwrap();

        assert_eq!(retry.num_retries.as_ref().unwrap().value, 5);
        assert_eq!(retry.retry_on, "5xx,gateway-error,reset,connect-failure");
        assert_eq!(retry.per_try_timeout.as_ref().unwrap().seconds, 1);

        let backoff = retry.retry_back_off.as_ref().unwrap();
        assert_eq!(backoff.base_interval.as_ref().unwrap().nanos, 100_000_000);
        assert_eq!(backoff.max_interval.as_ref().unwrap().seconds, 3);
    }

    #[test]
    fn test_retry_tag_dispatch() {
        let translator = RouteTranslator::new();
        for (tag, retries, retry_on_set) in [
            ("off", 0, false),
            ("no", 0, false),
            ("retry1", 1, true),
            ("retry5", 5, true),
            ("sometimes", 0, false),
        ] {
            let (_, route_config) = translator.create(&[vhost(tag, single_target())]).unwrap();
            let retry = first_route_action(&route_config).retry_policy.as_ref().unwrap();
            assert_eq!(retry.num_retries.as_ref().unwrap().value, retries, "tag {}", tag);
            assert_eq!(!retry.retry_on.is_empty(), retry_on_set, "tag {}", tag);
        }
    }

    #[test]
    fn test_route_match_and_timeouts() {
        let translator = RouteTranslator::new();
        let mut config = vhost("no", single_target());
        config.clusters[0].headers = vec![RdsHeaderConfig {
            name: "x-canary".to_string(),
            string_match: RdsStringMatcherConfig { exact: "1".to_string() },
        }];

        let (_, route_config) = translator.create(&[config]).unwrap();
        let route = &route_config.virtual_hosts[0].routes[0];
        assert_eq!(route.name, "seiryu_route_/cart");

        let route_match = route.r#match.as_ref().unwrap();
        assert_eq!(
            route_match.path_specifier,
            Some(PathSpecifier::Prefix("/cart".to_string()))
        );
        let Some(HeaderMatchSpecifier::StringMatch(matcher)) =
            &route_match.headers[0].header_match_specifier
        else {
            panic!("expected string match");
        };
        assert_eq!(matcher.match_pattern, Some(MatchPattern::Exact("1".to_string())));

        let route_action = first_route_action(&route_config);
        assert_eq!(route_action.timeout.as_ref().unwrap().seconds, 30);
        assert_eq!(route_action.idle_timeout.as_ref().unwrap().seconds, 60);
    }
}
