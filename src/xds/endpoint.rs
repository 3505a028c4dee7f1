//! EDS translation using envoy-types
//!
//! Maps validated `EdsConfig` documents onto `ClusterLoadAssignment`
//! messages. The assignment name mirrors the EDS service name the CDS
//! translator writes into each cluster, which is what the snapshot
//! consistency check later verifies.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use envoy_types::pb::envoy::config::core::v3::{
    address, socket_address, Address, HealthStatus, Locality, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    endpoint::HealthCheckConfig, lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint,
    LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::google::protobuf::UInt32Value;
use tracing::debug;

use crate::config::{EdsConfig, EdsInstanceConfig};
use crate::errors::Result;

use super::naming;

const DEFAULT_LOAD_BALANCING_WEIGHT: u32 = 1;

/// Operator-tunable knobs for endpoint translation.
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// Locality load-balancing weight attached to each (region, zone) group.
    pub load_balancing_weight: u32,
    /// Health status newly discovered endpoints start in. Active health
    /// checks promote them once they pass.
    pub initial_health_status: HealthStatus,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            load_balancing_weight: DEFAULT_LOAD_BALANCING_WEIGHT,
            initial_health_status: HealthStatus::Unhealthy,
        }
    }
}

/// Translates EDS documents; carries the class version counter.
#[derive(Debug)]
pub struct EndpointTranslator {
    options: EndpointOptions,
    version: AtomicU64,
}

impl Default for EndpointTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointTranslator {
    pub fn new() -> Self {
        Self::with_options(EndpointOptions::default())
    }

    pub fn with_options(options: EndpointOptions) -> Self {
        Self { options, version: AtomicU64::new(0) }
    }

    /// Translate all endpoint documents, assigning the next class version.
    pub fn create(&self, configs: &[EdsConfig]) -> Result<(String, Vec<ClusterLoadAssignment>)> {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let assignments = configs
            .iter()
            .map(|config| {
                self.cluster_load_assignment(
                    &config.name,
                    &config.balancing_policy,
                    &config.instances,
                )
            })
            .collect();
        Ok((version.to_string(), assignments))
    }

    fn cluster_load_assignment(
        &self,
        name: &str,
        balancing_policy: &str,
        instances: &[EdsInstanceConfig],
    ) -> ClusterLoadAssignment {
        // ref: cluster.rs eds_config
        ClusterLoadAssignment {
            cluster_name: naming::eds_service_name(name),
            endpoints: self.balancing_endpoints(balancing_policy, instances),
            ..Default::default()
        }
    }

    fn balancing_endpoints(
        &self,
        balancing_policy: &str,
        instances: &[EdsInstanceConfig],
    ) -> Vec<LocalityLbEndpoints> {
        match balancing_policy {
            "normal" => self.normal_endpoints(instances),
            "locality" => self.locality_endpoints(instances),
            _ => self.locality_endpoints(instances),
        }
    }

    /// One flat group, no locality attached.
    fn normal_endpoints(&self, instances: &[EdsInstanceConfig]) -> Vec<LocalityLbEndpoints> {
        vec![LocalityLbEndpoints {
            lb_endpoints: self.lb_endpoints(instances),
            ..Default::default()
        }]
    }

    /// One group per (region, zone) pair, deterministically ordered so
    /// repeated translation of the same document is byte-identical.
    fn locality_endpoints(&self, instances: &[EdsInstanceConfig]) -> Vec<LocalityLbEndpoints> {
        let mut grouped: BTreeMap<(&str, &str), Vec<&EdsInstanceConfig>> = BTreeMap::new();
        for instance in instances {
            grouped
                .entry((instance.region.as_str(), instance.zone.as_str()))
                .or_default()
                .push(instance);
        }

        grouped
            .into_iter()
            .map(|((region, zone), group)| self.locality_group(region, zone, &group))
            .collect()
    }

    fn locality_group(
        &self,
        region: &str,
        zone: &str,
        instances: &[&EdsInstanceConfig],
    ) -> LocalityLbEndpoints {
        for instance in instances {
            debug!(region, zone, instance = %instance.instance_name, "locality endpoint");
        }
        LocalityLbEndpoints {
            locality: Some(Locality {
                region: region.to_string(),
                zone: zone.to_string(),
                ..Default::default()
            }),
            lb_endpoints: instances.iter().map(|instance| self.lb_endpoint(instance)).collect(),
            load_balancing_weight: Some(UInt32Value {
                value: self.options.load_balancing_weight,
            }),
            ..Default::default()
        }
    }

    fn lb_endpoints(&self, instances: &[EdsInstanceConfig]) -> Vec<LbEndpoint> {
        instances.iter().map(|instance| self.lb_endpoint(instance)).collect()
    }

    fn lb_endpoint(&self, instance: &EdsInstanceConfig) -> LbEndpoint {
        LbEndpoint {
            host_identifier: Some(HostIdentifier::Endpoint(self.instance_endpoint(instance))),
            health_status: self.options.initial_health_status as i32,
            ..Default::default()
        }
    }

    fn instance_endpoint(&self, instance: &EdsInstanceConfig) -> Endpoint {
        debug!(
            protocol = %instance.protocol,
            instance = %instance.instance_name,
            ip = %instance.ip,
            port = instance.port,
            "endpoint"
        );
        Endpoint {
            address: Some(instance_address(instance)),
            hostname: instance.instance_name.clone(),
            health_check_config: Some(HealthCheckConfig {
                port_value: instance.port,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn instance_address(instance: &EdsInstanceConfig) -> Address {
    let protocol = match instance.protocol.as_str() {
        "udp" => socket_address::Protocol::Udp,
        _ => socket_address::Protocol::Tcp,
    };
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            protocol: protocol as i32,
            address: instance.ip.clone(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(instance.port)),
            ..Default::default()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str, region: &str, zone: &str) -> EdsInstanceConfig {
        EdsInstanceConfig {
            instance_name: name.to_string(),
            ip: "10.0.0.1".to_string(),
            port: 8080,
            region: region.to_string(),
            zone: zone.to_string(),
            protocol: "tcp".to_string(),
        }
    }

    fn eds_config(policy: &str, instances: Vec<EdsInstanceConfig>) -> EdsConfig {
        EdsConfig {
            name: "cart".to_string(),
            balancing_policy: policy.to_string(),
            instances,
        }
    }

    fn translator() -> EndpointTranslator {
        EndpointTranslator::new()
    }

    #[test]
    fn test_versions_strictly_increase() {
        let translator = translator();
        let configs = vec![eds_config("locality", vec![instance("cart-1", "a", "x")])];
        let (v1, _) = translator.create(&configs).unwrap();
        let (v2, _) = translator.create(&configs).unwrap();
        assert_eq!(v1, "1");
        assert_eq!(v2, "2");
    }

    #[test]
    fn test_assignment_name_mirrors_eds_service_name() {
        let translator = translator();
        let configs = vec![eds_config("locality", vec![instance("cart-1", "a", "x")])];
        let (_, assignments) = translator.create(&configs).unwrap();
        assert_eq!(assignments[0].cluster_name, naming::eds_service_name("cart"));
    }

    #[test]
    fn test_locality_grouping_by_region_and_zone() {
        let translator = translator();
        let configs = vec![eds_config(
            "locality",
            vec![
                instance("i1", "region-a", "x"),
                instance("i2", "region-a", "y"),
                instance("i3", "region-b", "x"),
                instance("i4", "region-b", "y"),
            ],
        )];
        let (_, assignments) = translator.create(&configs).unwrap();
        let groups = &assignments[0].endpoints;

        assert_eq!(groups.len(), 4);
        for group in groups {
            assert_eq!(group.lb_endpoints.len(), 1);
            assert_eq!(group.load_balancing_weight.as_ref().unwrap().value, 1);
            assert!(group.locality.is_some());
        }

        let pairs: Vec<(String, String)> = groups
            .iter()
            .map(|g| {
                let locality = g.locality.as_ref().unwrap();
                (locality.region.clone(), locality.zone.clone())
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("region-a".to_string(), "x".to_string()),
                ("region-a".to_string(), "y".to_string()),
                ("region-b".to_string(), "x".to_string()),
                ("region-b".to_string(), "y".to_string()),
            ]
        );
    }

    #[test]
    fn test_normal_policy_flattens_without_locality() {
        let translator = translator();
        let configs = vec![eds_config(
            "normal",
            vec![instance("i1", "region-a", "x"), instance("i2", "region-b", "y")],
        )];
        let (_, assignments) = translator.create(&configs).unwrap();
        let groups = &assignments[0].endpoints;

        assert_eq!(groups.len(), 1);
        assert!(groups[0].locality.is_none());
        assert_eq!(groups[0].lb_endpoints.len(), 2);
    }

    #[test]
    fn test_unknown_policy_defaults_to_locality() {
        let translator = translator();
        let configs = vec![eds_config("", vec![instance("i1", "region-a", "x")])];
        let (_, assignments) = translator.create(&configs).unwrap();
        assert!(assignments[0].endpoints[0].locality.is_some());
    }

    #[test]
    fn test_initial_health_status_defaults_unhealthy() {
        let translator = translator();
        let configs = vec![eds_config("locality", vec![instance("i1", "region-a", "x")])];
        let (_, assignments) = translator.create(&configs).unwrap();
        let endpoint = &assignments[0].endpoints[0].lb_endpoints[0];
        assert_eq!(endpoint.health_status, HealthStatus::Unhealthy as i32);
    }

    #[test]
    fn test_initial_health_status_override() {
        let options = EndpointOptions {
            initial_health_status: HealthStatus::Healthy,
            ..Default::default()
        };
        let translator = EndpointTranslator::with_options(options);
        let configs = vec![eds_config("locality", vec![instance("i1", "region-a", "x")])];
        let (_, assignments) = translator.create(&configs).unwrap();
        let endpoint = &assignments[0].endpoints[0].lb_endpoints[0];
        assert_eq!(endpoint.health_status, HealthStatus::Healthy as i32);
    }

    #[test]
    fn test_endpoint_carries_address_and_health_check_port() {
        let translator = translator();
        let mut udp = instance("i1", "region-a", "x");
        udp.protocol = "udp".to_string();
        let configs = vec![eds_config("locality", vec![udp])];
        let (_, assignments) = translator.create(&configs).unwrap();

        let Some(HostIdentifier::Endpoint(endpoint)) =
            &assignments[0].endpoints[0].lb_endpoints[0].host_identifier
        else {
            panic!("expected endpoint host identifier");
        };
        assert_eq!(endpoint.hostname, "i1");
        assert_eq!(endpoint.health_check_config.as_ref().unwrap().port_value, 8080);

        let Some(address::Address::SocketAddress(socket)) =
            &endpoint.address.as_ref().unwrap().address
        else {
            panic!("expected socket address");
        };
        assert_eq!(socket.address, "10.0.0.1");
        assert_eq!(socket.protocol, socket_address::Protocol::Udp as i32);
        assert_eq!(
            socket.port_specifier,
            Some(socket_address::PortSpecifier::PortValue(8080))
        );
    }
}
