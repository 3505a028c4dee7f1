//! Resource store and snapshot production.
//!
//! The store holds the latest translated value and version for each of the
//! four resource classes behind one read-write lock. Writers update exactly
//! one slot; the snapshot reader observes all four slots under a shared lock
//! so a snapshot never tears, even though slots advance independently.
//! Whether the combination is *publishable* is a separate question answered
//! by the consistency check.

use std::collections::BTreeSet;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager,
};
use envoy_types::pb::envoy::config::listener::v3::filter::ConfigType as FilterConfigType;
use envoy_types::pb::google::protobuf::Any;
use parking_lot::RwLock;
use prost::Message;

use crate::errors::{Error, Result};

pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const RUNTIME_TYPE_URL: &str = "type.googleapis.com/envoy.service.runtime.v3.Runtime";
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// Snapshot version: dotted per-class versions, endpoints first.
fn version_string(endpoints: &str, clusters: &str, routes: &str, listener: &str) -> String {
    [endpoints, clusters, routes, listener].join(".")
}

#[derive(Debug, Default)]
struct Slots {
    endpoints: Vec<ClusterLoadAssignment>,
    endpoints_version: String,
    clusters: Vec<Cluster>,
    clusters_version: String,
    route: Option<RouteConfiguration>,
    route_version: String,
    listener: Option<Listener>,
    listener_version: String,
}

/// The four per-class slots behind one read-write lock.
#[derive(Debug)]
pub struct ResourceStore {
    slots: RwLock<Slots>,
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                endpoints_version: "0".to_string(),
                clusters_version: "0".to_string(),
                route_version: "0".to_string(),
                listener_version: "0".to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn update_endpoints(&self, version: String, endpoints: Vec<ClusterLoadAssignment>) {
        let mut slots = self.slots.write();
        slots.endpoints_version = version;
        slots.endpoints = endpoints;
    }

    pub fn update_clusters(&self, version: String, clusters: Vec<Cluster>) {
        let mut slots = self.slots.write();
        slots.clusters_version = version;
        slots.clusters = clusters;
    }

    pub fn update_route(&self, version: String, route: RouteConfiguration) {
        let mut slots = self.slots.write();
        slots.route_version = version;
        slots.route = Some(route);
    }

    pub fn update_listener(&self, version: String, listener: Listener) {
        let mut slots = self.slots.write();
        slots.listener_version = version;
        slots.listener = Some(listener);
    }

    /// Current dotted version, without building a snapshot.
    pub fn version(&self) -> String {
        let slots = self.slots.read();
        version_string(
            &slots.endpoints_version,
            &slots.clusters_version,
            &slots.route_version,
            &slots.listener_version,
        )
    }

    /// Build a consistency-checked snapshot of the committed slots.
    ///
    /// Consistency failures are expected during the transient window where
    /// classes have advanced unevenly; callers log and retry on the next
    /// change event.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let slots = self.slots.read();

        check_consistency(&slots)?;

        let version = version_string(
            &slots.endpoints_version,
            &slots.clusters_version,
            &slots.route_version,
            &slots.listener_version,
        );

        Ok(Snapshot {
            version,
            endpoints: slots
                .endpoints
                .iter()
                .map(|e| BuiltResource::new(e.cluster_name.clone(), ENDPOINT_TYPE_URL, e))
                .collect(),
            clusters: slots
                .clusters
                .iter()
                .map(|c| BuiltResource::new(c.name.clone(), CLUSTER_TYPE_URL, c))
                .collect(),
            routes: slots
                .route
                .iter()
                .map(|r| BuiltResource::new(r.name.clone(), ROUTE_TYPE_URL, r))
                .collect(),
            listeners: slots
                .listener
                .iter()
                .map(|l| BuiltResource::new(l.name.clone(), LISTENER_TYPE_URL, l))
                .collect(),
        })
    }
}

/// Cross-class reference check, matching what the discovery protocol needs
/// to make progress: cluster EDS service names and endpoint assignments
/// must pair up in both directions, and the listener's RDS subscription
/// must resolve to the route configuration we hold. Weighted-cluster
/// targets inside routes are deliberately not validated; Envoy tolerates a
/// route naming a cluster it has not yet seen, and checking it here would
/// wedge recovery when a rename flows through the files one class at a
/// time.
fn check_consistency(slots: &Slots) -> Result<()> {
    let eds_service_names: BTreeSet<&str> = slots
        .clusters
        .iter()
        .filter_map(|c| c.eds_cluster_config.as_ref())
        .map(|eds| eds.service_name.as_str())
        .collect();
    let assignment_names: BTreeSet<&str> =
        slots.endpoints.iter().map(|e| e.cluster_name.as_str()).collect();

    if let Some(name) = eds_service_names.difference(&assignment_names).next() {
        return Err(Error::inconsistent(format!(
            "cluster EDS service {} has no endpoint assignment",
            name
        )));
    }
    if let Some(name) = assignment_names.difference(&eds_service_names).next() {
        return Err(Error::inconsistent(format!(
            "endpoint assignment {} matches no cluster EDS service",
            name
        )));
    }

    if let Some(listener) = &slots.listener {
        for name in listener_route_references(listener) {
            match &slots.route {
                Some(route) if route.name == name => {}
                _ => {
                    return Err(Error::inconsistent(format!(
                        "listener references unknown route configuration {}",
                        name
                    )));
                }
            }
        }
    }

    Ok(())
}

fn listener_route_references(listener: &Listener) -> Vec<String> {
    let mut names = Vec::new();
    for chain in &listener.filter_chains {
        for filter in &chain.filters {
            let Some(FilterConfigType::TypedConfig(any)) = &filter.config_type else { continue };
            let Ok(manager) = HttpConnectionManager::decode(any.value.as_slice()) else {
                continue;
            };
            if let Some(RouteSpecifier::Rds(rds)) = manager.route_specifier {
                names.push(rds.route_config_name);
            }
        }
    }
    names
}

/// A resource encoded for the wire, keyed by its canonical name.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    fn new<M: Message>(name: String, type_url: &str, message: &M) -> Self {
        Self {
            name,
            resource: Any { type_url: type_url.to_string(), value: message.encode_to_vec() },
        }
    }
}

/// An immutable, versioned, internally consistent bundle of all four
/// resource classes for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    version: String,
    endpoints: Vec<BuiltResource>,
    clusters: Vec<BuiltResource>,
    routes: Vec<BuiltResource>,
    listeners: Vec<BuiltResource>,
}

impl Snapshot {
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Resources for a discovery type URL. Runtime and secret requests are
    /// legal and answered with an empty bundle.
    pub fn resources(&self, type_url: &str) -> &[BuiltResource] {
        match type_url {
            ENDPOINT_TYPE_URL => &self.endpoints,
            CLUSTER_TYPE_URL => &self.clusters,
            ROUTE_TYPE_URL => &self.routes,
            LISTENER_TYPE_URL => &self.listeners,
            _ => &[],
        }
    }

    pub fn total_resources(&self) -> usize {
        self.endpoints.len() + self.clusters.len() + self.routes.len() + self.listeners.len()
    }
}
