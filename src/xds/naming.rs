//! Canonical resource naming.
//!
//! Cross-references between resource classes (route → cluster, cluster →
//! endpoint assignment, listener → route configuration) all go through the
//! helpers here so the prefixes cannot drift between translators.

/// Prefix for CDS cluster names; routes reference clusters through it.
pub const CLUSTER_PREFIX: &str = "seiryu-cluster";

/// Prefix for EDS service names; clusters point their EDS config at it.
pub const EDS_SERVICE_PREFIX: &str = "seiryu-eds";

/// Prefix for virtual host names.
pub const VHOST_PREFIX: &str = "seiryu-vhost";

/// Prefix for individual route names.
pub const ROUTE_PREFIX: &str = "seiryu-route";

/// Name of the single route configuration the listener subscribes to.
pub const ROUTE_CONFIG_PREFIX: &str = "seiryu-route-config";

/// Name of the single listener.
pub const LISTENER_PREFIX: &str = "seiryu-listener";

/// Bootstrap cluster (in envoy.yaml) carrying the xDS channel itself.
pub const BOOTSTRAP_XDS_CLUSTER: &str = "xds_cluster";

/// Bootstrap cluster (in envoy.yaml) carrying the access-log channel.
pub const BOOTSTRAP_ALS_CLUSTER: &str = "als_cluster";

/// Canonical name mapping: join with `_`, collapse `-` to `_`.
pub fn xds_name(parts: &[&str]) -> String {
    parts.join("_").replace('-', "_")
}

pub fn cluster_name(name: &str) -> String {
    xds_name(&[CLUSTER_PREFIX, name])
}

pub fn eds_service_name(name: &str) -> String {
    xds_name(&[EDS_SERVICE_PREFIX, name])
}

pub fn vhost_name(name: &str) -> String {
    xds_name(&[VHOST_PREFIX, name])
}

pub fn route_name(prefix: &str) -> String {
    xds_name(&[ROUTE_PREFIX, prefix])
}

pub fn route_config_name() -> String {
    xds_name(&[ROUTE_CONFIG_PREFIX])
}

pub fn listener_name() -> String {
    xds_name(&[LISTENER_PREFIX])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_collapse() {
        assert_eq!(xds_name(&["a-b", "c"]), "a_b_c");
        assert_eq!(xds_name(&["plain"]), "plain");
        assert_eq!(xds_name(&["a", "b", "c"]), "a_b_c");
    }

    #[test]
    fn test_prefixed_names() {
        assert_eq!(cluster_name("cart"), "seiryu_cluster_cart");
        assert_eq!(eds_service_name("cart"), "seiryu_eds_cart");
        assert_eq!(vhost_name("storefront"), "seiryu_vhost_storefront");
        assert_eq!(route_name("/cart"), "seiryu_route_/cart");
        assert_eq!(route_config_name(), "seiryu_route_config");
        assert_eq!(listener_name(), "seiryu_listener");
    }

    #[test]
    fn test_cross_reference_prefixes_agree() {
        // The same input must produce the same cluster name whether referenced
        // from RDS targets or declared by CDS.
        assert_eq!(cluster_name("cart-v2"), cluster_name("cart-v2"));
        assert_eq!(cluster_name("cart-v2"), "seiryu_cluster_cart_v2");
    }
}
