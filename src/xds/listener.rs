//! LDS translation using envoy-types
//!
//! Maps the validated `LdsConfig` document onto the single Envoy `Listener`.
//! The filter chain carries one HttpConnectionManager whose routes come from
//! RDS (through the canonical route-configuration name) and whose access
//! logs stream back to this control plane over the HTTP-gRPC sink.

use std::sync::atomic::{AtomicU64, Ordering};

use envoy_types::pb::envoy::config::accesslog::v3::{
    access_log::ConfigType as AccessLogConfigType, AccessLog,
};
use envoy_types::pb::envoy::config::core::v3::{
    address, socket_address, Address, ApiVersion, ConfigSource, HttpProtocolOptions,
    SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType as FilterConfigType, Filter, FilterChain, Listener,
};
use envoy_types::pb::envoy::extensions::access_loggers::grpc::v3::{
    CommonGrpcAccessLogConfig, HttpGrpcAccessLogConfig,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::google::protobuf::{Any, BoolValue, UInt32Value};
use prost::Message;

use crate::config::{LdsAccessLogConfig, LdsConfig, LdsListenConfig};
use crate::errors::Result;
use crate::VERSION;

use super::naming;
use super::source::{als_grpc_service, duration_proto};

const DEFAULT_STAT_PREFIX: &str = "ingress_http";

const HTTP_CONNECTION_MANAGER_FILTER: &str = "envoy.filters.network.http_connection_manager";
const ROUTER_FILTER: &str = "envoy.filters.http.router";
const HTTP_GRPC_ACCESS_LOG: &str = "envoy.access_loggers.http_grpc";

const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const HTTP_GRPC_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.grpc.v3.HttpGrpcAccessLogConfig";

/// Operator-tunable knobs for listener translation.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub stat_prefix: String,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self { stat_prefix: DEFAULT_STAT_PREFIX.to_string() }
    }
}

/// Translates the LDS document; carries the class version counter.
#[derive(Debug)]
pub struct ListenerTranslator {
    options: ListenerOptions,
    xds_config: ConfigSource,
    version: AtomicU64,
}

impl ListenerTranslator {
    pub fn new(xds_config: ConfigSource) -> Self {
        Self::with_options(xds_config, ListenerOptions::default())
    }

    pub fn with_options(xds_config: ConfigSource, options: ListenerOptions) -> Self {
        Self { options, xds_config, version: AtomicU64::new(0) }
    }

    /// Translate the listener document, assigning the next class version.
    pub fn create(&self, config: &LdsConfig) -> Result<(String, Listener)> {
        let als_config = self.access_log_config(&config.access_log);
        let als_any = Any {
            type_url: HTTP_GRPC_ACCESS_LOG_TYPE_URL.to_string(),
            value: als_config.encode_to_vec(),
        };

        let mut manager = self.http_connection_manager(config);
        manager.access_log = vec![AccessLog {
            name: HTTP_GRPC_ACCESS_LOG.to_string(),
            config_type: Some(AccessLogConfigType::TypedConfig(als_any)),
            ..Default::default()
        }];

        let manager_any = Any {
            type_url: HTTP_CONNECTION_MANAGER_TYPE_URL.to_string(),
            value: manager.encode_to_vec(),
        };

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((version.to_string(), self.listener(manager_any, &config.listen)))
    }

    fn http_connection_manager(&self, config: &LdsConfig) -> HttpConnectionManager {
        HttpConnectionManager {
            codec_type: CodecType::Auto as i32,
            stat_prefix: self.options.stat_prefix.clone(),
            common_http_protocol_options: Some(HttpProtocolOptions {
                idle_timeout: Some(duration_proto(config.timeout.idle_timeout())),
                max_connection_duration: Some(duration_proto(config.timeout.max_duration())),
                ..Default::default()
            }),
            use_remote_address: Some(BoolValue { value: config.server.use_remote_addr }),
            skip_xff_append: config.server.skip_xff_append,
            xff_num_trusted_hops: config.server.xff_trusted_hops,
            server_name: format!("{}/{}", config.server.name, VERSION),
            request_timeout: Some(duration_proto(config.timeout.request_timeout())),
            drain_timeout: Some(duration_proto(config.timeout.drain_timeout())),
            route_specifier: Some(self.route_specifier()),
            http_filters: vec![HttpFilter {
                name: ROUTER_FILTER.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn route_specifier(&self) -> RouteSpecifier {
        // ref: route.rs route_configuration
        RouteSpecifier::Rds(Rds {
            route_config_name: naming::route_config_name(),
            config_source: Some(self.xds_config.clone()),
        })
    }

    fn access_log_config(&self, config: &LdsAccessLogConfig) -> HttpGrpcAccessLogConfig {
        HttpGrpcAccessLogConfig {
            common_config: Some(CommonGrpcAccessLogConfig {
                log_name: config.log_id.clone(),
                transport_api_version: ApiVersion::V3 as i32,
                buffer_flush_interval: Some(duration_proto(config.flush_interval())),
                buffer_size_bytes: Some(UInt32Value { value: config.buffer_size }),
                grpc_service: Some(als_grpc_service()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn listener(&self, manager_any: Any, config: &LdsListenConfig) -> Listener {
        Listener {
            name: naming::listener_name(),
            address: Some(listen_address(config)),
            filter_chains: vec![FilterChain {
                filters: vec![Filter {
                    name: HTTP_CONNECTION_MANAGER_FILTER.to_string(),
                    config_type: Some(FilterConfigType::TypedConfig(manager_any)),
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

fn listen_address(config: &LdsListenConfig) -> Address {
    let protocol = match config.protocol.as_str() {
        "udp" => socket_address::Protocol::Udp,
        _ => socket_address::Protocol::Tcp,
    };
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            protocol: protocol as i32,
            address: config.ip.clone(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(config.port)),
            ..Default::default()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LdsServerConfig, LdsTimeoutConfig};
    use crate::xds::source::xds_config_source;

    fn lds_config() -> LdsConfig {
        LdsConfig {
            listen: LdsListenConfig {
                protocol: "tcp".to_string(),
                ip: "0.0.0.0".to_string(),
                port: 8080,
            },
            server: LdsServerConfig {
                name: "front".to_string(),
                use_remote_addr: true,
                skip_xff_append: false,
                xff_trusted_hops: 1,
            },
            timeout: LdsTimeoutConfig {
                request_timeout: 30,
                drain_timeout: 30,
                idle_timeout: 60,
                max_duration: 300,
            },
            access_log: LdsAccessLogConfig {
                log_id: "front-http".to_string(),
                flush_interval: 1,
                buffer_size: 16384,
            },
        }
    }

    fn translator() -> ListenerTranslator {
        ListenerTranslator::new(xds_config_source())
    }

    fn decode_manager(listener: &Listener) -> HttpConnectionManager {
        let filter = &listener.filter_chains[0].filters[0];
        assert_eq!(filter.name, HTTP_CONNECTION_MANAGER_FILTER);
        let Some(FilterConfigType::TypedConfig(any)) = &filter.config_type else {
            panic!("expected typed config");
        };
        assert_eq!(any.type_url, HTTP_CONNECTION_MANAGER_TYPE_URL);
        HttpConnectionManager::decode(any.value.as_slice()).unwrap()
    }

    #[test]
    fn test_versions_strictly_increase() {
        let translator = translator();
        let config = lds_config();
        let (v1, _) = translator.create(&config).unwrap();
        let (v2, _) = translator.create(&config).unwrap();
        assert_eq!(v1, "1");
        assert_eq!(v2, "2");
    }

    #[test]
    fn test_listener_address() {
        let translator = translator();
        let (_, listener) = translator.create(&lds_config()).unwrap();
        assert_eq!(listener.name, "seiryu_listener");

        let Some(address::Address::SocketAddress(socket)) =
            &listener.address.as_ref().unwrap().address
        else {
            panic!("expected socket address");
        };
        assert_eq!(socket.address, "0.0.0.0");
        assert_eq!(
            socket.port_specifier,
            Some(socket_address::PortSpecifier::PortValue(8080))
        );
    }

    #[test]
    fn test_manager_shape() {
        let translator = translator();
        let (_, listener) = translator.create(&lds_config()).unwrap();
        let manager = decode_manager(&listener);

        assert_eq!(manager.codec_type, CodecType::Auto as i32);
        assert_eq!(manager.stat_prefix, "ingress_http");
        assert_eq!(manager.server_name, format!("front/{}", VERSION));
        assert_eq!(manager.use_remote_address, Some(BoolValue { value: true }));
        assert!(!manager.skip_xff_append);
        assert_eq!(manager.xff_num_trusted_hops, 1);
        assert_eq!(manager.request_timeout.as_ref().unwrap().seconds, 30);
        assert_eq!(manager.drain_timeout.as_ref().unwrap().seconds, 30);

        let options = manager.common_http_protocol_options.as_ref().unwrap();
        assert_eq!(options.idle_timeout.as_ref().unwrap().seconds, 60);
        assert_eq!(options.max_connection_duration.as_ref().unwrap().seconds, 300);

        assert_eq!(manager.http_filters.len(), 1);
        assert_eq!(manager.http_filters[0].name, ROUTER_FILTER);

        let Some(RouteSpecifier::Rds(rds)) = &manager.route_specifier else {
            panic!("expected RDS route specifier");
        };
        assert_eq!(rds.route_config_name, "seiryu_route_config");
        assert!(rds.config_source.is_some());
    }

    #[test]
    fn test_access_log_sink() {
        let translator = translator();
        let (_, listener) = translator.create(&lds_config()).unwrap();
        let manager = decode_manager(&listener);

        assert_eq!(manager.access_log.len(), 1);
        let sink = &manager.access_log[0];
        assert_eq!(sink.name, HTTP_GRPC_ACCESS_LOG);

        let Some(AccessLogConfigType::TypedConfig(any)) = &sink.config_type else {
            panic!("expected typed config");
        };
        assert_eq!(any.type_url, HTTP_GRPC_ACCESS_LOG_TYPE_URL);

        let decoded = HttpGrpcAccessLogConfig::decode(any.value.as_slice()).unwrap();
        let common = decoded.common_config.unwrap();
        assert_eq!(common.log_name, "front-http");
        assert_eq!(common.buffer_flush_interval.as_ref().unwrap().seconds, 1);
        assert_eq!(common.buffer_size_bytes.as_ref().unwrap().value, 16384);
        assert!(common.grpc_service.is_some());
    }

    #[test]
    fn test_custom_stat_prefix() {
        let options = ListenerOptions { stat_prefix: "edge_http".to_string() };
        let translator = ListenerTranslator::with_options(xds_config_source(), options);
        let (_, listener) = translator.create(&lds_config()).unwrap();
        assert_eq!(decode_manager(&listener).stat_prefix, "edge_http");
    }
}
