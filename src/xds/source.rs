//! Shared xDS plumbing: the gRPC config source handed to every translated
//! resource, and proto duration conversion.

use std::time::Duration;

use envoy_types::pb::envoy::config::core::v3::{
    api_config_source::ApiType, config_source::ConfigSourceSpecifier, grpc_service,
    ApiConfigSource, ApiVersion, ConfigSource, GrpcService,
};
use envoy_types::pb::google::protobuf;

use super::naming::{BOOTSTRAP_ALS_CLUSTER, BOOTSTRAP_XDS_CLUSTER};

const REFRESH_DELAY: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const GRPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Convert a std duration into the protobuf well-known type.
pub(crate) fn duration_proto(duration: Duration) -> protobuf::Duration {
    protobuf::Duration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}

/// The ConfigSource every EDS/RDS reference points at: the gRPC channel to
/// this control plane through the bootstrap xDS cluster.
pub fn xds_config_source() -> ConfigSource {
    ConfigSource {
        resource_api_version: ApiVersion::V3 as i32,
        config_source_specifier: Some(ConfigSourceSpecifier::ApiConfigSource(ApiConfigSource {
            transport_api_version: ApiVersion::V3 as i32,
            api_type: ApiType::Grpc as i32,
            set_node_on_first_message_only: true,
            refresh_delay: Some(duration_proto(REFRESH_DELAY)),
            request_timeout: Some(duration_proto(REQUEST_TIMEOUT)),
            grpc_services: vec![grpc_service(BOOTSTRAP_XDS_CLUSTER)],
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// The gRPC service carrying access logs back to this control plane.
pub fn als_grpc_service() -> GrpcService {
    grpc_service(BOOTSTRAP_ALS_CLUSTER)
}

fn grpc_service(cluster_name: &str) -> GrpcService {
    GrpcService {
        timeout: Some(duration_proto(GRPC_TIMEOUT)),
        target_specifier: Some(grpc_service::TargetSpecifier::EnvoyGrpc(
            grpc_service::EnvoyGrpc {
                cluster_name: cluster_name.to_string(),
                ..Default::default()
            },
        )),
        ..Default::default()
    }
}
