//! gRPC server assembly.
//!
//! Two independent tonic servers: every discovery service registers on the
//! xDS endpoint, the access-log service on the ALS endpoint. Both serve
//! concurrently; the first error from either surfaces through a shared
//! channel and shutdown drains both.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tonic::transport::Server;
use tracing::{error, info};

use envoy_types::pb::envoy::service::accesslog::v3::access_log_service_server::AccessLogServiceServer;
use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryServiceServer;
use envoy_types::pb::envoy::service::runtime::v3::runtime_discovery_service_server::RuntimeDiscoveryServiceServer;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryServiceServer;

use crate::accesslog::AccessLogStreamService;
use crate::errors::{Error, Result};

use super::cache::SnapshotCache;
use super::services::DiscoveryService;

pub const DEFAULT_XDS_LISTEN_ADDR: &str = "[0.0.0.0]:8000";
pub const DEFAULT_ALS_LISTEN_ADDR: &str = "[0.0.0.0]:8001";
const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 1_000_000;

/// Listen addresses and stream limits for both endpoints.
#[derive(Debug, Clone)]
pub struct GrpcServerOptions {
    pub xds_listen_addr: String,
    pub als_listen_addr: String,
    pub max_concurrent_streams: u32,
}

impl Default for GrpcServerOptions {
    fn default() -> Self {
        Self {
            xds_listen_addr: DEFAULT_XDS_LISTEN_ADDR.to_string(),
            als_listen_addr: DEFAULT_ALS_LISTEN_ADDR.to_string(),
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
        }
    }
}

/// Accepts both plain `ip:port` and the bracketed form (`[0.0.0.0]:8000`)
/// operators carry over from other control planes.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr> {
    if let Ok(parsed) = addr.parse::<SocketAddr>() {
        return Ok(parsed);
    }

    if let (Some(start), Some(end)) = (addr.find('['), addr.rfind(']')) {
        if start == 0 && end > start {
            let host = &addr[1..end];
            let rest = &addr[end + 1..];
            if let Some(port) = rest.strip_prefix(':') {
                let unbracketed = format!("{}:{}", host, port);
                if let Ok(parsed) = unbracketed.parse::<SocketAddr>() {
                    return Ok(parsed);
                }
            }
        }
    }

    Err(Error::config(format!("invalid listen address: {}", addr)))
}

/// The two gRPC endpoints plus everything registered on them.
pub struct GrpcServers {
    options: GrpcServerOptions,
    discovery: DiscoveryService,
    accesslog: AccessLogStreamService,
}

impl GrpcServers {
    pub fn new(
        cache: Arc<SnapshotCache>,
        accesslog: AccessLogStreamService,
        options: GrpcServerOptions,
    ) -> Self {
        Self { options, discovery: DiscoveryService::new(cache), accesslog }
    }

    /// Serve both endpoints until shutdown. Returns the first serve error,
    /// or Ok after a drain.
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let GrpcServers { options, discovery, accesslog } = self;

        let xds_addr = parse_listen_addr(&options.xds_listen_addr)?;
        let als_addr = parse_listen_addr(&options.als_listen_addr)?;
        let max_streams = options.max_concurrent_streams;

        let (error_tx, mut error_rx) = mpsc::channel::<Error>(2);

        info!(address = %xds_addr, "xds server listen");
        let xds_server = xds_server(discovery, max_streams, xds_addr, shutdown.clone());
        let xds_errors = error_tx.clone();
        let xds_task = tokio::spawn(async move {
            if let Err(e) = xds_server.await {
                error!(error = %e, "xds serve error");
                let _ = xds_errors.send(Error::transport(format!("xds server: {}", e))).await;
            }
        });

        info!(address = %als_addr, "als server listen");
        let als_server = als_server(accesslog, max_streams, als_addr, shutdown);
        let als_errors = error_tx;
        let als_task = tokio::spawn(async move {
            if let Err(e) = als_server.await {
                error!(error = %e, "als serve error");
                let _ = als_errors.send(Error::transport(format!("als server: {}", e))).await;
            }
        });

        let xds_abort = xds_task.abort_handle();
        let als_abort = als_task.abort_handle();

        tokio::select! {
            error = error_rx.recv() => {
                // one endpoint failed; take the other one down with it
                xds_abort.abort();
                als_abort.abort();
                match error {
                    Some(error) => Err(error),
                    None => Ok(()),
                }
            }
            _ = async move { let _ = xds_task.await; let _ = als_task.await; } => {
                // both endpoints drained after shutdown
                match error_rx.try_recv() {
                    Ok(error) => Err(error),
                    Err(_) => Ok(()),
                }
            }
        }
    }
}

fn xds_server(
    discovery: DiscoveryService,
    max_concurrent_streams: u32,
    addr: SocketAddr,
    shutdown: watch::Receiver<bool>,
) -> impl std::future::Future<Output = std::result::Result<(), tonic::transport::Error>> {
    Server::builder()
        .max_concurrent_streams(max_concurrent_streams)
        .add_service(AggregatedDiscoveryServiceServer::new(discovery.clone()))
        .add_service(ClusterDiscoveryServiceServer::new(discovery.clone()))
        .add_service(EndpointDiscoveryServiceServer::new(discovery.clone()))
        .add_service(ListenerDiscoveryServiceServer::new(discovery.clone()))
        .add_service(RouteDiscoveryServiceServer::new(discovery.clone()))
        .add_service(RuntimeDiscoveryServiceServer::new(discovery.clone()))
        .add_service(SecretDiscoveryServiceServer::new(discovery))
        .serve_with_shutdown(addr, wait_for_shutdown(shutdown))
}

fn als_server(
    accesslog: AccessLogStreamService,
    max_concurrent_streams: u32,
    addr: SocketAddr,
    shutdown: watch::Receiver<bool>,
) -> impl std::future::Future<Output = std::result::Result<(), tonic::transport::Error>> {
    Server::builder()
        .max_concurrent_streams(max_concurrent_streams)
        .add_service(AccessLogServiceServer::new(accesslog))
        .serve_with_shutdown(addr, wait_for_shutdown(shutdown))
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    // either an explicit signal or a dropped sender stops serving
    let _ = shutdown.changed().await;
}
