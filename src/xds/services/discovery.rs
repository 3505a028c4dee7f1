//! Streaming discovery services backed by the snapshot cache.
//!
//! One shared state-of-the-world core answers every protocol variant: the
//! aggregated stream plus the per-type cluster/endpoint/listener/route/
//! runtime/secret services Envoy may dial individually. A stream responds
//! from the current snapshot when a type is first subscribed and again
//! whenever the reconciler publishes a newer snapshot for the stream's
//! node; an ACK carrying the already-sent version is held silently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::AggregatedDiscoveryService, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse, Resource,
};

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService;
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryService;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryService;
use envoy_types::pb::envoy::service::runtime::v3::runtime_discovery_service_server::RuntimeDiscoveryService;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryService;

use crate::xds::cache::SnapshotCache;
use crate::xds::store::{
    Snapshot, CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL,
    RUNTIME_TYPE_URL, SECRET_TYPE_URL,
};

const RESPONSE_CHANNEL_CAPACITY: usize = 16;

type SotwStream = ReceiverStream<Result<DiscoveryResponse, Status>>;
type DeltaStream = ReceiverStream<Result<DeltaDiscoveryResponse, Status>>;

/// Discovery front-end shared by every registered gRPC service.
#[derive(Debug, Clone)]
pub struct DiscoveryService {
    cache: Arc<SnapshotCache>,
}

impl DiscoveryService {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache }
    }

    fn sotw_stream(
        &self,
        requests: Streaming<DiscoveryRequest>,
        fixed_type: Option<&'static str>,
        label: &'static str,
    ) -> SotwStream {
        let cache = Arc::clone(&self.cache);
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);

        info!(service = label, "discovery stream established");

        tokio::spawn(async move {
            let mut requests = requests;
            let mut updates = cache.subscribe();
            let mut node_id: Option<String> = None;
            // type_url → snapshot version last written to this stream
            let mut sent: HashMap<String, String> = HashMap::new();

            loop {
                tokio::select! {
                    request = requests.next() => {
                        match request {
                            Some(Ok(request)) => {
                                let type_url = fixed_type
                                    .map(str::to_string)
                                    .unwrap_or_else(|| request.type_url.clone());
                                if type_url.is_empty() {
                                    warn!(service = label, "discovery request without type_url");
                                    continue;
                                }
                                if node_id.is_none() {
                                    node_id = request
                                        .node
                                        .as_ref()
                                        .filter(|node| !node.id.is_empty())
                                        .map(|node| node.id.clone());
                                }
                                let Some(node) = node_id.clone() else {
                                    warn!(service = label, "discovery request without node id");
                                    continue;
                                };
                                if let Some(error) = &request.error_detail {
                                    warn!(
                                        service = label,
                                        node_id = %node,
                                        type_url = %type_url,
                                        error = %error.message,
                                        "client rejected last response"
                                    );
                                }

                                sent.entry(type_url.clone()).or_default();
                                if let Some(snapshot) = cache.get_snapshot(&node) {
                                    if !respond(&tx, &mut sent, &snapshot, &type_url, label).await {
                                        break;
                                    }
                                }
                            }
                            Some(Err(status)) => {
                                warn!(service = label, error = %status, "discovery stream error");
                                let _ = tx.send(Err(status)).await;
                                break;
                            }
                            None => {
                                debug!(service = label, "discovery stream closed by client");
                                break;
                            }
                        }
                    }
                    update = updates.recv() => {
                        match update {
                            Ok(updated_node) => {
                                if node_id.as_deref() != Some(updated_node.as_str()) {
                                    continue;
                                }
                                let Some(snapshot) = cache.get_snapshot(&updated_node) else {
                                    continue;
                                };
                                if !respond_all(&tx, &mut sent, &snapshot, label).await {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!(service = label, skipped, "catching up after lag");
                                let snapshot = node_id
                                    .as_deref()
                                    .and_then(|node| cache.get_snapshot(node));
                                if let Some(snapshot) = snapshot {
                                    if !respond_all(&tx, &mut sent, &snapshot, label).await {
                                        break;
                                    }
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }

            debug!(service = label, "discovery stream finished");
        });

        ReceiverStream::new(rx)
    }

    fn delta_stream(
        &self,
        requests: Streaming<DeltaDiscoveryRequest>,
        fixed_type: Option<&'static str>,
        label: &'static str,
    ) -> DeltaStream {
        let cache = Arc::clone(&self.cache);
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);

        info!(service = label, "delta discovery stream established");

        tokio::spawn(async move {
            let mut requests = requests;
            let mut updates = cache.subscribe();
            let mut node_id: Option<String> = None;
            let mut sent: HashMap<String, String> = HashMap::new();

            loop {
                tokio::select! {
                    request = requests.next() => {
                        match request {
                            Some(Ok(request)) => {
                                let type_url = fixed_type
                                    .map(str::to_string)
                                    .unwrap_or_else(|| request.type_url.clone());
                                if type_url.is_empty() {
                                    continue;
                                }
                                if node_id.is_none() {
                                    node_id = request
                                        .node
                                        .as_ref()
                                        .filter(|node| !node.id.is_empty())
                                        .map(|node| node.id.clone());
                                }
                                let Some(node) = node_id.clone() else { continue };

                                // A response_nonce marks an ACK/NACK; the
                                // update branch handles pushing new state.
                                if !request.response_nonce.is_empty() {
                                    sent.entry(type_url).or_default();
                                    continue;
                                }

                                sent.insert(type_url.clone(), String::new());
                                if let Some(snapshot) = cache.get_snapshot(&node) {
                                    if !respond_delta(
                                        &tx,
                                        &mut sent,
                                        &snapshot,
                                        &type_url,
                                        &request.resource_names_unsubscribe,
                                    )
                                    .await
                                    {
                                        break;
                                    }
                                }
                            }
                            Some(Err(status)) => {
                                let _ = tx.send(Err(status)).await;
                                break;
                            }
                            None => break,
                        }
                    }
                    update = updates.recv() => {
                        match update {
                            Ok(updated_node) => {
                                if node_id.as_deref() != Some(updated_node.as_str()) {
                                    continue;
                                }
                                let Some(snapshot) = cache.get_snapshot(&updated_node) else {
                                    continue;
                                };
                                let subscribed: Vec<String> = sent.keys().cloned().collect();
                                let mut open = true;
                                for type_url in subscribed {
                                    if sent.get(&type_url).map(String::as_str)
                                        != Some(snapshot.version())
                                        && !respond_delta(&tx, &mut sent, &snapshot, &type_url, &[])
                                            .await
                                    {
                                        open = false;
                                        break;
                                    }
                                }
                                if !open {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }

            debug!(service = label, "delta discovery stream finished");
        });

        ReceiverStream::new(rx)
    }

    fn fetch(
        &self,
        request: &DiscoveryRequest,
        fixed_type: Option<&'static str>,
    ) -> Result<DiscoveryResponse, Status> {
        let type_url = fixed_type.unwrap_or(request.type_url.as_str());
        let node = request
            .node
            .as_ref()
            .filter(|node| !node.id.is_empty())
            .ok_or_else(|| Status::invalid_argument("node is required"))?;

        let snapshot = self
            .cache
            .get_snapshot(&node.id)
            .ok_or_else(|| Status::not_found("no snapshot for node"))?;

        Ok(discovery_response(&snapshot, type_url))
    }
}

async fn respond(
    tx: &mpsc::Sender<Result<DiscoveryResponse, Status>>,
    sent: &mut HashMap<String, String>,
    snapshot: &Snapshot,
    type_url: &str,
    label: &'static str,
) -> bool {
    if sent.get(type_url).map(String::as_str) == Some(snapshot.version()) {
        return true;
    }

    let response = discovery_response(snapshot, type_url);
    debug!(
        service = label,
        type_url,
        version = %response.version_info,
        resources = response.resources.len(),
        "sending discovery response"
    );

    if tx.send(Ok(response)).await.is_err() {
        return false;
    }
    sent.insert(type_url.to_string(), snapshot.version().to_string());
    true
}

async fn respond_all(
    tx: &mpsc::Sender<Result<DiscoveryResponse, Status>>,
    sent: &mut HashMap<String, String>,
    snapshot: &Snapshot,
    label: &'static str,
) -> bool {
    let subscribed: Vec<String> = sent.keys().cloned().collect();
    for type_url in subscribed {
        if !respond(tx, sent, snapshot, &type_url, label).await {
            return false;
        }
    }
    true
}

async fn respond_delta(
    tx: &mpsc::Sender<Result<DeltaDiscoveryResponse, Status>>,
    sent: &mut HashMap<String, String>,
    snapshot: &Snapshot,
    type_url: &str,
    unsubscribe: &[String],
) -> bool {
    let resources: Vec<Resource> = snapshot
        .resources(type_url)
        .iter()
        .map(|built| Resource {
            name: built.name.clone(),
            version: snapshot.version().to_string(),
            resource: Some(built.resource.clone()),
            ..Default::default()
        })
        .collect();

    let response = DeltaDiscoveryResponse {
        system_version_info: snapshot.version().to_string(),
        type_url: type_url.to_string(),
        nonce: uuid::Uuid::new_v4().to_string(),
        resources,
        removed_resources: unsubscribe.to_vec(),
        ..Default::default()
    };

    if tx.send(Ok(response)).await.is_err() {
        return false;
    }
    sent.insert(type_url.to_string(), snapshot.version().to_string());
    true
}

fn discovery_response(snapshot: &Snapshot, type_url: &str) -> DiscoveryResponse {
    DiscoveryResponse {
        version_info: snapshot.version().to_string(),
        resources: snapshot
            .resources(type_url)
            .iter()
            .map(|built| built.resource.clone())
            .collect(),
        type_url: type_url.to_string(),
        nonce: uuid::Uuid::new_v4().to_string(),
        ..Default::default()
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for DiscoveryService {
    type StreamAggregatedResourcesStream = SotwStream;
    type DeltaAggregatedResourcesStream = DeltaStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        Ok(Response::new(self.sotw_stream(request.into_inner(), None, "ads")))
    }

    async fn delta_aggregated_resources(
        &self,
        request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Ok(Response::new(self.delta_stream(request.into_inner(), None, "ads")))
    }
}

#[tonic::async_trait]
impl ClusterDiscoveryService for DiscoveryService {
    type StreamClustersStream = SotwStream;
    type DeltaClustersStream = DeltaStream;

    async fn stream_clusters(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamClustersStream>, Status> {
        Ok(Response::new(self.sotw_stream(request.into_inner(), Some(CLUSTER_TYPE_URL), "cds")))
    }

    async fn delta_clusters(
        &self,
        request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaClustersStream>, Status> {
        Ok(Response::new(self.delta_stream(request.into_inner(), Some(CLUSTER_TYPE_URL), "cds")))
    }

    async fn fetch_clusters(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch(request.get_ref(), Some(CLUSTER_TYPE_URL))?))
    }
}

#[tonic::async_trait]
impl EndpointDiscoveryService for DiscoveryService {
    type StreamEndpointsStream = SotwStream;
    type DeltaEndpointsStream = DeltaStream;

    async fn stream_endpoints(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamEndpointsStream>, Status> {
        Ok(Response::new(self.sotw_stream(request.into_inner(), Some(ENDPOINT_TYPE_URL), "eds")))
    }

    async fn delta_endpoints(
        &self,
        request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaEndpointsStream>, Status> {
        Ok(Response::new(self.delta_stream(request.into_inner(), Some(ENDPOINT_TYPE_URL), "eds")))
    }

    async fn fetch_endpoints(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch(request.get_ref(), Some(ENDPOINT_TYPE_URL))?))
    }
}

#[tonic::async_trait]
impl ListenerDiscoveryService for DiscoveryService {
    type StreamListenersStream = SotwStream;
    type DeltaListenersStream = DeltaStream;

    async fn stream_listeners(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamListenersStream>, Status> {
        Ok(Response::new(self.sotw_stream(request.into_inner(), Some(LISTENER_TYPE_URL), "lds")))
    }

    async fn delta_listeners(
        &self,
        request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaListenersStream>, Status> {
        Ok(Response::new(self.delta_stream(request.into_inner(), Some(LISTENER_TYPE_URL), "lds")))
    }

    async fn fetch_listeners(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch(request.get_ref(), Some(LISTENER_TYPE_URL))?))
    }
}

#[tonic::async_trait]
impl RouteDiscoveryService for DiscoveryService {
    type StreamRoutesStream = SotwStream;
    type DeltaRoutesStream = DeltaStream;

    async fn stream_routes(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamRoutesStream>, Status> {
        Ok(Response::new(self.sotw_stream(request.into_inner(), Some(ROUTE_TYPE_URL), "rds")))
    }

    async fn delta_routes(
        &self,
        request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaRoutesStream>, Status> {
        Ok(Response::new(self.delta_stream(request.into_inner(), Some(ROUTE_TYPE_URL), "rds")))
    }

    async fn fetch_routes(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch(request.get_ref(), Some(ROUTE_TYPE_URL))?))
    }
}

#[tonic::async_trait]
impl RuntimeDiscoveryService for DiscoveryService {
    type StreamRuntimeStream = SotwStream;
    type DeltaRuntimeStream = DeltaStream;

    async fn stream_runtime(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamRuntimeStream>, Status> {
        Ok(Response::new(self.sotw_stream(request.into_inner(), Some(RUNTIME_TYPE_URL), "rtds")))
    }

    async fn delta_runtime(
        &self,
        request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaRuntimeStream>, Status> {
        Ok(Response::new(self.delta_stream(request.into_inner(), Some(RUNTIME_TYPE_URL), "rtds")))
    }

    async fn fetch_runtime(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch(request.get_ref(), Some(RUNTIME_TYPE_URL))?))
    }
}

#[tonic::async_trait]
impl SecretDiscoveryService for DiscoveryService {
    type StreamSecretsStream = SotwStream;
    type DeltaSecretsStream = DeltaStream;

    async fn stream_secrets(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamSecretsStream>, Status> {
        Ok(Response::new(self.sotw_stream(request.into_inner(), Some(SECRET_TYPE_URL), "sds")))
    }

    async fn delta_secrets(
        &self,
        request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaSecretsStream>, Status> {
        Ok(Response::new(self.delta_stream(request.into_inner(), Some(SECRET_TYPE_URL), "sds")))
    }

    async fn fetch_secrets(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Ok(Response::new(self.fetch(request.get_ref(), Some(SECRET_TYPE_URL))?))
    }
}
