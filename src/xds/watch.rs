//! File watcher and reconciler.
//!
//! Observes the four config documents, reloads whichever one changed,
//! re-translates that class and attempts to publish a snapshot for the
//! startup node-id. `reload_all` is the all-or-nothing variant used at
//! startup and on SIGHUP.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{event::ModifyKind, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{load_cds, load_eds, load_lds, load_rds};
use crate::errors::{Error, Result};

use super::cache::SnapshotCache;
use super::cluster::ClusterTranslator;
use super::endpoint::EndpointTranslator;
use super::listener::ListenerTranslator;
use super::route::RouteTranslator;
use super::source::xds_config_source;
use super::store::ResourceStore;

/// Editors that write-then-rename may leave the file momentarily absent.
const RENAME_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// The four watched document paths.
#[derive(Debug, Clone)]
pub struct WatchPaths {
    pub cds: PathBuf,
    pub eds: PathBuf,
    pub rds: PathBuf,
    pub lds: PathBuf,
}

impl WatchPaths {
    fn all(&self) -> [&Path; 4] {
        [&self.cds, &self.eds, &self.rds, &self.lds]
    }
}

/// Reconciler state: translators, the resource store and the publish target.
#[derive(Debug)]
pub struct FileWatcher {
    node_id: String,
    paths: WatchPaths,
    cds: ClusterTranslator,
    eds: EndpointTranslator,
    rds: RouteTranslator,
    lds: ListenerTranslator,
    store: ResourceStore,
    cache: Arc<SnapshotCache>,
}

impl FileWatcher {
    pub fn new(node_id: impl Into<String>, paths: WatchPaths, cache: Arc<SnapshotCache>) -> Self {
        let xds_config = xds_config_source();
        Self {
            node_id: node_id.into(),
            paths,
            cds: ClusterTranslator::new(xds_config.clone()),
            eds: EndpointTranslator::new(),
            rds: RouteTranslator::new(),
            lds: ListenerTranslator::new(xds_config),
            store: ResourceStore::new(),
            cache,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Load, validate and translate all four documents, then publish. If any
    /// step fails no store slot is modified.
    pub fn reload_all(&self) -> Result<()> {
        let cds_configs = load_cds(&self.paths.cds)?;
        let eds_configs = load_eds(&self.paths.eds)?;
        let rds_configs = load_rds(&self.paths.rds)?;
        let lds_config = load_lds(&self.paths.lds)?;

        let (clusters_version, clusters) = self.cds.create(&cds_configs)?;
        let (endpoints_version, endpoints) = self.eds.create(&eds_configs)?;
        let (route_version, route) = self.rds.create(&rds_configs)?;
        let (listener_version, listener) = self.lds.create(&lds_config)?;

        self.store.update_clusters(clusters_version, clusters);
        self.store.update_endpoints(endpoints_version, endpoints);
        self.store.update_route(route_version, route);
        self.store.update_listener(listener_version, listener);

        self.publish_snapshot()
    }

    fn change_cds(&self) -> Result<()> {
        let configs = load_cds(&self.paths.cds)?;
        let (version, clusters) = self.cds.create(&configs)?;
        self.store.update_clusters(version, clusters);
        info!("update CDS succeed");
        self.publish_snapshot()
    }

    fn change_eds(&self) -> Result<()> {
        let configs = load_eds(&self.paths.eds)?;
        let (version, endpoints) = self.eds.create(&configs)?;
        self.store.update_endpoints(version, endpoints);
        info!("update EDS succeed");
        self.publish_snapshot()
    }

    fn change_rds(&self) -> Result<()> {
        let configs = load_rds(&self.paths.rds)?;
        let (version, route) = self.rds.create(&configs)?;
        self.store.update_route(version, route);
        info!("update RDS succeed");
        self.publish_snapshot()
    }

    fn change_lds(&self) -> Result<()> {
        let config = load_lds(&self.paths.lds)?;
        let (version, listener) = self.lds.create(&config)?;
        self.store.update_listener(version, listener);
        info!("update LDS succeed");
        self.publish_snapshot()
    }

    fn publish_snapshot(&self) -> Result<()> {
        let snapshot = self.store.snapshot()?;
        info!(node_id = %self.node_id, version = %snapshot.version(), "snapshot published");
        self.cache.set_snapshot(&self.node_id, snapshot);
        Ok(())
    }

    /// Watch the four paths until shutdown. Per-file failures are logged and
    /// skipped; only a closed event channel ends the loop early.
    pub async fn watch(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |result| {
            let _ = tx.send(result);
        })
        .map_err(|e| Error::watch(e.to_string()))?;

        for path in self.paths.all() {
            watcher
                .watch(path, RecursiveMode::NonRecursive)
                .map_err(|e| Error::watch(format!("{}: {}", path.display(), e)))?;
            info!(path = %path.display(), "watching file");
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("stop file watching");
                    return Ok(());
                }
                event = rx.recv() => {
                    match event {
                        Some(Ok(event)) => self.handle_event(&mut watcher, event).await,
                        Some(Err(error)) => warn!(%error, "file watch error"),
                        None => {
                            info!("watch channel closed, stop file watching");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&self, watcher: &mut RecommendedWatcher, event: Event) {
        if is_metadata_only(&event.kind) {
            return;
        }
        if is_rename(&event.kind) {
            tokio::time::sleep(RENAME_SETTLE_DELAY).await;
        }

        for path in &event.paths {
            debug!(path = %path.display(), kind = ?event.kind, "file changed");

            if same_file(path, &self.paths.cds) {
                if let Err(error) = self.change_cds() {
                    warn!(%error, "CDS change skipped");
                }
            }
            if same_file(path, &self.paths.eds) {
                if let Err(error) = self.change_eds() {
                    warn!(%error, "EDS change skipped");
                }
            }
            if same_file(path, &self.paths.rds) {
                if let Err(error) = self.change_rds() {
                    warn!(%error, "RDS change skipped");
                }
            }
            if same_file(path, &self.paths.lds) {
                if let Err(error) = self.change_lds() {
                    warn!(%error, "LDS change skipped");
                }
            }

            // editors that replace the file drop the original watch
            if let Err(error) = watcher.watch(path, RecursiveMode::NonRecursive) {
                warn!(path = %path.display(), %error, "failed to re-register watch");
            }
        }
    }
}

fn is_metadata_only(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_))
    )
}

fn is_rename(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(ModifyKind::Name(_)))
}

fn same_file(event_path: &Path, config_path: &Path) -> bool {
    match (std::path::absolute(event_path), std::path::absolute(config_path)) {
        (Ok(event_abs), Ok(config_abs)) => event_abs == config_abs,
        _ => event_path == config_path,
    }
}
