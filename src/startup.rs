//! Startup sequence and process supervision.
//!
//! Wires the reconciler, cache and both gRPC endpoints together, then
//! supervises them: SIGHUP reloads the whole config tree in place,
//! SIGINT/SIGTERM/SIGQUIT drain and stop. Startup failures (unreadable
//! config, bind errors) are fatal and surface as a non-zero exit.

use std::fmt;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::accesslog::AccessLogStreamService;
use crate::cli::ServerArgs;
use crate::errors::Result;
use crate::xds::{
    FileWatcher, GrpcServerOptions, GrpcServers, SnapshotCache, WatchPaths,
};

/// Supervisor lifecycle. SIGHUP reloads without leaving `Serving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Init,
    Starting,
    Serving,
    Draining,
    Failed,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Init => "init",
            ServerState::Starting => "starting",
            ServerState::Serving => "serving",
            ServerState::Draining => "draining",
            ServerState::Failed => "failed",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

fn transition(state: &mut ServerState, next: ServerState) {
    info!(from = %state, to = %next, "server state");
    *state = next;
}

/// Resolve the cache key proxies must advertise as node.id.
fn resolve_node_id(configured: &str) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Run the control plane until shutdown.
pub async fn run_server(args: ServerArgs) -> Result<()> {
    let mut state = ServerState::Init;

    let node_id = resolve_node_id(&args.node_id);
    let cache = Arc::new(SnapshotCache::new());
    let paths = WatchPaths {
        cds: args.cds_yaml.clone().into(),
        eds: args.eds_yaml.clone().into(),
        rds: args.rds_yaml.clone().into(),
        lds: args.lds_yaml.clone().into(),
    };
    let watcher = Arc::new(FileWatcher::new(node_id.clone(), paths, Arc::clone(&cache)));

    info!(node_id = %node_id, "server starting");

    // initial all-or-nothing load; failure here is fatal
    watcher.reload_all()?;
    transition(&mut state, ServerState::Starting);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watch_task = tokio::spawn(Arc::clone(&watcher).watch(shutdown_rx.clone()));
    spawn_signal_handler(Arc::clone(&watcher), shutdown_tx.clone());

    let servers = GrpcServers::new(
        Arc::clone(&cache),
        AccessLogStreamService::stdout(),
        GrpcServerOptions {
            xds_listen_addr: args.xds_listen_addr.clone(),
            als_listen_addr: args.als_listen_addr.clone(),
            ..Default::default()
        },
    );

    transition(&mut state, ServerState::Serving);
    let served = servers.serve(shutdown_rx).await;

    match served {
        Ok(()) => transition(&mut state, ServerState::Draining),
        Err(_) => transition(&mut state, ServerState::Failed),
    }

    // stop the watch loop as well, then wait for it to wind down
    let _ = shutdown_tx.send(true);
    let _ = watch_task.await;

    transition(&mut state, ServerState::Stopped);
    info!("server stop");

    served
}

fn spawn_signal_handler(watcher: Arc<FileWatcher>, shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut sighup =
            signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigquit =
            signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("signal trap (SIGHUP)");
                    if let Err(error) = watcher.reload_all() {
                        warn!(%error, "reload file(s) error, skip update");
                    }
                }
                _ = sigterm.recv() => {
                    info!("signal trap (SIGTERM)");
                    break;
                }
                _ = sigquit.recv() => {
                    info!("signal trap (SIGQUIT)");
                    break;
                }
                _ = sigint.recv() => {
                    info!("signal trap (SIGINT)");
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(true);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ServerState::Init.to_string(), "init");
        assert_eq!(ServerState::Draining.to_string(), "draining");
        assert_eq!(ServerState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_transition_replaces_state() {
        let mut state = ServerState::Init;
        transition(&mut state, ServerState::Starting);
        transition(&mut state, ServerState::Serving);
        assert_eq!(state, ServerState::Serving);
    }

    #[test]
    fn test_resolve_node_id_prefers_configured() {
        assert_eq!(resolve_node_id("edge-1"), "edge-1");
    }

    #[test]
    fn test_resolve_node_id_falls_back_to_hostname() {
        let resolved = resolve_node_id("");
        assert!(!resolved.is_empty());
    }
}
