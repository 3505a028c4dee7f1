//! Envoy xDS (eXtended Discovery Service) implementation
//!
//! Provides the gRPC server implementing Envoy's discovery protocols:
//! - ADS (Aggregated Discovery Service)
//! - CDS / EDS / RDS / LDS (per-type discovery)
//! - Runtime and Secret discovery (served empty)
//!
//! Resources originate from four watched YAML documents; the translators in
//! this module map the validated documents onto `envoy-types` messages, the
//! store assembles consistency-checked snapshots and the cache publishes
//! them per node.

pub mod cache;
pub mod cluster;
pub mod endpoint;
pub mod listener;
pub mod naming;
pub mod route;
pub mod server;
pub mod services;
pub mod source;
pub mod store;
pub mod watch;

pub use cache::SnapshotCache;
pub use cluster::{ClusterOptions, ClusterTranslator};
pub use endpoint::{EndpointOptions, EndpointTranslator};
pub use listener::{ListenerOptions, ListenerTranslator};
pub use route::{RouteOptions, RouteTranslator};
pub use server::{GrpcServerOptions, GrpcServers};
pub use store::{ResourceStore, Snapshot};
pub use watch::{FileWatcher, WatchPaths};
