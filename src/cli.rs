//! # Command Line Interface
//!
//! Flags for the `server` subcommand. Every flag has a matching environment
//! variable so the binary drops into containers without a wrapper script.

use clap::{Parser, Subcommand};

use crate::observability::LoggingOptions;

#[derive(Debug, Parser)]
#[command(name = "seiryu")]
#[command(about = "File-driven Envoy xDS control plane")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true, env = "XDS_DEBUG")]
    pub debug: bool,

    /// With --debug, enable trace logging
    #[arg(long, global = true, env = "XDS_VERBOSE")]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the xDS and access-log gRPC servers
    Server(ServerArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct ServerArgs {
    /// Envoy node-id (must match node.id in envoy.yaml); defaults to the
    /// host name
    #[arg(long, env = "XDS_NODE_ID", default_value = "")]
    pub node_id: String,

    /// gRPC xDS listen address
    #[arg(long, env = "XDS_LISTEN_ADDR", default_value = "[0.0.0.0]:8000")]
    pub xds_listen_addr: String,

    /// gRPC access-log listen address
    #[arg(long, env = "ALS_LISTEN_ADDR", default_value = "[0.0.0.0]:8001")]
    pub als_listen_addr: String,

    /// Path to the CDS document
    #[arg(long, env = "CDS_YAML", default_value = "./cds.yaml")]
    pub cds_yaml: String,

    /// Path to the EDS document
    #[arg(long, env = "EDS_YAML", default_value = "./eds.yaml")]
    pub eds_yaml: String,

    /// Path to the RDS document
    #[arg(long, env = "RDS_YAML", default_value = "./rds.yaml")]
    pub rds_yaml: String,

    /// Path to the LDS document
    #[arg(long, env = "LDS_YAML", default_value = "./lds.yaml")]
    pub lds_yaml: String,
}

impl Cli {
    pub fn logging_options(&self) -> LoggingOptions {
        LoggingOptions { debug: self.debug, verbose: self.verbose, json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let cli = Cli::try_parse_from(["seiryu", "server"]).unwrap();
        let Commands::Server(args) = cli.command;
        assert_eq!(args.xds_listen_addr, "[0.0.0.0]:8000");
        assert_eq!(args.als_listen_addr, "[0.0.0.0]:8001");
        assert_eq!(args.cds_yaml, "./cds.yaml");
        assert!(args.node_id.is_empty());
        assert!(!cli.debug);
    }

    #[test]
    fn test_server_flags() {
        let cli = Cli::try_parse_from([
            "seiryu",
            "server",
            "--node-id",
            "edge-1",
            "--xds-listen-addr",
            "127.0.0.1:18000",
            "--cds-yaml",
            "/etc/seiryu/cds.yaml",
            "--debug",
        ])
        .unwrap();
        let Commands::Server(args) = cli.command;
        assert_eq!(args.node_id, "edge-1");
        assert_eq!(args.xds_listen_addr, "127.0.0.1:18000");
        assert_eq!(args.cds_yaml, "/etc/seiryu/cds.yaml");
        assert!(cli.debug);
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["seiryu"]).is_err());
    }
}
