use clap::Parser;
use tracing::{error, info};

use seiryu::cli::{Cli, Commands};
use seiryu::{APP_NAME, VERSION};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(error) = seiryu::observability::init_logging(&cli.logging_options()) {
        eprintln!("failed to initialize logging: {}", error);
        std::process::exit(1);
    }

    info!(app_name = APP_NAME, version = VERSION, "starting");

    let result = match cli.command {
        Commands::Server(args) => seiryu::startup::run_server(args).await,
    };

    if let Err(error) = result {
        error!(%error, "fatal");
        std::process::exit(1);
    }
}
