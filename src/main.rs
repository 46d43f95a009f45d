//! Stubsmith - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stubsmith::{Dispatcher, MockServerConfig, TableFileLoader};
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "stubsmith",
    about = "Configurable HTTP mock server - stub responses, templates and latency simulation",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stubsmith.yaml")]
    config: PathBuf,

    /// Listen address, overrides `settings.listen` (e.g., "127.0.0.1:8080")
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no routes)");
        MockServerConfig::default()
    };

    if let Some(listen) = args.listen {
        config.settings.listen = listen;
    }
    config.validate()?;

    if args.validate {
        match &config.dynamic {
            Some(dynamic) => println!("Configuration is valid (routes loaded from {:?})", dynamic.table),
            None => println!("Configuration is valid ({} routes defined)", config.routes.len()),
        }
        return Ok(());
    }

    let addr = config.settings.listen_addr()?;

    let dispatcher = match config.dynamic {
        Some(dynamic) => {
            // Relative table paths are resolved against the config file.
            let table = match args.config.parent() {
                Some(dir) if dynamic.table.is_relative() => dir.join(&dynamic.table),
                _ => dynamic.table,
            };
            info!(table = %table.display(), "Loading routes per request");
            Dispatcher::with_loader(Arc::new(TableFileLoader::new(table)), config.settings)
        }
        None => Dispatcher::with_routes(config.routes, config.settings)?,
    };

    let listener = TcpListener::bind(addr).await?;
    dispatcher.serve(listener).await?;

    Ok(())
}
