//! Engine gateway - main entry point

use anyhow::Result;
use clap::{Arg, Command};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engine_gateway::{GatewayConfig, metrics, start_server, supervisor::EngineCommand};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engine_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = Command::new("engine-gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Authenticating, rate-limiting gateway for a supervised query engine")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("gateway.toml"),
        )
        .arg(
            Arg::new("print-engine-command")
                .long("print-engine-command")
                .help("Print the query engine command line and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map_or("gateway.toml", String::as_str);
    let config = match GatewayConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config from {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    if matches.get_flag("print-engine-command") {
        println!("{}", EngineCommand::from_config(&config));
        return Ok(());
    }

    info!("Starting engine gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening address: {}", config.server.listen_addr);
    info!("Query engine: {} (port {})", config.engine.executable_path, config.engine.port);
    info!("Features enabled:");
    info!("  Production: {}", config.server.production);
    info!("  Sleep mode: {}", config.sleep_mode.enabled);
    info!("  Redis bridge: {}", config.redis.enabled);
    info!("  Metrics: {}", config.monitoring.metrics_enabled);

    if config.monitoring.metrics_enabled {
        if let Err(e) = metrics::install_exporter(&config.monitoring.metrics_listen_addr) {
            error!("Failed to install metrics exporter: {}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = start_server(config).await {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
