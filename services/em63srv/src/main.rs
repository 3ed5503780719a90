//! em63srv - EUROMAP63 file-exchange service

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use common::logging::{self, LogConfig};
use common::shutdown::wait_for_shutdown;
use tracing::{info, warn};

use em63srv::{
    Euromap63Adapter, FolderTransport, ServiceConfig, ShutdownOutcome, TracingAlertSink,
    TracingValueSink,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "EUROMAP63 file-exchange adapter")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "config/em63srv.yaml")]
    config: PathBuf,

    /// Console log level, overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Disable colored console output
    #[arg(long)]
    no_color: bool,

    /// Validate the configuration, print the sessions and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServiceConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.validate {
        return validate(&config);
    }

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.service.log_level);
    logging::init_with_config(LogConfig {
        service_name: config.service.name.clone(),
        log_dir: config.service.log_dir.clone(),
        console_level: logging::parse_level(level),
        file_level: tracing::Level::DEBUG,
        enable_json: config.service.json_logs,
        ansi: !args.no_color,
    })
    .map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

    info!(
        "Starting {} v{} (exchange root {})",
        config.service.name,
        env!("CARGO_PKG_VERSION"),
        config.transport.root.display()
    );

    let adapter = Euromap63Adapter::new(
        config.adapter,
        Arc::new(FolderTransport::new(&config.transport.root)),
        Arc::new(TracingValueSink),
        Arc::new(TracingAlertSink::new()),
    );
    adapter.start().await?;

    let signal = wait_for_shutdown().await;
    info!("{} received, aborting sessions", signal);

    match adapter.stop().await? {
        ShutdownOutcome::Drained => info!("All sessions aborted"),
        ShutdownOutcome::TimedOut => warn!("Stopped before every session finished aborting"),
    }
    Ok(())
}

fn validate(config: &ServiceConfig) -> Result<()> {
    let servers = config.adapter.validate()?;
    println!("Configuration OK, {} session(s):", servers.len());
    for server in &servers {
        println!("  {} -> {}", server.folder, server.machine_name);
    }
    println!();
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
