//! rapidfire - serve the components declared in a configuration file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rapidfire_core::{ConfigSource, CoreConfig};
use rapidfire_server::{init_tracing, RapidFire};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rapidfire")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (JSON or YAML). Built-in defaults when omitted.
    #[arg(short, long, env = "RAPIDFIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `host` from the configuration.
    #[arg(long)]
    host: Option<String>,

    /// Overrides `port` from the configuration.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let source = cli
        .config
        .map_or(ConfigSource::Inline(Value::Null), ConfigSource::Path);
    let mut config = CoreConfig::resolve(source).context("failed to load configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    init_tracing(config.is_dev)?;

    let core = RapidFire::new(config)?;
    let handle = core.ignition().await.context("ignition failed")?;
    if let Some(address) = handle.local_addr() {
        info!("rapidfire ready on http://{address}");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    let report = core.extinguish().await;
    for failure in &report.failures {
        warn!(store = %failure.store, "store did not close cleanly: {}", failure.error);
    }
    Ok(())
}
