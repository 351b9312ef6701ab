//! tetherd: WebSocket event router with acknowledgments.
//!
//! Loads layered settings, wires the router, ack manager and batcher, serves
//! `/ws`, `/health` and `/metrics`, and drains connections on ctrl-c.

#![deny(unsafe_code)]

mod builtins;
mod wiring;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tether_core::logging::{self, LogFormat};
use tether_server::TetherServer;
use tether_settings::TetherSettings;
use tracing::info;

use crate::wiring::{Daemon, DaemonHooks};

#[derive(Parser, Debug)]
#[command(name = "tetherd", about = "WebSocket event router with acknowledgments")]
struct Cli {
    /// Address to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default: ~/.tether/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `tether_ack=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut TetherSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .settings
        .clone()
        .unwrap_or_else(tether_settings::settings_path);
    let mut settings = tether_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(settings.logging.level.as_filter_str());
    logging::init(level, LogFormat::from_json_flag(settings.logging.json));

    let metrics = tether_server::metrics::install_recorder()
        .context("failed to install metrics recorder")?;

    let Daemon {
        router,
        acks,
        batcher,
    } = Daemon::build(&settings).context("failed to register built-in events")?;

    let hooks = Arc::new(DaemonHooks::new(router.clone()));
    let server = TetherServer::with_hooks(wiring::server_config(&settings.server), router, hooks)
        .with_metrics(metrics);
    let (addr, serve) = server
        .listen()
        .await
        .with_context(|| format!("failed to bind {}", server.config().bind_addr()))?;
    info!(%addr, settings = %path.display(), "tetherd ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    server
        .shutdown()
        .drain(server.registry(), vec![serve], None)
        .await;
    let abandoned = acks.cancel_all();
    batcher.close();
    info!(abandoned_acks = abandoned, "tetherd stopped");
    Ok(())
}
