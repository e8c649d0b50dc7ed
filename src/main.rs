//! # TaskRelay: dispatch daemon
//!
//! Runs the dispatch, health-check and heartbeat loops against the configured
//! sink, and serves the admission API next to them.
//!
//! Usage:
//!   taskrelay                                  # ~/.taskrelay/config.toml or defaults
//!   taskrelay --config relay.toml              # Explicit config
//!   taskrelay --sink-url http://sink/tasks     # Override the sink
//!   taskrelay --no-gateway                     # Loops only

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use taskrelay_core::RelayConfig;
use taskrelay_dispatch::{CycleScheduler, CycleStats, DeliveryClient, DeliveryPolicy, HttpTransport, TaskGenerator};
use taskrelay_gateway::{AdmissionGateway, AppState};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "taskrelay", version, about = "📮 TaskRelay: task dispatch and admission daemon")]
struct Cli {
    /// Config file (default: $TASKRELAY_CONFIG, then ~/.taskrelay/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override sink.url
    #[arg(long)]
    sink_url: Option<String>,

    /// Override gateway.port
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not start the admission gateway
    #[arg(long)]
    no_gateway: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    let mut config = RelayConfig::resolve(cli.config.as_deref())?;
    if let Some(url) = cli.sink_url {
        config.sink.url = url;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    config.validate()?;

    let registry = Arc::new(config.registry()?);
    let stats = Arc::new(CycleStats::new());
    let transport = Arc::new(HttpTransport::new(&config.sink.url, config.sink.timeout())?);
    let client = Arc::new(DeliveryClient::new(
        transport,
        DeliveryPolicy::from_config(&config.sink),
        Arc::clone(&stats),
    ));
    let scheduler = Arc::new(CycleScheduler::new(
        Arc::clone(&registry),
        TaskGenerator::random(),
        client,
        config.cycle.clone(),
    ));

    tracing::info!("📮 TaskRelay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("   🎯 Sink:    {}", config.sink.url);
    tracing::info!("   👷 Workers: {}", registry.len());
    if config.sink.signing_secret.is_none() {
        tracing::warn!("⚠️ No sink.signing_secret set; deliveries are unsigned");
    }

    let cycles = scheduler.start();
    let (stop_tx, stop_rx) = watch::channel(false);

    let gateway = if cli.no_gateway {
        None
    } else {
        let admission = Arc::new(AdmissionGateway::new(
            Arc::clone(&registry),
            Arc::clone(&stats),
            &config.admission,
        ));
        let state = Arc::new(
            AppState::from_scheduler(&scheduler, admission)
                .with_trusted_proxies(config.gateway.trusted_proxies.clone()),
        );
        let gateway_config = config.gateway.clone();
        let sweep_every = config.admission.window();
        Some(tokio::spawn(async move {
            taskrelay_gateway::start(&gateway_config, state, sweep_every, stop_rx).await
        }))
    };

    let gateway_result = match gateway {
        Some(mut handle) => {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    tracing::info!("🛑 Shutdown signal received");
                    let _ = stop_tx.send(true);
                    Some(handle.await)
                }
                result = &mut handle => {
                    tracing::error!("❌ Gateway exited early");
                    Some(result)
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            tracing::info!("🛑 Shutdown signal received");
            None
        }
    };

    cycles.shutdown();
    cycles.join().await;

    let snapshot = stats.snapshot();
    tracing::info!(
        "👋 Stopped after {} worker cycles: {} delivered, {} failed",
        snapshot.worker_cycle_count,
        snapshot.success_count,
        snapshot.error_count
    );

    match gateway_result {
        Some(joined) => Ok(joined??),
        None => Ok(()),
    }
}
