//! # TaskRelay: operational cadence runner
//!
//! Runs one maintenance tier and exits. Meant for cron/systemd timers.
//!
//! Usage:
//!   taskrelay-cadence daily
//!   taskrelay-cadence weekly --config relay.toml
//!   taskrelay-cadence monthly --json

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use taskrelay_cadence::{
    AlertSink, ArtifactStore, CadenceDb, CadenceScheduler, CadenceTier, FanoutAlertSink, ReportStore,
    ThresholdPolicy, UnitCatalog, WebhookAlertSink,
};
use taskrelay_core::RelayConfig;
use taskrelay_core::config::expand_path;

#[derive(Parser)]
#[command(name = "taskrelay-cadence", version, about = "🗓️ TaskRelay: operational cadence runner")]
struct Cli {
    /// Which batch to run
    #[arg(value_enum)]
    tier: CadenceTier,

    /// Config file (default: $TASKRELAY_CONFIG, then ~/.taskrelay/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the full report as JSON instead of the text summary
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

/// Everything that can fail before the first unit runs.
fn build_scheduler(config: &RelayConfig) -> Result<(CadenceScheduler, Arc<CadenceDb>)> {
    let cadence = &config.cadence;

    let artifacts_dir = expand_path(&cadence.artifacts_dir);
    std::fs::create_dir_all(&artifacts_dir)
        .with_context(|| format!("creating artifacts dir {}", artifacts_dir.display()))?;

    let db_path = expand_path(&cadence.db_path);
    let db = Arc::new(
        CadenceDb::open(&db_path).with_context(|| format!("opening cadence database {}", db_path.display()))?,
    );

    let stores: Vec<Arc<dyn ReportStore>> = vec![
        Arc::clone(&db) as Arc<dyn ReportStore>,
        Arc::new(ArtifactStore::new(artifacts_dir)) as Arc<dyn ReportStore>,
    ];

    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::clone(&db) as Arc<dyn AlertSink>];
    if let Some(url) = &config.alerts.webhook_url {
        sinks.push(Arc::new(WebhookAlertSink::new(url, config.alerts.webhook_headers.clone())));
    }

    let scheduler = CadenceScheduler::new(
        UnitCatalog::from_config(cadence),
        ThresholdPolicy::from_config(cadence),
        stores,
        Arc::new(FanoutAlertSink::new(sinks)),
    )
    .with_unit_timeout(cadence.unit_timeout());
    Ok((scheduler, db))
}

#[tokio::main]
async fn main() -> ExitCode {
    // clap exits with status 2 on usage errors, including an unknown tier
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    let (scheduler, db) = match RelayConfig::resolve(cli.config.as_deref())
        .map_err(anyhow::Error::from)
        .and_then(|config| build_scheduler(&config))
    {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("❌ Cadence setup failed: {:#}", e);
            eprintln!("taskrelay-cadence: {e:#}");
            return ExitCode::from(1);
        }
    };

    let outcome = scheduler.run(cli.tier).await;

    if cli.json {
        match serde_json::to_string_pretty(&outcome.report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("taskrelay-cadence: failed to render report: {e}");
                return ExitCode::from(1);
            }
        }
    } else {
        print!("{}", outcome.report.render_summary());
        if !outcome.alerts.is_empty() {
            println!("Alerts raised: {}", outcome.alerts.len());
            for alert in &outcome.alerts {
                println!("  [{}] {}: {}", alert.severity.as_str(), alert.kind, alert.message);
            }
        }
        match db.open_alerts() {
            Ok(open) if !open.is_empty() => println!("Unresolved alerts on record: {}", open.len()),
            Ok(_) => {}
            Err(e) => tracing::warn!("⚠️ Could not read open alerts: {}", e),
        }
    }

    ExitCode::SUCCESS
}
