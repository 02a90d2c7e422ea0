//! rebalancer: periodic portfolio rebalancing for a brokerage account.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens a broker session, and runs one scan per interval until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use rebalancer::broker::robinhood::RobinhoodClient;
use rebalancer::config;
use rebalancer::engine::accountant::ScanReport;
use rebalancer::engine::executor::OrderGate;
use rebalancer::engine::scanner::ScanOrchestrator;
use rebalancer::storage::JsonlTradeHistory;
use rebalancer::strategy::NoSignals;

const BANNER: &str = r#"
          _           _
 _ __ ___| |__   __ _| | __ _ _ __   ___ ___ _ __
| '__/ _ \ '_ \ / _` | |/ _` | '_ \ / __/ _ \ '__|
| | |  __/ |_) | (_| | | (_| | | | | (_|  __/ |
|_|  \___|_.__/ \__,_|_|\__,_|_| |_|\___\___|_|

  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        bot_name = %cfg.bot.name,
        dry_run = cfg.bot.dry_run,
        scan_interval_secs = cfg.bot.scan_interval_secs,
        trade_history = %cfg.bot.trade_history_path,
        "rebalancer starting up"
    );
    if cfg.bot.dry_run {
        info!("Dry-run mode: orders are logged, never submitted");
    } else {
        warn!("LIVE mode: orders will be submitted to the broker");
    }

    // -- Broker session ---------------------------------------------------

    let credentials = cfg.credentials()?;
    let client = Arc::new(
        RobinhoodClient::login(&cfg.broker, &credentials)
            .await
            .context("Broker login failed")?,
    );
    info!(account = client.session().account_url(), "Broker session opened");

    // -- Components -------------------------------------------------------

    let gate = OrderGate::new(client.clone(), client.clone(), cfg.bot.dry_run);
    let mut orchestrator = ScanOrchestrator::new(
        client.clone(),
        client.clone(),
        gate,
        Box::new(NoSignals),
        Arc::new(JsonlTradeHistory),
        &cfg.bot.trade_history_path,
    );

    // -- Main loop --------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.bot.scan_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.bot.scan_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match orchestrator.run_scan().await {
                    Ok(report) => log_scan_report(&report),
                    Err(e) => error!(error = format!("{e:#}"), "Scan failed, continuing to next"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let scans = orchestrator.scans_run();
    drop(orchestrator);

    match Arc::try_unwrap(client) {
        Ok(client) => {
            if let Err(e) = client.logout().await {
                warn!(error = %e, "Logout failed");
            }
        }
        Err(_) => warn!("Broker session still shared at shutdown, skipping logout"),
    }

    info!(scans, "rebalancer shut down cleanly.");
    Ok(())
}

/// Log the human-readable action lines of a finished scan.
fn log_scan_report(report: &ScanReport) {
    for line in report.execution.action_lines() {
        info!(scan = report.scan_number, "{line}");
    }
    info!(
        scan = report.scan_number,
        sells = report.sells_executed(),
        buys = report.buys_executed(),
        failures = report.failures(),
        dry_run = report.dry_run,
        "Scan complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rebalancer=info"));

    let json_logging = std::env::var("REBALANCER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
