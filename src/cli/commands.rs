//! CLI command implementations

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::events::{EventBus, PipelineEvent};
use crate::ledger::{LedgerClient, SolanaLedger};
use crate::provider::ProviderRegistry;
use crate::sniper::{DryRunExecutor, Sniper};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Run the pipeline until Ctrl-C
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    if !dry_run {
        bail!("No live trade executor is configured; run with --dry-run");
    }
    warn!("Running in DRY-RUN mode - no real trades will be executed");

    info!(
        max_position = config.risk.max_position_size,
        max_daily = config.risk.max_daily_exposure,
        min_liquidity_usd = config.liquidity.min_liquidity_usd,
        "Starting token sniper"
    );

    let ledger: Arc<dyn LedgerClient> = Arc::new(SolanaLedger::new(&config.rpc)?);
    let events = EventBus::new(config.events.channel_capacity);
    let mut feed = events.subscribe();

    let sniper = Sniper::from_config(config, ledger, Arc::new(DryRunExecutor), events).await?;
    sniper.start().await?;

    let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
    status_tick.tick().await;

    loop {
        tokio::select! {
            event = feed.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event log lagging"),
                Err(RecvError::Closed) => break,
            },
            _ = status_tick.tick() => {
                let status = sniper.get_system_status().await;
                info!(
                    status = %status.status,
                    processed = status.candidates_processed,
                    entered = status.candidates_entered,
                    errors = status.error_count,
                    avg_latency_ms = status.avg_latency_ms,
                    monitors = status.active_monitors,
                    "Status"
                );
                if status.is_paused {
                    warn!("Intake paused by latency governor, resuming");
                    sniper.resume().await;
                }
                if status.is_circuit_broken {
                    error!(last_error = ?status.last_error, "Circuit breaker open, shutting down");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    sniper.stop().await;
    let metrics = sniper.get_performance_metrics().await;
    info!(
        trades = metrics.total_trades,
        win_rate = metrics.win_rate,
        average_return = metrics.average_return,
        max_drawdown = metrics.max_drawdown,
        "Session summary"
    );
    Ok(())
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Detection(result) => info!(
            mint = %result.candidate.mint,
            creator = %result.candidate.creator,
            confidence = result.confidence,
            "Detection"
        ),
        PipelineEvent::Analysis(analysis) => info!(
            pool = %analysis.pool.pool_address,
            usd = analysis.pool.liquidity.usd_value,
            risk = analysis.risk_score,
            confidence = analysis.confidence,
            "Liquidity analysis"
        ),
        PipelineEvent::Warning { pool, warning } => warn!(
            pool = %pool,
            kind = %warning.kind,
            severity = ?warning.severity,
            "{}",
            warning.detail
        ),
        PipelineEvent::Trade(trade) => info!(
            mint = %trade.mint,
            size = trade.position_size,
            closed = trade.is_closed(),
            "Trade"
        ),
        PipelineEvent::Error(e) => error!(
            component = %e.component,
            subject = ?e.subject,
            "{}",
            e.message
        ),
    }
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check RPC and provider health
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("RPC Endpoint... ");
    match check_rpc(config).await {
        Ok(latency) => println!("OK ({}ms)", latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    let registry = ProviderRegistry::from_config(&config.providers).await?;
    for provider in registry.providers().await {
        println!(
            "Provider {} (priority {})... registered",
            provider.name, provider.priority
        );
    }
    for health in registry.health_check_all().await {
        print!("Provider {} health... ", health.name);
        match health.error {
            None if health.healthy => println!("OK"),
            Some(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
            None => {
                println!("FAILED");
                all_healthy = false;
            }
        }
    }
    if registry.is_empty().await {
        println!("Market data providers... NONE AVAILABLE");
        all_healthy = false;
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

async fn check_rpc(config: &Config) -> Result<u64> {
    let ledger = SolanaLedger::new(&config.rpc)?;
    let start = Instant::now();
    ledger.health_check().await?;
    Ok(start.elapsed().as_millis() as u64)
}
