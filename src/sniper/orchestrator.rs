//! Sniper orchestrator
//!
//! Consumes detections, runs each candidate through safety, creator and
//! liquidity stages in order, and hands accepted decisions to the executor.
//! Every run is timed and every fault is fed to the [`ResilienceGovernor`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::TradeExecutor;
use super::gate::{EntryDecision, EntryGate, RejectReason, RiskParameters};
use super::metrics::{PerformanceMetrics, TradeHistory, TradeRecord};
use super::resilience::{ResilienceConfig, ResilienceGovernor};
use crate::analysis::{
    CreatorAnalyzer, CreatorRegistry, LiquidityAnalyzer, OnChainPoolSource, PoolTarget,
};
use crate::config::Config;
use crate::detector::{DetectionResult, DetectorStatsSnapshot, ServiceStatus, TokenDetector};
use crate::error::{Error, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::ledger::LedgerClient;
use crate::provider::{ProviderRegistry, WRAPPED_SOL};

const MAX_CONCURRENT_CANDIDATES: usize = 8;
const MAX_TRADE_HISTORY: usize = 10_000;

/// Collaborators the orchestrator drives
pub struct SniperParts {
    pub registry: Arc<ProviderRegistry>,
    pub creators: Arc<CreatorRegistry>,
    pub creator_analyzer: CreatorAnalyzer,
    pub liquidity: Arc<LiquidityAnalyzer>,
    pub executor: Arc<dyn TradeExecutor>,
    pub events: EventBus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub status: ServiceStatus,
    pub is_active: bool,
    pub is_paused: bool,
    pub is_circuit_broken: bool,
    /// Errors in the current window
    pub error_count: u32,
    pub total_errors: u64,
    pub last_error: Option<String>,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub success_rate: f64,
    pub uptime_secs: u64,
    pub candidates_processed: u64,
    pub candidates_entered: u64,
    pub active_monitors: usize,
    pub detector: Option<DetectorStatsSnapshot>,
}

/// Per-candidate pipeline, shared with spawned tasks
struct Pipeline {
    registry: Arc<ProviderRegistry>,
    creators: Arc<CreatorRegistry>,
    creator_analyzer: CreatorAnalyzer,
    liquidity: Arc<LiquidityAnalyzer>,
    executor: Arc<dyn TradeExecutor>,
    events: EventBus,
    gate: EntryGate,
    governor: ResilienceGovernor,
    status: Arc<RwLock<ServiceStatus>>,
    trades: RwLock<TradeHistory>,
    processed: AtomicU64,
    entered: AtomicU64,
}

impl Pipeline {
    /// Timed, fault-counted run
    async fn process(&self, detection: DetectionResult) -> Result<EntryDecision> {
        if self.governor.is_circuit_broken().await {
            return Err(Error::InvalidState("circuit breaker open".into()));
        }
        if self.governor.is_paused().await {
            return Err(Error::InvalidState("intake paused".into()));
        }

        let mint = detection.candidate.mint.clone();
        let started = Instant::now();
        let outcome = self.run(&detection).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.processed.fetch_add(1, Ordering::Relaxed);
        if self.governor.record_latency(elapsed_ms).await {
            self.events.error(
                "sniper",
                format!("pipeline took {:.0}ms, intake paused", elapsed_ms),
                Some(mint.clone()),
            );
        }

        match &outcome {
            Ok(decision) => {
                self.governor.record_success().await;
                debug!(
                    mint = %mint,
                    enterable = decision.is_enterable,
                    elapsed_ms,
                    "Pipeline finished"
                );
            }
            Err(e) => {
                error!(mint = %mint, "Pipeline failed: {}", e);
                self.events.error("sniper", e.to_string(), Some(mint.clone()));
                if self.governor.record_error(e.to_string()).await {
                    *self.status.write().await = ServiceStatus::Error;
                    self.events.error(
                        "sniper",
                        "circuit breaker tripped, restart required",
                        None,
                    );
                }
            }
        }
        outcome
    }

    async fn run(&self, detection: &DetectionResult) -> Result<EntryDecision> {
        let candidate = &detection.candidate;

        if let Some(reason) = self.gate.check_detection(detection) {
            return Ok(EntryDecision::reject(detection, None, None, reason));
        }

        let creator = self
            .creator_analyzer
            .analyze(&candidate.creator, &self.creators)
            .await;
        if let Some(reason) = self.gate.check_creator(&creator) {
            return Ok(EntryDecision::reject(detection, Some(&creator), None, reason));
        }

        let Some(target) = self.locate_pool(detection).await? else {
            return Ok(EntryDecision::reject(
                detection,
                Some(&creator),
                None,
                RejectReason::NoPool,
            ));
        };

        let liquidity = self.liquidity.analyze_once(&target).await?;
        let decision = self.gate.evaluate(detection, &creator, &liquidity).await;
        if !decision.is_enterable {
            return Ok(decision);
        }

        self.enter(decision, target).await
    }

    /// Deepest pool the registry knows for the mint
    async fn locate_pool(&self, detection: &DetectionResult) -> Result<Option<PoolTarget>> {
        let mint = &detection.candidate.mint;
        let tokens = self.registry.search_tokens(mint).await?;

        let best = tokens
            .into_iter()
            .filter(|t| &t.address == mint)
            .filter_map(|t| {
                let pool = t.pair_address?;
                Some((pool, t.base_mint, t.liquidity_usd.unwrap_or(0.0)))
            })
            .max_by(|a, b| a.2.total_cmp(&b.2));

        let Some((pool, base_mint, _)) = best else {
            return Ok(None);
        };
        let target = PoolTarget {
            pool,
            token_mint: mint.clone(),
            base_mint: base_mint.unwrap_or_else(|| WRAPPED_SOL.to_string()),
            lp_mint: None,
            token_vault: None,
            base_vault: None,
            creator: Some(detection.candidate.creator.clone()).filter(|c| !c.is_empty()),
        };
        self.liquidity.resolve_target(target).await.map(Some)
    }

    async fn release(&self, decision: &EntryDecision) {
        if let Some(reservation) = decision.reservation {
            self.gate.exposure().release(reservation).await;
        }
    }

    async fn enter(&self, decision: EntryDecision, target: PoolTarget) -> Result<EntryDecision> {
        let report = match self.executor.execute(&decision).await {
            Ok(report) => report,
            Err(e) => {
                self.release(&decision).await;
                return Err(e);
            }
        };

        if !report.status.is_filled() {
            self.release(&decision).await;
            return Err(Error::Execution(
                report
                    .error
                    .unwrap_or_else(|| "executor reported failure".to_string()),
            ));
        }

        let record = TradeRecord {
            mint: decision.candidate.mint.clone(),
            creator: decision.candidate.creator.clone(),
            pool: decision.pool.clone(),
            position_size: decision.position_size,
            tx_hash: report.tx_hash,
            entered_at: Utc::now(),
            return_pct: None,
            rugged: false,
            closed_at: None,
        };
        info!(
            mint = %record.mint,
            size = record.position_size,
            tx = ?record.tx_hash,
            "Position entered"
        );
        self.trades.write().await.push(record.clone());
        self.entered.fetch_add(1, Ordering::Relaxed);
        self.events.publish(PipelineEvent::Trade(record));

        if self.liquidity.config().monitor_after_entry {
            self.liquidity.start_pool_analysis(target);
        }
        Ok(decision)
    }
}

struct RunningSniper {
    cancel: CancellationToken,
    task: Option<JoinHandle<Option<mpsc::Receiver<DetectionResult>>>>,
}

pub struct Sniper {
    pipeline: Arc<Pipeline>,
    detector: Option<TokenDetector>,
    detections: Mutex<Option<mpsc::Receiver<DetectionResult>>>,
    status: Arc<RwLock<ServiceStatus>>,
    running: Mutex<Option<RunningSniper>>,
    started_at: RwLock<Option<Instant>>,
}

impl Sniper {
    pub fn new(
        parts: SniperParts,
        risk: RiskParameters,
        resilience: ResilienceConfig,
        detections: Option<mpsc::Receiver<DetectionResult>>,
    ) -> Result<Self> {
        let status = Arc::new(RwLock::new(ServiceStatus::Stopped));
        let pipeline = Pipeline {
            registry: parts.registry,
            creators: parts.creators,
            creator_analyzer: parts.creator_analyzer,
            liquidity: parts.liquidity,
            executor: parts.executor,
            events: parts.events,
            gate: EntryGate::new(risk)?,
            governor: ResilienceGovernor::new(resilience)?,
            status: status.clone(),
            trades: RwLock::new(TradeHistory::new(MAX_TRADE_HISTORY)),
            processed: AtomicU64::new(0),
            entered: AtomicU64::new(0),
        };

        Ok(Self {
            pipeline: Arc::new(pipeline),
            detector: None,
            detections: Mutex::new(detections),
            status,
            running: Mutex::new(None),
            started_at: RwLock::new(None),
        })
    }

    /// Drive a detector alongside the pipeline; it starts and stops with us
    pub fn with_detector(mut self, detector: TokenDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Wire the full live pipeline from configuration
    pub async fn from_config(
        config: &Config,
        ledger: Arc<dyn LedgerClient>,
        executor: Arc<dyn TradeExecutor>,
        events: EventBus,
    ) -> Result<Self> {
        let registry = Arc::new(ProviderRegistry::from_config(&config.providers).await?);
        if registry.is_empty().await {
            return Err(Error::Config("no market data provider could be registered".into()));
        }

        let creators = Arc::new(CreatorRegistry::from_config(&config.creator)?);
        let creator_analyzer = CreatorAnalyzer::new(config.creator.clone(), ledger.clone())?;
        let pool_source = Arc::new(OnChainPoolSource::new(
            ledger.clone(),
            registry.clone(),
            &config.liquidity.lock_holders,
            config.liquidity.max_holders,
        ));
        let liquidity = Arc::new(LiquidityAnalyzer::new(
            config.liquidity.clone(),
            pool_source,
            events.clone(),
        )?);

        let (tx, rx) = mpsc::channel(config.detector.output_buffer);
        let detector = TokenDetector::new(
            config.detector.clone(),
            config.validation.clone(),
            ledger,
            events.clone(),
            tx,
        )?;

        let parts = SniperParts {
            registry,
            creators,
            creator_analyzer,
            liquidity,
            executor,
            events,
        };
        Ok(Self::new(parts, config.risk.clone(), config.resilience.clone(), Some(rx))?
            .with_detector(detector))
    }

    pub async fn status(&self) -> ServiceStatus {
        *self.status.read().await
    }

    pub fn events(&self) -> &EventBus {
        &self.pipeline.events
    }

    pub fn creators(&self) -> &Arc<CreatorRegistry> {
        &self.pipeline.creators
    }

    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;

        match self.status().await {
            ServiceStatus::Running | ServiceStatus::Starting => {
                warn!("Sniper already running");
                return Ok(());
            }
            ServiceStatus::Error => {
                return Err(Error::InvalidState(
                    "sniper is in error state, stop it before restarting".into(),
                ));
            }
            ServiceStatus::Stopping => {
                return Err(Error::InvalidState("sniper is stopping".into()));
            }
            ServiceStatus::Stopped => {}
        }

        self.set_status(ServiceStatus::Starting).await;
        info!("Starting sniper");

        if let Some(detector) = &self.detector {
            if let Err(e) = detector.start().await {
                self.set_status(ServiceStatus::Error).await;
                return Err(e);
            }
        }

        let cancel = CancellationToken::new();
        let detector_failed = match &self.detector {
            Some(detector) => detector.failure_signal().await.unwrap_or_else(CancellationToken::new),
            None => CancellationToken::new(),
        };
        let task = self.detections.lock().await.take().map(|rx| {
            tokio::spawn(run_loop(
                rx,
                cancel.clone(),
                detector_failed,
                self.pipeline.clone(),
            ))
        });
        if task.is_none() {
            debug!("No detection feed attached, candidates must be submitted directly");
        }

        *running = Some(RunningSniper { cancel, task });
        *self.started_at.write().await = Some(Instant::now());
        self.set_status(ServiceStatus::Running).await;
        info!("Sniper running");
        Ok(())
    }

    /// Stop intake, monitors and the detector. Clears a tripped breaker.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;

        let status = self.status().await;
        if !matches!(status, ServiceStatus::Running | ServiceStatus::Error) {
            warn!("Sniper not running ({})", status);
            return;
        }

        self.set_status(ServiceStatus::Stopping).await;
        if let Some(detector) = &self.detector {
            detector.stop().await;
        }
        if let Some(active) = running.take() {
            active.cancel.cancel();
            if let Some(task) = active.task {
                match task.await {
                    Ok(Some(rx)) => *self.detections.lock().await = Some(rx),
                    Ok(None) => {}
                    Err(e) => warn!("Sniper loop ended abnormally: {}", e),
                }
            }
        }
        self.pipeline.liquidity.stop_all();
        self.pipeline.governor.reset().await;
        *self.started_at.write().await = None;
        self.set_status(ServiceStatus::Stopped).await;
        info!("Sniper stopped");
    }

    /// Run one candidate through the pipeline
    pub async fn process_candidate(&self, detection: DetectionResult) -> Result<EntryDecision> {
        self.pipeline.process(detection).await
    }

    /// Clear a latency pause
    pub async fn resume(&self) {
        self.pipeline.governor.resume().await;
    }

    /// Close the latest open trade for `mint` and feed the outcome back
    /// into the creator registry.
    pub async fn record_trade_outcome(
        &self,
        mint: &str,
        return_pct: f64,
        rugged: bool,
    ) -> Result<TradeRecord> {
        let closed = {
            let mut trades = self.pipeline.trades.write().await;
            let trade = trades
                .latest_open_mut(mint)
                .ok_or_else(|| Error::InvalidState(format!("no open trade for {}", mint)))?;
            trade.return_pct = Some(return_pct);
            trade.rugged = rugged;
            trade.closed_at = Some(Utc::now());
            trade.clone()
        };

        if !closed.creator.is_empty() {
            if rugged {
                self.pipeline.creators.record_rug(&closed.creator).await;
            } else if return_pct > 0.0 {
                self.pipeline.creators.record_success(&closed.creator).await;
            }
        }
        if let Some(pool) = &closed.pool {
            self.pipeline.liquidity.stop_pool_analysis(pool);
        }

        info!(mint = %mint, return_pct, rugged, "Trade closed");
        self.pipeline
            .events
            .publish(PipelineEvent::Trade(closed.clone()));
        Ok(closed)
    }

    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.pipeline.trades.read().await.to_vec()
    }

    pub async fn get_performance_metrics(&self) -> PerformanceMetrics {
        self.pipeline.trades.read().await.metrics()
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let status = self.status().await;
        let resilience = self.pipeline.governor.snapshot().await;
        let uptime_secs = self
            .started_at
            .read()
            .await
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);

        SystemStatus {
            status,
            is_active: status == ServiceStatus::Running,
            is_paused: resilience.is_paused,
            is_circuit_broken: resilience.is_circuit_broken,
            error_count: resilience.error_count,
            total_errors: resilience.total_errors,
            last_error: resilience.last_error,
            avg_latency_ms: resilience.avg_latency_ms,
            p95_latency_ms: resilience.p95_latency_ms,
            success_rate: resilience.success_rate,
            uptime_secs,
            candidates_processed: self.pipeline.processed.load(Ordering::Relaxed),
            candidates_entered: self.pipeline.entered.load(Ordering::Relaxed),
            active_monitors: self.pipeline.liquidity.active_monitors().len(),
            detector: self.detector.as_ref().map(|d| d.stats()),
        }
    }

    async fn set_status(&self, status: ServiceStatus) {
        *self.status.write().await = status;
    }
}

/// Take the sniper out of service after its intake died
async fn halt(pipeline: &Pipeline, reason: &str) {
    error!("Intake lost: {}", reason);
    pipeline.governor.record_error(reason).await;
    *pipeline.status.write().await = ServiceStatus::Error;
    pipeline
        .events
        .error("sniper", format!("{}, restart required", reason), None);
}

/// Returns the receiver when the loop ends with the feed still open, so a
/// later start can reuse it
async fn run_loop(
    mut receiver: mpsc::Receiver<DetectionResult>,
    cancel: CancellationToken,
    detector_failed: CancellationToken,
    pipeline: Arc<Pipeline>,
) -> Option<mpsc::Receiver<DetectionResult>> {
    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_CANDIDATES));

    loop {
        let detection = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = detector_failed.cancelled() => {
                halt(&pipeline, "detector lost its log subscription").await;
                break;
            }
            detection = receiver.recv() => detection,
        };

        let Some(detection) = detection else {
            halt(&pipeline, "detection feed closed").await;
            return None;
        };

        if !pipeline.governor.accepts_work().await {
            debug!(mint = %detection.candidate.mint, "Intake halted, dropping candidate");
            continue;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            // Faults are already logged and counted inside process
            let _ = pipeline.process(detection).await;
            drop(permit);
        });
    }

    debug!("Sniper loop exited");
    Some(receiver)
}
