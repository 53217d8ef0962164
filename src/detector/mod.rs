//! New-token detector
//!
//! Subscribes to a program's logs, pulls candidate mints out of matching
//! batches, validates them structurally and pushes scored
//! [`DetectionResult`]s to the orchestrator.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!                 \          \
//!                  +----------+--> Error (subscription failure)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::parse_address;
use crate::error::{Error, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::ledger::{LedgerClient, LogBatch, LogSubscription, MintAccount, ParsedAccount, SubscriptionHandle};

pub mod extract;
pub mod validation;

pub use validation::{TokenValidationConfig, TokenValidator, ValidationOutcome};

/// SPL token program
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Program whose logs announce new mints
    #[serde(default = "default_program_id")]
    pub program_id: String,
    /// Substrings marking a token-initialization batch
    #[serde(default = "default_init_markers")]
    pub init_markers: Vec<String>,
    /// Batches inspected concurrently (each costs one account lookup)
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
    /// Detections buffered for the orchestrator
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            program_id: default_program_id(),
            init_markers: default_init_markers(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
            output_buffer: default_output_buffer(),
        }
    }
}

fn default_program_id() -> String {
    TOKEN_PROGRAM_ID.into()
}

fn default_init_markers() -> Vec<String> {
    vec![
        "Instruction: InitializeMint".into(),
        "Instruction: Create".into(),
    ]
}

fn default_max_concurrent_lookups() -> usize {
    32
}

fn default_output_buffer() -> usize {
    256
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        parse_address("detector.program_id", &self.program_id)?;
        if self.init_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(Error::Config("detector.init_markers must not be empty".into()));
        }
        if self.max_concurrent_lookups == 0 || self.output_buffer == 0 {
            return Err(Error::Config(
                "detector.max_concurrent_lookups and detector.output_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a long-running service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Newly created token, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCandidate {
    pub mint: String,
    /// Empty when no signer or authority line was found
    pub creator: String,
    pub discovered_at: DateTime<Utc>,
    pub decimals: u8,
    pub metadata: BTreeMap<String, String>,
}

impl TokenCandidate {
    pub fn from_mint(account: &MintAccount, creator: String, signature: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("supply".to_string(), account.supply.to_string());
        metadata.insert("decimals".to_string(), account.decimals.to_string());
        metadata.insert(
            "isInitialized".to_string(),
            account.is_initialized.to_string(),
        );
        if let Some(authority) = &account.mint_authority {
            metadata.insert("mintAuthority".to_string(), authority.clone());
        }
        if let Some(authority) = &account.freeze_authority {
            metadata.insert("freezeAuthority".to_string(), authority.clone());
        }
        if !signature.is_empty() {
            metadata.insert("signature".to_string(), signature.to_string());
        }

        Self {
            mint: account.address.clone(),
            creator,
            discovered_at: Utc::now(),
            decimals: account.decimals,
            metadata,
        }
    }

    pub fn has_creator(&self) -> bool {
        !self.creator.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub candidate: TokenCandidate,
    /// passed checks / total checks
    pub confidence: f64,
    pub validations: Vec<ValidationOutcome>,
}

impl DetectionResult {
    pub fn new(candidate: TokenCandidate, validations: Vec<ValidationOutcome>) -> Self {
        Self {
            confidence: validation::confidence(&validations),
            candidate,
            validations,
        }
    }

    /// Safety-critical checks that did not pass
    pub fn failed_safety_checks(&self) -> impl Iterator<Item = &ValidationOutcome> {
        self.validations
            .iter()
            .filter(|v| v.safety_critical && !v.passed)
    }
}

#[derive(Debug, Default)]
pub struct DetectorStats {
    pub batches_seen: AtomicU64,
    pub candidates_found: AtomicU64,
    pub detections_emitted: AtomicU64,
    pub extraction_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DetectorStatsSnapshot {
    pub batches_seen: u64,
    pub candidates_found: u64,
    pub detections_emitted: u64,
    pub extraction_errors: u64,
}

/// Shared by the subscription loop and per-batch tasks
struct BatchProcessor {
    ledger: Arc<dyn LedgerClient>,
    validator: TokenValidator,
    markers: Vec<String>,
    events: EventBus,
    output: mpsc::Sender<DetectionResult>,
    stats: Arc<DetectorStats>,
}

impl BatchProcessor {
    async fn process(&self, batch: LogBatch) {
        self.stats.batches_seen.fetch_add(1, Ordering::Relaxed);

        if batch.err.is_some() {
            return;
        }
        if !extract::has_init_marker(&batch.logs, &self.markers) {
            return;
        }

        match self.inspect(&batch).await {
            Ok(Some(result)) => self.emit(result).await,
            Ok(None) => {}
            Err(e) => {
                self.stats.extraction_errors.fetch_add(1, Ordering::Relaxed);
                error!(signature = %batch.signature, "Candidate extraction failed: {}", e);
                self.events
                    .error("detector", e.to_string(), Some(batch.signature.clone()));
            }
        }
    }

    async fn inspect(&self, batch: &LogBatch) -> Result<Option<DetectionResult>> {
        let Some(mint) = extract::extract_mint(&batch.logs) else {
            debug!(signature = %batch.signature, "Init marker without a mint address");
            return Ok(None);
        };

        let account = match self.ledger.get_parsed_account_info(&mint).await? {
            Some(ParsedAccount::Mint(account)) if account.is_initialized => account,
            _ => {
                debug!(mint = %mint, "Not an initialized mint account");
                return Ok(None);
            }
        };

        self.stats.candidates_found.fetch_add(1, Ordering::Relaxed);

        let creator = extract::extract_creator(&batch.logs).unwrap_or_default();
        let candidate = TokenCandidate::from_mint(&account, creator, &batch.signature);
        let validations = self.validator.validate(&candidate);

        Ok(Some(DetectionResult::new(candidate, validations)))
    }

    async fn emit(&self, result: DetectionResult) {
        info!(
            mint = %result.candidate.mint,
            creator = %result.candidate.creator,
            confidence = result.confidence,
            "Token detected"
        );
        self.stats.detections_emitted.fetch_add(1, Ordering::Relaxed);
        self.events.publish(PipelineEvent::Detection(result.clone()));

        if self.output.send(result).await.is_err() {
            debug!("Detection receiver dropped");
        }
    }
}

struct RunningDetector {
    cancel: CancellationToken,
    /// Cancelled by the loop itself when the subscription dies
    failed: CancellationToken,
    task: JoinHandle<()>,
    subscription: SubscriptionHandle,
}

impl RunningDetector {
    async fn shutdown(self) {
        self.cancel.cancel();
        self.subscription.unsubscribe().await;
        if let Err(e) = self.task.await {
            warn!("Detector loop ended abnormally: {}", e);
        }
    }
}

pub struct TokenDetector {
    program_id: String,
    processor: Arc<BatchProcessor>,
    max_concurrent_lookups: usize,
    status: Arc<RwLock<ServiceStatus>>,
    running: Mutex<Option<RunningDetector>>,
}

impl TokenDetector {
    pub fn new(
        config: DetectorConfig,
        validation: TokenValidationConfig,
        ledger: Arc<dyn LedgerClient>,
        events: EventBus,
        output: mpsc::Sender<DetectionResult>,
    ) -> Result<Self> {
        config.validate()?;
        let validator = TokenValidator::new(validation)?;

        Ok(Self {
            program_id: config.program_id,
            processor: Arc::new(BatchProcessor {
                ledger,
                validator,
                markers: config.init_markers,
                events,
                output,
                stats: Arc::new(DetectorStats::default()),
            }),
            max_concurrent_lookups: config.max_concurrent_lookups,
            status: Arc::new(RwLock::new(ServiceStatus::Stopped)),
            running: Mutex::new(None),
        })
    }

    pub async fn status(&self) -> ServiceStatus {
        *self.status.read().await
    }

    pub fn stats(&self) -> DetectorStatsSnapshot {
        let stats = &self.processor.stats;
        DetectorStatsSnapshot {
            batches_seen: stats.batches_seen.load(Ordering::Relaxed),
            candidates_found: stats.candidates_found.load(Ordering::Relaxed),
            detections_emitted: stats.detections_emitted.load(Ordering::Relaxed),
            extraction_errors: stats.extraction_errors.load(Ordering::Relaxed),
        }
    }

    /// Open the log subscription. A no-op when already running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;

        let status = self.status().await;
        if matches!(status, ServiceStatus::Running | ServiceStatus::Starting) {
            warn!("Detector already {}", status);
            return Ok(());
        }

        // Restarting after a subscription failure
        if let Some(stale) = running.take() {
            stale.shutdown().await;
        }

        self.set_status(ServiceStatus::Starting).await;
        info!(program = %self.program_id, "Starting token detector");

        let LogSubscription { receiver, handle } =
            match self.processor.ledger.subscribe_logs(&self.program_id).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(program = %self.program_id, "Log subscription failed: {}", e);
                    self.set_status(ServiceStatus::Error).await;
                    self.processor
                        .events
                        .error("detector", format!("subscription failed: {}", e), None);
                    return Err(e);
                }
            };

        let cancel = CancellationToken::new();
        let failed = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            receiver,
            cancel.clone(),
            failed.clone(),
            self.processor.clone(),
            Arc::new(Semaphore::new(self.max_concurrent_lookups)),
            self.status.clone(),
        ));

        *running = Some(RunningDetector {
            cancel,
            failed,
            task,
            subscription: handle,
        });
        self.set_status(ServiceStatus::Running).await;
        info!(program = %self.program_id, "Token detector running");
        Ok(())
    }

    /// Tear the subscription down. A no-op unless running.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;

        let status = self.status().await;
        if status != ServiceStatus::Running {
            warn!("Detector not running ({})", status);
            return;
        }

        self.set_status(ServiceStatus::Stopping).await;
        if let Some(active) = running.take() {
            active.shutdown().await;
        }
        self.set_status(ServiceStatus::Stopped).await;
        info!("Token detector stopped");
    }

    /// Token cancelled if the current run loses its subscription
    pub async fn failure_signal(&self) -> Option<CancellationToken> {
        self.running.lock().await.as_ref().map(|r| r.failed.clone())
    }

    async fn set_status(&self, status: ServiceStatus) {
        *self.status.write().await = status;
    }
}

async fn run_loop(
    mut receiver: mpsc::Receiver<LogBatch>,
    cancel: CancellationToken,
    failed: CancellationToken,
    processor: Arc<BatchProcessor>,
    permits: Arc<Semaphore>,
    status: Arc<RwLock<ServiceStatus>>,
) {
    loop {
        // Teardown drops the sender right after cancelling, so cancel must win
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = receiver.recv() => batch,
        };

        let Some(batch) = batch else {
            error!("Log subscription closed unexpectedly");
            *status.write().await = ServiceStatus::Error;
            processor
                .events
                .error("detector", "log subscription closed", None);
            failed.cancel();
            break;
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        // In-flight batches finish even if the detector stops meanwhile
        let processor = processor.clone();
        tokio::spawn(async move {
            processor.process(batch).await;
            drop(permit);
        });
    }

    debug!("Detector loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{HolderBalance, SignatureInfo};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    const MINT: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const CREATOR: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    /// Ledger whose log stream is driven by the test
    #[derive(Default)]
    struct ScriptedLedger {
        accounts: HashMap<String, ParsedAccount>,
        senders: StdMutex<Vec<mpsc::Sender<LogBatch>>>,
        fail_subscribe: bool,
        fail_lookup: bool,
    }

    impl ScriptedLedger {
        fn with_mint(decimals: u8) -> Self {
            let mut accounts = HashMap::new();
            accounts.insert(
                MINT.to_string(),
                ParsedAccount::Mint(MintAccount {
                    address: MINT.into(),
                    decimals,
                    supply: 1_000_000,
                    is_initialized: true,
                    mint_authority: None,
                    freeze_authority: None,
                }),
            );
            Self {
                accounts,
                ..Default::default()
            }
        }

        fn sender(&self) -> mpsc::Sender<LogBatch> {
            self.senders.lock().unwrap().last().cloned().unwrap()
        }

        fn subscriptions(&self) -> usize {
            self.senders.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LedgerClient for ScriptedLedger {
        async fn subscribe_logs(&self, _program_id: &str) -> Result<LogSubscription> {
            if self.fail_subscribe {
                return Err(Error::Subscription("refused".into()));
            }
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            Ok(LogSubscription {
                receiver: rx,
                handle: SubscriptionHandle::detached(CancellationToken::new()),
            })
        }

        async fn get_parsed_account_info(&self, address: &str) -> Result<Option<ParsedAccount>> {
            if self.fail_lookup {
                return Err(Error::Rpc("node unavailable".into()));
            }
            Ok(self.accounts.get(address).cloned())
        }

        async fn get_signatures_for_address(
            &self,
            _address: &str,
            _limit: usize,
        ) -> Result<Vec<SignatureInfo>> {
            Ok(Vec::new())
        }

        async fn get_token_holders(&self, _mint: &str, _limit: usize) -> Result<Vec<HolderBalance>> {
            Ok(Vec::new())
        }

        async fn get_token_balance(&self, _owner: &str, _mint: &str) -> Result<u64> {
            Ok(0)
        }

        async fn get_token_supply(&self, _mint: &str) -> Result<u64> {
            Ok(0)
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn init_batch(signature: &str) -> LogBatch {
        LogBatch {
            signature: signature.into(),
            err: None,
            logs: vec![
                "Program log: Instruction: InitializeMint2".into(),
                format!("Program log: Initialize mint: {}", MINT),
                format!("Program log: signer: {}", CREATOR),
            ],
        }
    }

    fn detector(
        ledger: Arc<ScriptedLedger>,
        events: EventBus,
    ) -> (TokenDetector, mpsc::Receiver<DetectionResult>) {
        let (tx, rx) = mpsc::channel(16);
        let detector = TokenDetector::new(
            DetectorConfig::default(),
            TokenValidationConfig::default(),
            ledger,
            events,
            tx,
        )
        .unwrap();
        (detector, rx)
    }

    #[tokio::test]
    async fn test_detects_valid_candidate() {
        let ledger = Arc::new(ScriptedLedger::with_mint(9));
        let (detector, mut rx) = detector(ledger.clone(), EventBus::new(16));

        detector.start().await.unwrap();
        assert_eq!(detector.status().await, ServiceStatus::Running);

        ledger.sender().send(init_batch("sig1")).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.candidate.mint, MINT);
        assert_eq!(result.candidate.creator, CREATOR);
        assert_eq!(result.candidate.decimals, 9);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.candidate.metadata.get("signature").map(String::as_str), Some("sig1"));

        detector.stop().await;
        assert_eq!(detector.status().await, ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_noise_is_dropped_silently() {
        let ledger = Arc::new(ScriptedLedger::with_mint(9));
        let events = EventBus::new(16);
        let mut event_rx = events.subscribe();
        let (detector, mut rx) = detector(ledger.clone(), events);
        detector.start().await.unwrap();

        let sender = ledger.sender();
        // No marker
        sender
            .send(LogBatch {
                signature: "a".into(),
                err: None,
                logs: vec!["Program log: Instruction: Transfer".into()],
            })
            .await
            .unwrap();
        // Marker but unknown mint account
        let mut unknown = init_batch("b");
        unknown.logs[1] = "Program log: mint: HN7cABqLq46Es1jh92dQQisAq662SmxELLLsHHe4YWrH".into();
        sender.send(unknown).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(event_rx.try_recv().is_err());
        assert_eq!(detector.stats().batches_seen, 2);

        detector.stop().await;
    }

    #[tokio::test]
    async fn test_lookup_failure_emits_error_event_and_keeps_running() {
        let ledger = Arc::new(ScriptedLedger {
            fail_lookup: true,
            ..ScriptedLedger::with_mint(9)
        });
        let events = EventBus::new(16);
        let mut event_rx = events.subscribe();
        let (detector, _rx) = detector(ledger.clone(), events);
        detector.start().await.unwrap();

        ledger.sender().send(init_batch("sig")).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), "error");
        assert_eq!(detector.status().await, ServiceStatus::Running);

        detector.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_when_stopped_is_noop() {
        let ledger = Arc::new(ScriptedLedger::with_mint(9));
        let (detector, _rx) = detector(ledger.clone(), EventBus::new(16));

        detector.stop().await;
        assert_eq!(detector.status().await, ServiceStatus::Stopped);

        detector.start().await.unwrap();
        detector.start().await.unwrap();
        assert_eq!(ledger.subscriptions(), 1);

        detector.stop().await;
        detector.stop().await;
        assert_eq!(detector.status().await, ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_subscription_failure_sets_error() {
        let ledger = Arc::new(ScriptedLedger {
            fail_subscribe: true,
            ..Default::default()
        });
        let (detector, _rx) = detector(ledger, EventBus::new(16));

        assert!(detector.start().await.is_err());
        assert_eq!(detector.status().await, ServiceStatus::Error);
    }

    #[tokio::test]
    async fn test_closed_subscription_moves_to_error() {
        let ledger = Arc::new(ScriptedLedger::with_mint(9));
        let (detector, _rx) = detector(ledger.clone(), EventBus::new(16));
        detector.start().await.unwrap();

        // Drop every sender so the receiver sees end-of-stream
        ledger.senders.lock().unwrap().clear();

        let mut status = detector.status().await;
        for _ in 0..50 {
            if status == ServiceStatus::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = detector.status().await;
        }
        assert_eq!(status, ServiceStatus::Error);
        let failed = detector.failure_signal().await.unwrap();
        assert!(failed.is_cancelled());

        // Restart from error resubscribes
        detector.start().await.unwrap();
        assert_eq!(detector.status().await, ServiceStatus::Running);
        assert_eq!(ledger.subscriptions(), 1);
        detector.stop().await;
    }

    #[tokio::test]
    async fn test_stop_with_closed_stream_is_clean() {
        let ledger = Arc::new(ScriptedLedger::with_mint(9));
        let events = EventBus::new(16);
        let mut feed = events.subscribe();
        let (detector, _rx) = detector(ledger.clone(), events);
        detector.start().await.unwrap();
        let failed = detector.failure_signal().await.unwrap();

        // Stream end and cancellation are both pending when the loop wakes
        ledger.senders.lock().unwrap().clear();
        detector.stop().await;

        assert_eq!(detector.status().await, ServiceStatus::Stopped);
        assert!(!failed.is_cancelled());
        assert!(feed.try_recv().is_err());
    }
}
