//! Creator wallet scoring
//!
//! Scores the wallet that created a token from its age, activity and the
//! outcomes of its earlier tokens. Outcome history lives in
//! [`CreatorRegistry`], owned by the orchestrator and shared by handle.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::parse_address;
use crate::error::{Error, Result};
use crate::ledger::LedgerClient;

#[derive(Debug, Clone, Deserialize)]
pub struct CreatorConfig {
    /// Wallet age that earns a full age score
    #[serde(default = "default_age_baseline_secs")]
    pub age_baseline_secs: u64,
    /// Transaction count that earns a full activity score
    #[serde(default = "default_tx_baseline")]
    pub tx_baseline: u64,
    /// Successful launches that earn a full track-record score
    #[serde(default = "default_success_baseline")]
    pub success_baseline: u32,
    /// Signatures fetched per lookup (RPC max 1000)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// A wallet younger than this with baseline activity is bursting
    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: u64,
    #[serde(default)]
    pub known_scammers: Vec<String>,
    /// Wallets funded by or trading with known scammers
    #[serde(default)]
    pub scam_associates: Vec<String>,
    /// Newline-delimited scammer list, `#` starts a comment
    #[serde(default)]
    pub scammer_file: Option<PathBuf>,
}

impl Default for CreatorConfig {
    fn default() -> Self {
        Self {
            age_baseline_secs: default_age_baseline_secs(),
            tx_baseline: default_tx_baseline(),
            success_baseline: default_success_baseline(),
            history_limit: default_history_limit(),
            burst_window_secs: default_burst_window_secs(),
            known_scammers: Vec::new(),
            scam_associates: Vec::new(),
            scammer_file: None,
        }
    }
}

fn default_age_baseline_secs() -> u64 {
    30 * 24 * 3600
}

fn default_tx_baseline() -> u64 {
    100
}

fn default_success_baseline() -> u32 {
    3
}

fn default_history_limit() -> usize {
    1000
}

fn default_burst_window_secs() -> u64 {
    3600
}

impl CreatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.age_baseline_secs == 0 || self.tx_baseline == 0 || self.success_baseline == 0 {
            return Err(Error::Config("creator baselines must be positive".into()));
        }
        if !(1..=1000).contains(&self.history_limit) {
            return Err(Error::Config(
                "creator.history_limit must be between 1 and 1000".into(),
            ));
        }
        for address in &self.known_scammers {
            parse_address("creator.known_scammers", address)?;
        }
        for address in &self.scam_associates {
            parse_address("creator.scam_associates", address)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CreatorRecords {
    /// Append-only for the life of the process
    known_scammers: HashSet<String>,
    scam_associates: HashSet<String>,
    successful_tokens: HashMap<String, u32>,
    rug_pulls: HashMap<String, u32>,
}

/// Process-wide creator outcome store
#[derive(Debug, Default)]
pub struct CreatorRegistry {
    records: RwLock<CreatorRecords>,
}

impl CreatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from config lists and the optional scammer file
    pub fn from_config(config: &CreatorConfig) -> Result<Self> {
        let mut records = CreatorRecords::default();
        records
            .known_scammers
            .extend(config.known_scammers.iter().cloned());
        records
            .scam_associates
            .extend(config.scam_associates.iter().cloned());

        if let Some(path) = &config.scammer_file {
            let loaded = load_address_file(path)?;
            records.known_scammers.extend(loaded);
        }

        info!(
            scammers = records.known_scammers.len(),
            associates = records.scam_associates.len(),
            "Loaded creator registry"
        );

        Ok(Self {
            records: RwLock::new(records),
        })
    }

    pub async fn is_known_scammer(&self, creator: &str) -> bool {
        self.records.read().await.known_scammers.contains(creator)
    }

    /// Flag a creator. Returns false if already flagged.
    pub async fn flag_scammer(&self, creator: &str) -> bool {
        let added = self
            .records
            .write()
            .await
            .known_scammers
            .insert(creator.to_string());
        if added {
            warn!(creator = %creator, "Creator flagged as known scammer");
        }
        added
    }

    pub async fn add_associate(&self, wallet: &str) {
        self.records
            .write()
            .await
            .scam_associates
            .insert(wallet.to_string());
    }

    pub async fn record_success(&self, creator: &str) {
        *self
            .records
            .write()
            .await
            .successful_tokens
            .entry(creator.to_string())
            .or_default() += 1;
    }

    pub async fn record_rug(&self, creator: &str) {
        let mut records = self.records.write().await;
        *records.rug_pulls.entry(creator.to_string()).or_default() += 1;
        if records.known_scammers.insert(creator.to_string()) {
            warn!(creator = %creator, "Creator rugged, flagged as known scammer");
        }
    }

    pub async fn known_scammer_count(&self) -> usize {
        self.records.read().await.known_scammers.len()
    }

    async fn history(&self, creator: &str) -> CreatorHistory {
        let records = self.records.read().await;
        CreatorHistory {
            is_known_scammer: records.known_scammers.contains(creator),
            has_scam_connections: records.scam_associates.contains(creator),
            successful_tokens: records
                .successful_tokens
                .get(creator)
                .copied()
                .unwrap_or(0),
            rug_pulls: records.rug_pulls.get(creator).copied().unwrap_or(0),
        }
    }
}

fn load_address_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;

    let mut addresses = Vec::new();
    for line in content.lines() {
        let addr = line.trim();
        if addr.is_empty() || addr.starts_with('#') {
            continue;
        }
        parse_address("creator.scammer_file", addr)?;
        addresses.push(addr.to_string());
    }
    Ok(addresses)
}

struct CreatorHistory {
    is_known_scammer: bool,
    has_scam_connections: bool,
    successful_tokens: u32,
    rug_pulls: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatorMetrics {
    pub wallet_age_secs: u64,
    pub transaction_count: u64,
    pub successful_tokens: u32,
    pub rug_pulls: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatorRiskFlags {
    pub is_known_scammer: bool,
    pub has_scam_connections: bool,
    pub has_abnormal_patterns: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorScore {
    pub creator: String,
    /// 0-1
    pub overall: f64,
    pub metrics: CreatorMetrics,
    pub risk: CreatorRiskFlags,
}

impl CreatorScore {
    /// Fail-safe score used when history cannot be fetched
    pub fn conservative(creator: &str) -> Self {
        Self {
            creator: creator.to_string(),
            overall: 0.0,
            metrics: CreatorMetrics::default(),
            risk: CreatorRiskFlags {
                is_known_scammer: true,
                ..Default::default()
            },
        }
    }
}

pub struct CreatorAnalyzer {
    config: CreatorConfig,
    ledger: Arc<dyn LedgerClient>,
}

impl CreatorAnalyzer {
    pub fn new(config: CreatorConfig, ledger: Arc<dyn LedgerClient>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, ledger })
    }

    /// Score a creator. Never fails: lookup errors give the conservative score.
    pub async fn analyze(&self, creator: &str, registry: &CreatorRegistry) -> CreatorScore {
        if creator.is_empty() {
            debug!("Unknown creator, using conservative score");
            return CreatorScore::conservative(creator);
        }

        let signatures = match self
            .ledger
            .get_signatures_for_address(creator, self.config.history_limit)
            .await
        {
            Ok(signatures) => signatures,
            Err(e) => {
                warn!(creator = %creator, "Creator history lookup failed: {}", e);
                return CreatorScore::conservative(creator);
            }
        };

        let now = Utc::now().timestamp();
        let wallet_age_secs = signatures
            .iter()
            .filter_map(|s| s.block_time)
            .min()
            .map(|oldest| (now - oldest).max(0) as u64)
            .unwrap_or(0);

        let history = registry.history(creator).await;
        let metrics = CreatorMetrics {
            wallet_age_secs,
            transaction_count: signatures.len() as u64,
            successful_tokens: history.successful_tokens,
            rug_pulls: history.rug_pulls,
        };

        let risk = CreatorRiskFlags {
            is_known_scammer: history.is_known_scammer,
            has_scam_connections: history.has_scam_connections,
            has_abnormal_patterns: self.is_abnormal(&metrics),
        };

        let overall = score(&self.config, &metrics, &risk);
        debug!(creator = %creator, overall, ?risk, "Creator scored");

        CreatorScore {
            creator: creator.to_string(),
            overall,
            metrics,
            risk,
        }
    }

    fn is_abnormal(&self, metrics: &CreatorMetrics) -> bool {
        let bursting = metrics.wallet_age_secs < self.config.burst_window_secs
            && metrics.transaction_count >= self.config.tx_baseline;
        let rugs_dominate = metrics.rug_pulls > metrics.successful_tokens;
        bursting || rugs_dominate
    }
}

/// Mean of the age, activity and track-record scores. Only a known scammer
/// moves it; the other flags are left for the gate.
pub fn score(config: &CreatorConfig, metrics: &CreatorMetrics, risk: &CreatorRiskFlags) -> f64 {
    if risk.is_known_scammer {
        return 0.0;
    }

    let age = (metrics.wallet_age_secs as f64 / config.age_baseline_secs as f64).min(1.0);
    let activity = (metrics.transaction_count as f64 / config.tx_baseline as f64).min(1.0);
    let track_record =
        (metrics.successful_tokens as f64 / config.success_baseline as f64).min(1.0);

    ((age + activity + track_record) / 3.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{HolderBalance, LogSubscription, ParsedAccount, SignatureInfo};
    use async_trait::async_trait;
    use std::io::Write;

    const CREATOR: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    struct HistoryLedger {
        signatures: Vec<SignatureInfo>,
        fail: bool,
    }

    impl HistoryLedger {
        fn aged(days: i64, count: usize) -> Self {
            let oldest = Utc::now().timestamp() - days * 86_400;
            let signatures = (0..count)
                .map(|i| SignatureInfo {
                    signature: format!("sig{}", i),
                    slot: i as u64,
                    block_time: Some(oldest + i as i64),
                    failed: false,
                })
                .collect();
            Self {
                signatures,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl LedgerClient for HistoryLedger {
        async fn subscribe_logs(&self, _program_id: &str) -> Result<LogSubscription> {
            Err(Error::Subscription("unused".into()))
        }

        async fn get_parsed_account_info(&self, _address: &str) -> Result<Option<ParsedAccount>> {
            Ok(None)
        }

        async fn get_signatures_for_address(
            &self,
            _address: &str,
            limit: usize,
        ) -> Result<Vec<SignatureInfo>> {
            if self.fail {
                return Err(Error::Rpc("timeout".into()));
            }
            Ok(self.signatures.iter().take(limit).cloned().collect())
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

    fn analyzer(ledger: HistoryLedger) -> CreatorAnalyzer {
        CreatorAnalyzer::new(CreatorConfig::default(), Arc::new(ledger)).unwrap()
    }

    #[tokio::test]
    async fn test_mature_creator_scores_high() {
        let registry = CreatorRegistry::new();
        for _ in 0..3 {
            registry.record_success(CREATOR).await;
        }

        let score = analyzer(HistoryLedger::aged(60, 150))
            .analyze(CREATOR, &registry)
            .await;
        assert_eq!(score.overall, 1.0);
        assert_eq!(score.metrics.transaction_count, 150);
        assert!(score.metrics.wallet_age_secs >= 60 * 86_400 - 5);
    }

    #[tokio::test]
    async fn test_score_is_mean_of_factors() {
        // 15 days, 50 txs, no launches: (0.5 + 0.5 + 0) / 3
        let score = analyzer(HistoryLedger::aged(15, 50))
            .analyze(CREATOR, &CreatorRegistry::new())
            .await;
        assert!((score.overall - 1.0 / 3.0).abs() < 0.01, "{}", score.overall);
        assert!(!score.risk.has_abnormal_patterns);
    }

    #[tokio::test]
    async fn test_known_scammer_forces_zero() {
        let registry = CreatorRegistry::new();
        registry.flag_scammer(CREATOR).await;
        for _ in 0..5 {
            registry.record_success(CREATOR).await;
        }

        let score = analyzer(HistoryLedger::aged(365, 500))
            .analyze(CREATOR, &registry)
            .await;
        assert!(score.risk.is_known_scammer);
        assert_eq!(score.overall, 0.0);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_conservative() {
        let ledger = HistoryLedger {
            signatures: Vec::new(),
            fail: true,
        };
        let score = analyzer(ledger).analyze(CREATOR, &CreatorRegistry::new()).await;
        assert_eq!(score.overall, 0.0);
        assert!(score.risk.is_known_scammer);
    }

    #[tokio::test]
    async fn test_burst_wallet_is_abnormal() {
        // Brand-new wallet already at baseline activity
        let score = analyzer(HistoryLedger::aged(0, 120))
            .analyze(CREATOR, &CreatorRegistry::new())
            .await;
        assert!(score.risk.has_abnormal_patterns);
        // (0 + 1 + 0) / 3, the flag itself does not move the score
        assert!((score.overall - 1.0 / 3.0).abs() < 0.01, "{}", score.overall);
    }

    #[test]
    fn test_flagged_creator_keeps_mean_score() {
        let config = CreatorConfig::default();
        let metrics = CreatorMetrics {
            wallet_age_secs: 60 * 86_400,
            transaction_count: 200,
            successful_tokens: 1,
            rug_pulls: 0,
        };
        let mean = (1.0 + 1.0 + 1.0 / 3.0) / 3.0;

        for risk in [
            CreatorRiskFlags {
                has_abnormal_patterns: true,
                ..Default::default()
            },
            CreatorRiskFlags {
                has_scam_connections: true,
                has_abnormal_patterns: true,
                ..Default::default()
            },
        ] {
            assert!((score(&config, &metrics, &risk) - mean).abs() < 1e-9);
        }

        let scammer = CreatorRiskFlags {
            is_known_scammer: true,
            ..Default::default()
        };
        assert_eq!(score(&config, &metrics, &scammer), 0.0);
    }

    #[tokio::test]
    async fn test_rug_flags_scammer_append_only() {
        let registry = CreatorRegistry::new();
        registry.record_rug(CREATOR).await;
        assert!(registry.is_known_scammer(CREATOR).await);
        assert!(!registry.flag_scammer(CREATOR).await);
        assert_eq!(registry.known_scammer_count().await, 1);
    }

    #[tokio::test]
    async fn test_registry_seeded_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# rug deployers\n{}\n\n", CREATOR).unwrap();

        let config = CreatorConfig {
            scammer_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let registry = CreatorRegistry::from_config(&config).unwrap();
        assert!(registry.is_known_scammer(CREATOR).await);
    }

    #[test]
    fn test_missing_scammer_file_fails() {
        let config = CreatorConfig {
            scammer_file: Some(PathBuf::from("/nonexistent/scammers.txt")),
            ..Default::default()
        };
        assert!(CreatorRegistry::from_config(&config).is_err());
    }
}
