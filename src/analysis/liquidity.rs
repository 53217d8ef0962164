//! Liquidity analysis and pool monitors
//!
//! A single [`LiquidityAnalyzer::analyze_once`] pass feeds the entry gate.
//! Accepted pools are then watched by a monitor that re-samples on a fixed
//! interval for `monitor_duration_secs` and flags LP removal between samples.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pool_source::PoolDataSource;
use super::{LiquidityAnalysis, LiquidityWarning, PoolInfo, PoolTarget, Severity, WarningKind};
use crate::config::parse_address;
use crate::error::{Error, Result};
use crate::events::{EventBus, PipelineEvent};

/// Well-known LP burn sinks and locker programs
const DEFAULT_LOCK_HOLDERS: &[&str] = &[
    "11111111111111111111111111111111",
    "1nc1nerator11111111111111111111111111111111",
    "LocktDzaV1W2Bm9DeZeiyz4J9zs4fRqNiYqQyracRXw",
    "UNCXwJaodKz7uGqz3yXzx4qcAa6aKMxxdFTvVkYsw5W",
    "Teamuej4gXrHkMBj5nyFV6e3YJJYcKCFbm5dU1JvtP9",
];

#[derive(Debug, Clone, Deserialize)]
pub struct SuspiciousChangeConfig {
    /// Locked LP drop between samples, in percent
    #[serde(default = "default_lp_removal_pct")]
    pub lp_removal_pct: f64,
    /// USD liquidity drop between samples, in percent
    #[serde(default = "default_liquidity_drop_pct")]
    pub liquidity_drop_pct: f64,
    /// Remaining lock below this is too short
    #[serde(default = "default_min_lock_duration_secs")]
    pub min_lock_duration_secs: u64,
    /// Remaining lock shrinking by more than this between samples
    #[serde(default = "default_lock_reduction_pct")]
    pub lock_reduction_pct: f64,
}

impl Default for SuspiciousChangeConfig {
    fn default() -> Self {
        Self {
            lp_removal_pct: default_lp_removal_pct(),
            liquidity_drop_pct: default_liquidity_drop_pct(),
            min_lock_duration_secs: default_min_lock_duration_secs(),
            lock_reduction_pct: default_lock_reduction_pct(),
        }
    }
}

fn default_lp_removal_pct() -> f64 {
    10.0
}

fn default_liquidity_drop_pct() -> f64 {
    30.0
}

fn default_min_lock_duration_secs() -> u64 {
    30 * 24 * 3600
}

fn default_lock_reduction_pct() -> f64 {
    50.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiquidityConfig {
    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,
    /// Minimum share of LP supply locked or burned, in percent
    #[serde(default = "default_min_lp_locked_pct")]
    pub min_lp_locked_pct: f64,
    /// Maximum share of supply held by the creator, in percent
    #[serde(default = "default_max_creator_pct")]
    pub max_creator_pct: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_monitor_duration_secs")]
    pub monitor_duration_secs: u64,
    /// Holder list cap for distribution analysis
    #[serde(default = "default_max_holders")]
    pub max_holders: usize,
    /// Keep watching a pool after it passes the entry gate
    #[serde(default = "default_true")]
    pub monitor_after_entry: bool,
    /// Owners whose LP balance counts as locked
    #[serde(default = "default_lock_holders")]
    pub lock_holders: Vec<String>,
    #[serde(default)]
    pub suspicious_changes: SuspiciousChangeConfig,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            min_liquidity_usd: default_min_liquidity_usd(),
            min_lp_locked_pct: default_min_lp_locked_pct(),
            max_creator_pct: default_max_creator_pct(),
            poll_interval_ms: default_poll_interval_ms(),
            monitor_duration_secs: default_monitor_duration_secs(),
            max_holders: default_max_holders(),
            monitor_after_entry: true,
            lock_holders: default_lock_holders(),
            suspicious_changes: SuspiciousChangeConfig::default(),
        }
    }
}

fn default_min_liquidity_usd() -> f64 {
    10_000.0
}

fn default_min_lp_locked_pct() -> f64 {
    80.0
}

fn default_max_creator_pct() -> f64 {
    20.0
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_monitor_duration_secs() -> u64 {
    300
}

fn default_max_holders() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_lock_holders() -> Vec<String> {
    DEFAULT_LOCK_HOLDERS.iter().map(|s| s.to_string()).collect()
}

fn check_pct(key: &str, value: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&value) {
        return Err(Error::Config(format!(
            "{} must be between 0 and 100 (got {})",
            key, value
        )));
    }
    Ok(())
}

impl LiquidityConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_liquidity_usd.is_finite() || self.min_liquidity_usd < 0.0 {
            return Err(Error::Config(
                "liquidity.min_liquidity_usd must be non-negative".into(),
            ));
        }
        check_pct("liquidity.min_lp_locked_pct", self.min_lp_locked_pct)?;
        check_pct("liquidity.max_creator_pct", self.max_creator_pct)?;
        check_pct(
            "liquidity.suspicious_changes.lp_removal_pct",
            self.suspicious_changes.lp_removal_pct,
        )?;
        check_pct(
            "liquidity.suspicious_changes.liquidity_drop_pct",
            self.suspicious_changes.liquidity_drop_pct,
        )?;
        check_pct(
            "liquidity.suspicious_changes.lock_reduction_pct",
            self.suspicious_changes.lock_reduction_pct,
        )?;

        if self.poll_interval_ms == 0 || self.monitor_duration_secs == 0 {
            return Err(Error::Config(
                "liquidity.poll_interval_ms and liquidity.monitor_duration_secs must be positive"
                    .into(),
            ));
        }
        if self.poll_interval_ms >= self.monitor_duration_secs * 1000 {
            return Err(Error::Config(
                "liquidity.poll_interval_ms must be shorter than the monitor duration".into(),
            ));
        }
        if !(1..=1000).contains(&self.max_holders) {
            return Err(Error::Config(
                "liquidity.max_holders must be between 1 and 1000".into(),
            ));
        }
        for holder in &self.lock_holders {
            parse_address("liquidity.lock_holders", holder)?;
        }
        Ok(())
    }
}

/// Warnings, risk and confidence for one sample.
///
/// Deterministic for identical input. Confidence starts below 1 on a single
/// sample and loses 0.35 per high, 0.05 per medium and 0.02 per low warning.
pub fn assess(
    config: &LiquidityConfig,
    mut pool: PoolInfo,
    previous: Option<&PoolInfo>,
    sample_count: u32,
) -> LiquidityAnalysis {
    pool.sanitize();
    let changes = &config.suspicious_changes;
    let mut warnings = Vec::new();

    if pool.liquidity.usd_value < config.min_liquidity_usd {
        warnings.push(LiquidityWarning {
            kind: WarningKind::LowLiquidity,
            severity: Severity::High,
            detail: format!(
                "liquidity ${:.0} below ${:.0}",
                pool.liquidity.usd_value, config.min_liquidity_usd
            ),
        });
    }

    let locked_pct = pool.lp.locked_percentage();
    if locked_pct < config.min_lp_locked_pct {
        warnings.push(LiquidityWarning {
            kind: WarningKind::LowLpLocked,
            severity: Severity::High,
            detail: format!(
                "{:.1}% of LP locked, need {:.1}%",
                locked_pct, config.min_lp_locked_pct
            ),
        });
    }

    if pool.creator.percentage > config.max_creator_pct {
        warnings.push(LiquidityWarning {
            kind: WarningKind::HighCreatorOwnership,
            severity: Severity::Medium,
            detail: format!(
                "creator holds {:.1}% of supply, max {:.1}%",
                pool.creator.percentage, config.max_creator_pct
            ),
        });
    }

    if let Some(prev) = previous {
        let lp_drop = percent_drop(prev.lp.locked_amount, pool.lp.locked_amount);
        let usd_drop = percent_drop(prev.liquidity.usd_value, pool.liquidity.usd_value);
        if lp_drop > changes.lp_removal_pct {
            warnings.push(LiquidityWarning {
                kind: WarningKind::SuspiciousLpRemoval,
                severity: Severity::High,
                detail: format!("locked LP fell {:.1}% since last sample", lp_drop),
            });
        } else if usd_drop > changes.liquidity_drop_pct {
            warnings.push(LiquidityWarning {
                kind: WarningKind::SuspiciousLpRemoval,
                severity: Severity::High,
                detail: format!("liquidity fell {:.1}% since last sample", usd_drop),
            });
        }

        if let (Some(before), Some(now)) = (prev.lp.lock_duration_secs, pool.lp.lock_duration_secs)
        {
            let shrink = percent_drop(before as f64, now as f64);
            if shrink > changes.lock_reduction_pct {
                warnings.push(LiquidityWarning {
                    kind: WarningKind::ShortTimelock,
                    severity: Severity::Medium,
                    detail: format!("remaining lock shortened by {:.1}%", shrink),
                });
            }
        }
    }

    if let Some(remaining) = pool.lp.lock_duration_secs {
        let already = warnings.iter().any(|w| w.kind == WarningKind::ShortTimelock);
        if remaining < changes.min_lock_duration_secs && !already {
            warnings.push(LiquidityWarning {
                kind: WarningKind::ShortTimelock,
                severity: Severity::Medium,
                detail: format!(
                    "LP unlocks in {}s, want at least {}s",
                    remaining, changes.min_lock_duration_secs
                ),
            });
        }
    }

    LiquidityAnalysis {
        risk_score: risk_score(&warnings),
        confidence: confidence(&warnings, sample_count),
        pool,
        warnings,
        sample_count,
    }
}

fn percent_drop(before: f64, after: f64) -> f64 {
    if before <= 0.0 || after >= before {
        return 0.0;
    }
    (before - after) / before * 100.0
}

fn severity_counts(warnings: &[LiquidityWarning]) -> (f64, f64, f64) {
    warnings
        .iter()
        .fold((0.0, 0.0, 0.0), |(h, m, l), w| match w.severity {
            Severity::High => (h + 1.0, m, l),
            Severity::Medium => (h, m + 1.0, l),
            Severity::Low => (h, m, l + 1.0),
        })
}

pub fn confidence(warnings: &[LiquidityWarning], sample_count: u32) -> f64 {
    let (high, medium, low) = severity_counts(warnings);
    let ceiling = if sample_count >= 2 { 1.0 } else { 0.9 };
    (ceiling * (1.0 - 0.35 * high - 0.05 * medium - 0.02 * low)).clamp(0.0, 1.0)
}

pub fn risk_score(warnings: &[LiquidityWarning]) -> f64 {
    let (high, medium, low) = severity_counts(warnings);
    (0.4 * high + 0.2 * medium + 0.1 * low).clamp(0.0, 1.0)
}

struct MonitorHandle {
    id: u64,
    cancel: CancellationToken,
}

pub struct LiquidityAnalyzer {
    config: Arc<LiquidityConfig>,
    source: Arc<dyn PoolDataSource>,
    events: EventBus,
    monitors: Arc<DashMap<String, MonitorHandle>>,
    next_id: AtomicU64,
}

impl LiquidityAnalyzer {
    pub fn new(
        config: LiquidityConfig,
        source: Arc<dyn PoolDataSource>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            source,
            events,
            monitors: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &LiquidityConfig {
        &self.config
    }

    /// Complete a discovered target from the pool's on-chain state
    pub async fn resolve_target(&self, target: PoolTarget) -> Result<PoolTarget> {
        let pool = target.pool.clone();
        self.source
            .resolve(target)
            .await
            .map_err(|e| Error::PoolAnalysis {
                pool,
                reason: e.to_string(),
            })
    }

    /// Sample the pool once and assess it
    pub async fn analyze_once(&self, target: &PoolTarget) -> Result<LiquidityAnalysis> {
        let pool = self
            .source
            .sample(target)
            .await
            .map_err(|e| Error::PoolAnalysis {
                pool: target.pool.clone(),
                reason: e.to_string(),
            })?;

        let analysis = assess(&self.config, pool, None, 1);
        publish(&self.events, &analysis, &HashSet::new());
        Ok(analysis)
    }

    /// Start monitoring a pool. Returns false (and logs) if one is already running.
    pub fn start_pool_analysis(&self, target: PoolTarget) -> bool {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        match self.monitors.entry(target.pool.clone()) {
            Entry::Occupied(_) => {
                warn!(pool = %target.pool, "Pool already under analysis");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(MonitorHandle {
                    id,
                    cancel: cancel.clone(),
                });
            }
        }

        info!(
            pool = %target.pool,
            mint = %target.token_mint,
            duration_secs = self.config.monitor_duration_secs,
            "Starting pool analysis"
        );

        tokio::spawn(run_monitor(
            id,
            target,
            self.config.clone(),
            self.source.clone(),
            self.events.clone(),
            self.monitors.clone(),
            cancel,
        ));
        true
    }

    /// Stop a monitor. Idempotent.
    pub fn stop_pool_analysis(&self, pool: &str) -> bool {
        match self.monitors.remove(pool) {
            Some((_, handle)) => {
                handle.cancel.cancel();
                info!(pool = %pool, "Stopped pool analysis");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let pools: Vec<String> = self.monitors.iter().map(|e| e.key().clone()).collect();
        for pool in pools {
            self.stop_pool_analysis(&pool);
        }
    }

    pub fn is_monitoring(&self, pool: &str) -> bool {
        self.monitors.contains_key(pool)
    }

    pub fn active_monitors(&self) -> Vec<String> {
        self.monitors.iter().map(|e| e.key().clone()).collect()
    }
}

impl Drop for LiquidityAnalyzer {
    fn drop(&mut self) {
        for entry in self.monitors.iter() {
            entry.value().cancel.cancel();
        }
    }
}

/// Publish the analysis plus any warning kinds not raised by the previous sample
fn publish(events: &EventBus, analysis: &LiquidityAnalysis, seen: &HashSet<WarningKind>) {
    for warning in &analysis.warnings {
        if !seen.contains(&warning.kind) {
            events.publish(PipelineEvent::Warning {
                pool: analysis.pool.pool_address.clone(),
                warning: warning.clone(),
            });
        }
    }
    events.publish(PipelineEvent::Analysis(analysis.clone()));
}

async fn run_monitor(
    id: u64,
    target: PoolTarget,
    config: Arc<LiquidityConfig>,
    source: Arc<dyn PoolDataSource>,
    events: EventBus,
    monitors: Arc<DashMap<String, MonitorHandle>>,
    cancel: CancellationToken,
) {
    let expiry = sleep_until(Instant::now() + Duration::from_secs(config.monitor_duration_secs));
    tokio::pin!(expiry);

    let mut ticker = interval(Duration::from_millis(config.poll_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut previous: Option<PoolInfo> = None;
    let mut seen_warnings: HashSet<WarningKind> = HashSet::new();
    let mut samples: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(pool = %target.pool, "Pool monitor cancelled");
                break;
            }
            _ = &mut expiry => {
                info!(pool = %target.pool, samples, "Pool analysis complete");
                break;
            }
            _ = ticker.tick() => {
                match source.sample(&target).await {
                    Ok(pool) => {
                        samples += 1;
                        let analysis = assess(&config, pool, previous.as_ref(), samples);
                        debug!(
                            pool = %target.pool,
                            risk = analysis.risk_score,
                            confidence = analysis.confidence,
                            warnings = analysis.warnings.len(),
                            "Pool sampled"
                        );
                        publish(&events, &analysis, &seen_warnings);
                        seen_warnings = analysis.warnings.iter().map(|w| w.kind).collect();
                        previous = Some(analysis.pool);
                    }
                    Err(e) => {
                        warn!(pool = %target.pool, "Pool sample failed: {}", e);
                        events.error("liquidity", e.to_string(), Some(target.pool.clone()));
                    }
                }
            }
        }
    }

    // Only remove our own entry; the pool may have been restarted meanwhile
    monitors.remove_if(&target.pool, |_, handle| handle.id == id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CreatorOwnership, LiquidityStats, LpStats};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn target(pool: &str) -> PoolTarget {
        PoolTarget {
            pool: pool.into(),
            token_mint: "mint".into(),
            base_mint: "base".into(),
            lp_mint: Some("lp".into()),
            token_vault: None,
            base_vault: None,
            creator: Some("creator".into()),
        }
    }

    fn pool(usd: f64, locked_pct: f64, creator_pct: f64) -> PoolInfo {
        PoolInfo {
            pool_address: "pool".into(),
            token_mint: "mint".into(),
            base_mint: "base".into(),
            liquidity: LiquidityStats {
                token_amount: 1_000_000.0,
                base_amount: 100.0,
                usd_value: usd,
                ..Default::default()
            },
            lp: LpStats {
                total_supply: 1_000.0,
                locked_amount: 1_000.0 * locked_pct / 100.0,
                lock_duration_secs: None,
                vesting: None,
            },
            creator: CreatorOwnership {
                creator: Some("creator".into()),
                balance: creator_pct,
                percentage: creator_pct,
            },
            sampled_at: Utc::now(),
        }
    }

    /// Replays scripted samples, repeating the last one
    struct ScriptedSource {
        samples: Mutex<Vec<Result<PoolInfo>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(samples: Vec<Result<PoolInfo>>) -> Self {
            Self {
                samples: Mutex::new(samples),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PoolDataSource for ScriptedSource {
        async fn sample(&self, _target: &PoolTarget) -> Result<PoolInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut samples = self.samples.lock().unwrap();
            if samples.len() > 1 {
                samples.remove(0)
            } else {
                match samples.first() {
                    Some(Ok(p)) => Ok(p.clone()),
                    _ => Err(Error::Rpc("no sample".into())),
                }
            }
        }
    }

    #[test]
    fn test_healthy_pool_has_no_high_warnings() {
        let analysis = assess(&LiquidityConfig::default(), pool(50_000.0, 90.0, 10.0), None, 1);
        assert!(analysis.warnings.is_empty());
        assert!(analysis.confidence > 0.8);
        assert!((analysis.confidence - 0.9).abs() < 1e-9);
        assert_eq!(analysis.risk_score, 0.0);
    }

    #[test]
    fn test_low_liquidity_is_high_severity() {
        for usd in [0.0, 500.0, 9_999.99] {
            let analysis = assess(&LiquidityConfig::default(), pool(usd, 90.0, 10.0), None, 1);
            let warning = analysis
                .warnings
                .iter()
                .find(|w| w.kind == WarningKind::LowLiquidity)
                .unwrap();
            assert_eq!(warning.severity, Severity::High);
        }
    }

    #[test]
    fn test_multiple_high_warnings_drop_confidence() {
        let analysis = assess(&LiquidityConfig::default(), pool(1_000.0, 10.0, 50.0), None, 1);
        assert_eq!(analysis.high_severity_count(), 2);
        assert!(analysis.has_warning(WarningKind::HighCreatorOwnership));
        assert!(analysis.confidence < 0.5);
        assert!(analysis.risk_score > 0.8);
    }

    #[test]
    fn test_confidence_monotonic_in_warnings() {
        let config = LiquidityConfig::default();
        let clean = assess(&config, pool(50_000.0, 90.0, 10.0), None, 1).confidence;
        let medium = assess(&config, pool(50_000.0, 90.0, 30.0), None, 1).confidence;
        let high = assess(&config, pool(50_000.0, 10.0, 30.0), None, 1).confidence;
        assert!(clean > medium && medium > high);
    }

    #[test]
    fn test_assess_is_deterministic() {
        let config = LiquidityConfig::default();
        let p = pool(20_000.0, 50.0, 25.0);
        let a = assess(&config, p.clone(), None, 1);
        let b = assess(&config, p, None, 1);
        assert_eq!(a.warnings, b.warnings);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.risk_score, b.risk_score);
    }

    #[test]
    fn test_lp_removal_between_samples() {
        let config = LiquidityConfig::default();
        let before = pool(50_000.0, 95.0, 10.0);
        let after = pool(50_000.0, 81.0, 10.0);
        let analysis = assess(&config, after, Some(&before), 2);
        assert!(analysis.has_warning(WarningKind::SuspiciousLpRemoval));
    }

    #[test]
    fn test_short_and_shrinking_timelock() {
        let config = LiquidityConfig::default();
        let mut short = pool(50_000.0, 90.0, 10.0);
        short.lp.lock_duration_secs = Some(3600);
        assert!(assess(&config, short, None, 1).has_warning(WarningKind::ShortTimelock));

        let mut before = pool(50_000.0, 90.0, 10.0);
        before.lp.lock_duration_secs = Some(365 * 86_400);
        let mut after = before.clone();
        after.lp.lock_duration_secs = Some(60 * 86_400);
        let analysis = assess(&config, after, Some(&before), 2);
        let timelocks = analysis
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::ShortTimelock)
            .count();
        assert_eq!(timelocks, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LiquidityConfig {
            min_lp_locked_pct: 120.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_noop() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(pool(50_000.0, 90.0, 10.0))]));
        let analyzer =
            LiquidityAnalyzer::new(LiquidityConfig::default(), source, EventBus::new(64)).unwrap();

        assert!(analyzer.start_pool_analysis(target("pool")));
        assert!(!analyzer.start_pool_analysis(target("pool")));
        assert_eq!(analyzer.active_monitors(), vec!["pool".to_string()]);

        assert!(analyzer.stop_pool_analysis("pool"));
        assert!(!analyzer.stop_pool_analysis("pool"));
        assert!(analyzer.active_monitors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_leaves_running_monitor_alone() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(pool(50_000.0, 90.0, 10.0))]));
        let config = LiquidityConfig {
            poll_interval_ms: 1_000,
            monitor_duration_secs: 60,
            ..Default::default()
        };
        let analyzer = LiquidityAnalyzer::new(config, source.clone(), EventBus::new(64)).unwrap();

        assert!(analyzer.start_pool_analysis(target("pool")));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let before = source.calls.load(Ordering::SeqCst);
        assert!(before >= 3, "calls {}", before);

        let mut other = target("pool");
        other.token_mint = "other-mint".into();
        assert!(!analyzer.start_pool_analysis(other));

        // Still one sampler: the rate stays at one call per interval
        tokio::time::sleep(Duration::from_secs(3)).await;
        let during = source.calls.load(Ordering::SeqCst) - before;
        assert!((2..=4).contains(&during), "calls {}", during);

        // One stop is enough, nothing was spawned behind the map
        assert!(analyzer.stop_pool_analysis("pool"));
        assert!(!analyzer.is_monitoring("pool"));
        let stopped_at = source.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_self_terminates_after_duration() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(pool(50_000.0, 90.0, 10.0))]));
        let config = LiquidityConfig {
            poll_interval_ms: 1_000,
            monitor_duration_secs: 10,
            ..Default::default()
        };
        let analyzer = LiquidityAnalyzer::new(config, source.clone(), EventBus::new(64)).unwrap();

        analyzer.start_pool_analysis(target("pool"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(analyzer.is_monitoring("pool"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!analyzer.is_monitoring("pool"));

        let calls = source.calls.load(Ordering::SeqCst);
        assert!((9..=11).contains(&calls), "calls {}", calls);

        // No further samples once terminated
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_error_keeps_monitor_alive() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(Error::Rpc("flaky".into())),
            Ok(pool(50_000.0, 90.0, 10.0)),
        ]));
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let config = LiquidityConfig {
            poll_interval_ms: 1_000,
            monitor_duration_secs: 30,
            ..Default::default()
        };
        let analyzer = LiquidityAnalyzer::new(config, source, events).unwrap();

        analyzer.start_pool_analysis(target("pool"));
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind(), "error");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind(), "analysis");
        assert!(analyzer.is_monitoring("pool"));

        analyzer.stop_all();
        assert!(analyzer.active_monitors().is_empty());
    }

    #[tokio::test]
    async fn test_analyze_once_wraps_source_error() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let analyzer =
            LiquidityAnalyzer::new(LiquidityConfig::default(), source, EventBus::new(8)).unwrap();
        let err = analyzer.analyze_once(&target("pool")).await.unwrap_err();
        assert!(matches!(err, Error::PoolAnalysis { .. }));
    }
}
