//! Creator and liquidity analysis
//!
//! Both analyzers sit between detection and the entry gate. Their outputs
//! are plain data: warnings and scores that the gate inspects, never errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod creator;
pub mod distribution;
pub mod liquidity;
pub mod pool_source;

pub use creator::{CreatorAnalyzer, CreatorConfig, CreatorRegistry, CreatorScore};
pub use distribution::analyze_token_distribution;
pub use liquidity::{LiquidityAnalyzer, LiquidityConfig, SuspiciousChangeConfig};
pub use pool_source::{OnChainPoolSource, PoolDataSource};

/// Pool to analyze
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolTarget {
    pub pool: String,
    pub token_mint: String,
    pub base_mint: String,
    /// LP receipt mint; without it nothing counts as locked
    pub lp_mint: Option<String>,
    /// Token and base vaults, when the pool layout is known. Otherwise the
    /// pool address itself is treated as the owner of both sides.
    #[serde(default)]
    pub token_vault: Option<String>,
    #[serde(default)]
    pub base_vault: Option<String>,
    pub creator: Option<String>,
}

/// Holder concentration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionMetrics {
    pub gini: f64,
    pub top10_percentage: f64,
    pub holder_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityStats {
    /// UI amount of the token side
    pub token_amount: f64,
    /// UI amount of the base side
    pub base_amount: f64,
    pub usd_value: f64,
    pub distribution: DistributionMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VestingSchedule {
    pub start: DateTime<Utc>,
    pub cliff_secs: u64,
    pub duration_secs: u64,
    pub released_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LpStats {
    pub total_supply: f64,
    pub locked_amount: f64,
    /// Remaining lock time, when known
    pub lock_duration_secs: Option<u64>,
    pub vesting: Option<VestingSchedule>,
}

impl LpStats {
    pub fn locked_percentage(&self) -> f64 {
        if self.total_supply <= 0.0 {
            return 0.0;
        }
        (self.locked_amount / self.total_supply * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatorOwnership {
    pub creator: Option<String>,
    pub balance: f64,
    /// Share of total supply, 0-100
    pub percentage: f64,
}

/// One sample of a pool's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_address: String,
    pub token_mint: String,
    pub base_mint: String,
    pub liquidity: LiquidityStats,
    pub lp: LpStats,
    pub creator: CreatorOwnership,
    pub sampled_at: DateTime<Utc>,
}

impl PoolInfo {
    pub fn empty(target: &PoolTarget) -> Self {
        Self {
            pool_address: target.pool.clone(),
            token_mint: target.token_mint.clone(),
            base_mint: target.base_mint.clone(),
            liquidity: LiquidityStats::default(),
            lp: LpStats::default(),
            creator: CreatorOwnership {
                creator: target.creator.clone(),
                ..Default::default()
            },
            sampled_at: Utc::now(),
        }
    }

    /// Clamp amounts a misbehaving source may report as negative or NaN
    pub fn sanitize(&mut self) {
        fn non_negative(v: &mut f64) {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        non_negative(&mut self.liquidity.token_amount);
        non_negative(&mut self.liquidity.base_amount);
        non_negative(&mut self.liquidity.usd_value);
        non_negative(&mut self.lp.total_supply);
        non_negative(&mut self.lp.locked_amount);
        non_negative(&mut self.creator.balance);
        non_negative(&mut self.creator.percentage);
        self.creator.percentage = self.creator.percentage.min(100.0);
        if self.lp.locked_amount > self.lp.total_supply {
            self.lp.locked_amount = self.lp.total_supply;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningKind {
    LowLiquidity,
    LowLpLocked,
    HighCreatorOwnership,
    SuspiciousLpRemoval,
    ShortTimelock,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarningKind::LowLiquidity => "LOW_LIQUIDITY",
            WarningKind::LowLpLocked => "LOW_LP_LOCKED",
            WarningKind::HighCreatorOwnership => "HIGH_CREATOR_OWNERSHIP",
            WarningKind::SuspiciousLpRemoval => "SUSPICIOUS_LP_REMOVAL",
            WarningKind::ShortTimelock => "SHORT_TIMELOCK",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityWarning {
    pub kind: WarningKind,
    pub severity: Severity,
    pub detail: String,
}

/// Immutable snapshot of one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityAnalysis {
    pub pool: PoolInfo,
    pub risk_score: f64,
    pub warnings: Vec<LiquidityWarning>,
    pub confidence: f64,
    /// Samples observed when this snapshot was taken
    pub sample_count: u32,
}

impl LiquidityAnalysis {
    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }

    pub fn high_severity_count(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| w.severity == Severity::High)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_percentage_handles_zero_supply() {
        let lp = LpStats {
            total_supply: 0.0,
            locked_amount: 10.0,
            ..Default::default()
        };
        assert_eq!(lp.locked_percentage(), 0.0);
    }

    #[test]
    fn test_sanitize_clamps_negative_values() {
        let target = PoolTarget {
            pool: "p".into(),
            token_mint: "t".into(),
            base_mint: "b".into(),
            lp_mint: None,
            token_vault: None,
            base_vault: None,
            creator: None,
        };
        let mut pool = PoolInfo::empty(&target);
        pool.liquidity.usd_value = -5.0;
        pool.lp.total_supply = 100.0;
        pool.lp.locked_amount = 150.0;
        pool.creator.percentage = f64::NAN;
        pool.sanitize();

        assert_eq!(pool.liquidity.usd_value, 0.0);
        assert_eq!(pool.lp.locked_amount, 100.0);
        assert_eq!(pool.creator.percentage, 0.0);
    }

    #[test]
    fn test_warning_kind_serializes_screaming_case() {
        let json = serde_json::to_string(&WarningKind::LowLpLocked).unwrap();
        assert_eq!(json, "\"LOW_LP_LOCKED\"");
    }
}
