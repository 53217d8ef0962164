//! Entry gate
//!
//! Combines detection, creator and liquidity results against the configured
//! risk parameters and sizes the position. Each check returns the first veto
//! it finds so the orchestrator can stop before running later stages.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::exposure::{ExposureTracker, Reservation};
use super::safety::check_safety;
use crate::analysis::{CreatorScore, LiquidityAnalysis, WarningKind};
use crate::detector::{DetectionResult, TokenCandidate};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct RiskParameters {
    /// Largest single position, in SOL
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_max_daily_exposure")]
    pub max_daily_exposure: f64,
    #[serde(default = "default_min_creator_score")]
    pub min_creator_score: f64,
    #[serde(default = "default_min_liquidity_confidence")]
    pub min_liquidity_confidence: f64,
    #[serde(default = "default_max_risk_score")]
    pub max_risk_score: f64,
    /// Refuse mints whose supply can still be inflated
    #[serde(default)]
    pub reject_mint_authority: bool,
}

fn default_max_position_size() -> f64 {
    1.0
}

fn default_max_daily_exposure() -> f64 {
    5.0
}

fn default_min_creator_score() -> f64 {
    0.5
}

fn default_min_liquidity_confidence() -> f64 {
    0.6
}

fn default_max_risk_score() -> f64 {
    0.5
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            max_daily_exposure: default_max_daily_exposure(),
            min_creator_score: default_min_creator_score(),
            min_liquidity_confidence: default_min_liquidity_confidence(),
            max_risk_score: default_max_risk_score(),
            reject_mint_authority: false,
        }
    }
}

impl RiskParameters {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_position_size > 0.0) || !(self.max_daily_exposure > 0.0) {
            return Err(Error::Config(
                "risk.max_position_size and risk.max_daily_exposure must be positive".into(),
            ));
        }
        if self.max_position_size > self.max_daily_exposure {
            return Err(Error::Config(format!(
                "risk.max_position_size ({}) exceeds risk.max_daily_exposure ({})",
                self.max_position_size, self.max_daily_exposure
            )));
        }
        for (key, value) in [
            ("risk.min_creator_score", self.min_creator_score),
            ("risk.min_liquidity_confidence", self.min_liquidity_confidence),
            ("risk.max_risk_score", self.max_risk_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be between 0 and 1 (got {})",
                    key, value
                )));
            }
        }
        Ok(())
    }
}

/// Why a candidate was not entered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    IncompleteDetection(f64),
    FailedSafetyCheck(String),
    Honeypot,
    MintAuthorityActive,
    KnownScammer,
    ScamConnections,
    LowCreatorScore(f64),
    NoPool,
    InsufficientLiquidity,
    LpRemoval,
    LowLiquidityConfidence(f64),
    HighRisk(f64),
    ExposureExhausted,
}

impl RejectReason {
    /// Vetoes that no score can override
    pub fn is_hard_veto(&self) -> bool {
        matches!(
            self,
            RejectReason::FailedSafetyCheck(_)
                | RejectReason::Honeypot
                | RejectReason::MintAuthorityActive
                | RejectReason::KnownScammer
                | RejectReason::NoPool
                | RejectReason::InsufficientLiquidity
                | RejectReason::LpRemoval
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::IncompleteDetection(c) => {
                write!(f, "detection confidence {:.2} below 1.0", c)
            }
            RejectReason::FailedSafetyCheck(check) => write!(f, "failed safety check {}", check),
            RejectReason::Honeypot => f.write_str("freeze authority active (honeypot)"),
            RejectReason::MintAuthorityActive => f.write_str("mint authority active"),
            RejectReason::KnownScammer => f.write_str("creator is a known scammer"),
            RejectReason::ScamConnections => f.write_str("creator linked to known scammers"),
            RejectReason::LowCreatorScore(s) => write!(f, "creator score {:.2} too low", s),
            RejectReason::NoPool => f.write_str("no liquidity pool found"),
            RejectReason::InsufficientLiquidity => f.write_str("insufficient liquidity"),
            RejectReason::LpRemoval => f.write_str("LP being removed"),
            RejectReason::LowLiquidityConfidence(c) => {
                write!(f, "liquidity confidence {:.2} too low", c)
            }
            RejectReason::HighRisk(r) => write!(f, "liquidity risk {:.2} too high", r),
            RejectReason::ExposureExhausted => f.write_str("daily exposure exhausted"),
        }
    }
}

/// Terminal artifact of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDecision {
    pub candidate: TokenCandidate,
    pub is_enterable: bool,
    pub position_size: f64,
    pub detection_confidence: f64,
    pub creator_score: Option<f64>,
    pub liquidity_confidence: Option<f64>,
    pub liquidity_risk: Option<f64>,
    pub pool: Option<String>,
    pub reject_reason: Option<RejectReason>,
    /// Budget held for an enterable decision until it executes or is released
    #[serde(default)]
    pub reservation: Option<Reservation>,
    pub decided_at: DateTime<Utc>,
}

impl EntryDecision {
    pub fn reject(
        detection: &DetectionResult,
        creator: Option<&CreatorScore>,
        liquidity: Option<&LiquidityAnalysis>,
        reason: RejectReason,
    ) -> Self {
        debug!(mint = %detection.candidate.mint, reason = %reason, "Candidate rejected");
        Self {
            is_enterable: false,
            position_size: 0.0,
            reject_reason: Some(reason),
            ..Self::scored(detection, creator, liquidity)
        }
    }

    fn scored(
        detection: &DetectionResult,
        creator: Option<&CreatorScore>,
        liquidity: Option<&LiquidityAnalysis>,
    ) -> Self {
        Self {
            candidate: detection.candidate.clone(),
            is_enterable: false,
            position_size: 0.0,
            detection_confidence: detection.confidence,
            creator_score: creator.map(|c| c.overall),
            liquidity_confidence: liquidity.map(|l| l.confidence),
            liquidity_risk: liquidity.map(|l| l.risk_score),
            pool: liquidity.map(|l| l.pool.pool_address.clone()),
            reject_reason: None,
            reservation: None,
            decided_at: Utc::now(),
        }
    }
}

pub struct EntryGate {
    params: RiskParameters,
    exposure: Arc<ExposureTracker>,
}

impl EntryGate {
    pub fn new(params: RiskParameters) -> Result<Self> {
        params.validate()?;
        let exposure = Arc::new(ExposureTracker::new(params.max_daily_exposure));
        Ok(Self { params, exposure })
    }

    pub fn params(&self) -> &RiskParameters {
        &self.params
    }

    pub fn exposure(&self) -> &Arc<ExposureTracker> {
        &self.exposure
    }

    /// Structural and mint-level checks
    pub fn check_detection(&self, detection: &DetectionResult) -> Option<RejectReason> {
        if let Some(reason) = check_safety(detection, self.params.reject_mint_authority) {
            return Some(reason);
        }
        if detection.confidence < 1.0 {
            return Some(RejectReason::IncompleteDetection(detection.confidence));
        }
        None
    }

    /// Creator checks. A known scammer is vetoed regardless of score.
    pub fn check_creator(&self, creator: &CreatorScore) -> Option<RejectReason> {
        if creator.risk.is_known_scammer {
            return Some(RejectReason::KnownScammer);
        }
        if creator.risk.has_scam_connections {
            return Some(RejectReason::ScamConnections);
        }
        if creator.overall < self.params.min_creator_score {
            return Some(RejectReason::LowCreatorScore(creator.overall));
        }
        None
    }

    pub fn check_liquidity(&self, liquidity: &LiquidityAnalysis) -> Option<RejectReason> {
        if liquidity.has_warning(WarningKind::LowLiquidity) {
            return Some(RejectReason::InsufficientLiquidity);
        }
        if liquidity.has_warning(WarningKind::SuspiciousLpRemoval) {
            return Some(RejectReason::LpRemoval);
        }
        if liquidity.confidence < self.params.min_liquidity_confidence {
            return Some(RejectReason::LowLiquidityConfidence(liquidity.confidence));
        }
        if liquidity.risk_score > self.params.max_risk_score {
            return Some(RejectReason::HighRisk(liquidity.risk_score));
        }
        None
    }

    /// Full evaluation. On acceptance the position size is reserved against
    /// the daily budget; release it with [`ExposureTracker::release`] if the
    /// trade does not go through.
    pub async fn evaluate(
        &self,
        detection: &DetectionResult,
        creator: &CreatorScore,
        liquidity: &LiquidityAnalysis,
    ) -> EntryDecision {
        let reason = self
            .check_detection(detection)
            .or_else(|| self.check_creator(creator))
            .or_else(|| self.check_liquidity(liquidity));
        if let Some(reason) = reason {
            return EntryDecision::reject(detection, Some(creator), Some(liquidity), reason);
        }

        let max_size = self.params.max_position_size * liquidity.confidence.clamp(0.0, 1.0);
        let reserved = self
            .exposure
            .reserve_with(|remaining| max_size.min(remaining))
            .await;

        match reserved {
            Some(reservation) => {
                info!(
                    mint = %detection.candidate.mint,
                    size = reservation.amount,
                    creator_score = creator.overall,
                    liquidity_confidence = liquidity.confidence,
                    "Candidate enterable"
                );
                EntryDecision {
                    is_enterable: true,
                    position_size: reservation.amount,
                    reservation: Some(reservation),
                    ..EntryDecision::scored(detection, Some(creator), Some(liquidity))
                }
            }
            None => EntryDecision::reject(
                detection,
                Some(creator),
                Some(liquidity),
                RejectReason::ExposureExhausted,
            ),
        }
    }
}
