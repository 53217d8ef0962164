//! Trade execution seam
//!
//! Settlement lives outside this crate. The orchestrator hands accepted
//! decisions to a [`TradeExecutor`] and records whatever comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::gate::EntryDecision;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Submitted,
    Confirmed,
    Failed,
    Simulated,
}

impl ExecutionStatus {
    pub fn is_filled(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Submitted | ExecutionStatus::Confirmed | ExecutionStatus::Simulated
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub tx_hash: Option<String>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

impl ExecutionReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            tx_hash: None,
            status: ExecutionStatus::Failed,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait TradeExecutor: Send + Sync {
    /// Execute an enterable decision. `Err` is an operational fault;
    /// a rejected trade is an `Ok` report with status `Failed`.
    async fn execute(&self, decision: &EntryDecision) -> Result<ExecutionReport>;
}

/// Logs the decision and returns a synthetic transaction id
#[derive(Debug, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl TradeExecutor for DryRunExecutor {
    async fn execute(&self, decision: &EntryDecision) -> Result<ExecutionReport> {
        let tx_hash = format!("dry-run-{}", Uuid::new_v4());
        info!(
            mint = %decision.candidate.mint,
            size = decision.position_size,
            tx = %tx_hash,
            "[DRY RUN] Would enter position"
        );
        Ok(ExecutionReport {
            tx_hash: Some(tx_hash),
            status: ExecutionStatus::Simulated,
            error: None,
        })
    }
}
