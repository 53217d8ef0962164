//! Pipeline events
//!
//! Components push typed events onto a broadcast bus; external consumers
//! (CLI, dashboards) subscribe. Publishing never blocks and never fails when
//! nobody is listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::analysis::{LiquidityAnalysis, LiquidityWarning};
use crate::detector::DetectionResult;
use crate::sniper::TradeRecord;

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Events a slow subscriber may lag behind before it starts missing them
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}

impl EventsConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.channel_capacity == 0 {
            return Err(crate::error::Error::Config(
                "events.channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Operational fault reported by a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Component that failed (detector, liquidity, sniper, ...)
    pub component: String,
    pub message: String,
    /// Mint or pool the failure relates to, when known
    pub subject: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(component: &str, message: impl Into<String>, subject: Option<String>) -> Self {
        Self {
            component: component.to_string(),
            message: message.into(),
            subject,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    Detection(DetectionResult),
    Analysis(LiquidityAnalysis),
    Warning {
        pool: String,
        warning: LiquidityWarning,
    },
    Trade(TradeRecord),
    Error(ErrorEvent),
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Detection(_) => "detection",
            PipelineEvent::Analysis(_) => "analysis",
            PipelineEvent::Warning { .. } => "warning",
            PipelineEvent::Trade(_) => "trade",
            PipelineEvent::Error(_) => "error",
        }
    }
}

/// Cloneable handle to the broadcast channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: PipelineEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            trace!(kind, "No event subscribers");
        }
    }

    pub fn error(&self, component: &str, message: impl Into<String>, subject: Option<String>) {
        self.publish(PipelineEvent::Error(ErrorEvent::new(
            component, message, subject,
        )));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(default_channel_capacity())
    }
}
