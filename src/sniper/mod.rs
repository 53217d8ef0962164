//! Entry gating, execution hand-off and resilience

pub mod executor;
pub mod exposure;
pub mod gate;
pub mod metrics;
pub mod orchestrator;
pub mod resilience;
pub mod safety;

pub use executor::{DryRunExecutor, ExecutionReport, ExecutionStatus, TradeExecutor};
pub use exposure::{ExposureTracker, Reservation};
pub use gate::{EntryDecision, EntryGate, RejectReason, RiskParameters};
pub use metrics::{PerformanceMetrics, TradeHistory, TradeRecord};
pub use orchestrator::{Sniper, SniperParts, SystemStatus};
pub use resilience::{ResilienceConfig, ResilienceGovernor, ResilienceSnapshot};
pub use safety::{check_safety, MintPrivileges};
