//! Token Sniper Library
//!
//! Watches the SPL token program for new mints, scores each candidate's
//! creator and liquidity pool, and gates entries behind a circuit breaker.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod ledger;
pub mod provider;
pub mod sniper;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventBus, PipelineEvent};
pub use sniper::Sniper;
