//! Circuit breaker and latency governor
//!
//! Errors are counted in a window that restarts whenever more than
//! `error_window_secs` has passed since the previous error. Reaching
//! `error_threshold` trips the breaker, which stays tripped until [`reset`].
//! A single pipeline run slower than `latency_ceiling_ms` pauses intake until
//! [`resume`].
//!
//! [`reset`]: ResilienceGovernor::reset
//! [`resume`]: ResilienceGovernor::resume

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_error_window_secs")]
    pub error_window_secs: u64,
    #[serde(default = "default_latency_ceiling_ms")]
    pub latency_ceiling_ms: u64,
    /// Latency ring buffer size
    #[serde(default = "default_latency_samples")]
    pub latency_samples: usize,
}

fn default_error_threshold() -> u32 {
    5
}

fn default_error_window_secs() -> u64 {
    300
}

fn default_latency_ceiling_ms() -> u64 {
    500
}

fn default_latency_samples() -> usize {
    100
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            error_window_secs: default_error_window_secs(),
            latency_ceiling_ms: default_latency_ceiling_ms(),
            latency_samples: default_latency_samples(),
        }
    }
}

impl ResilienceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.error_threshold == 0 {
            return Err(Error::Config(
                "resilience.error_threshold must be positive".into(),
            ));
        }
        if self.error_window_secs == 0 {
            return Err(Error::Config(
                "resilience.error_window_secs must be positive".into(),
            ));
        }
        if self.latency_ceiling_ms == 0 {
            return Err(Error::Config(
                "resilience.latency_ceiling_ms must be positive".into(),
            ));
        }
        if self.latency_samples == 0 {
            return Err(Error::Config(
                "resilience.latency_samples must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of the governor
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResilienceSnapshot {
    pub error_count: u32,
    pub total_errors: u64,
    pub last_error: Option<String>,
    pub is_circuit_broken: bool,
    pub is_paused: bool,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct ResilienceState {
    error_count: u32,
    last_error_at: Option<Instant>,
    last_error: Option<String>,
    total_errors: u64,
    successes: u64,
    is_circuit_broken: bool,
    is_paused: bool,
    latencies: VecDeque<f64>,
}

pub struct ResilienceGovernor {
    config: ResilienceConfig,
    state: Mutex<ResilienceState>,
}

impl ResilienceGovernor {
    pub fn new(config: ResilienceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(ResilienceState::default()),
        })
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Count an operational fault. Returns true if this error tripped the breaker.
    pub async fn record_error(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let window = Duration::from_secs(self.config.error_window_secs);
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let expired = state
            .last_error_at
            .map_or(true, |last| now.duration_since(last) > window);
        if expired {
            state.error_count = 0;
        }

        state.error_count += 1;
        state.total_errors += 1;
        state.last_error_at = Some(now);
        state.last_error = Some(message.clone());

        warn!(
            errors = state.error_count,
            threshold = self.config.error_threshold,
            "Pipeline error: {}",
            message
        );

        if !state.is_circuit_broken && state.error_count >= self.config.error_threshold {
            state.is_circuit_broken = true;
            error!(
                errors = state.error_count,
                window_secs = self.config.error_window_secs,
                "Circuit breaker tripped"
            );
            return true;
        }
        false
    }

    /// Record one pipeline run. Returns true if this sample paused intake.
    pub async fn record_latency(&self, latency_ms: f64) -> bool {
        let mut state = self.state.lock().await;
        state.latencies.push_back(latency_ms);
        while state.latencies.len() > self.config.latency_samples {
            state.latencies.pop_front();
        }

        if latency_ms > self.config.latency_ceiling_ms as f64 && !state.is_paused {
            state.is_paused = true;
            warn!(
                latency_ms,
                ceiling_ms = self.config.latency_ceiling_ms,
                "Latency ceiling exceeded, pausing intake"
            );
            return true;
        }
        false
    }

    pub async fn record_success(&self) {
        self.state.lock().await.successes += 1;
    }

    pub async fn is_circuit_broken(&self) -> bool {
        self.state.lock().await.is_circuit_broken
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.is_paused
    }

    /// Whether new candidates may enter the pipeline
    pub async fn accepts_work(&self) -> bool {
        let state = self.state.lock().await;
        !state.is_circuit_broken && !state.is_paused
    }

    /// Clear a latency pause. The breaker is unaffected.
    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        if state.is_paused {
            state.is_paused = false;
            info!("Intake resumed");
        }
    }

    /// Clear everything, including a tripped breaker
    pub async fn reset(&self) {
        *self.state.lock().await = ResilienceState::default();
    }

    pub async fn snapshot(&self) -> ResilienceSnapshot {
        let state = self.state.lock().await;
        let runs = state.successes + state.total_errors;
        ResilienceSnapshot {
            error_count: state.error_count,
            total_errors: state.total_errors,
            last_error: state.last_error.clone(),
            is_circuit_broken: state.is_circuit_broken,
            is_paused: state.is_paused,
            avg_latency_ms: mean(&state.latencies),
            p95_latency_ms: percentile(&state.latencies, 0.95),
            success_rate: if runs == 0 {
                1.0
            } else {
                state.successes as f64 / runs as f64
            },
        }
    }
}

fn mean(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn percentile(samples: &VecDeque<f64>, p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() as f64 * p).ceil() as usize).clamp(1, sorted.len()) - 1;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> ResilienceGovernor {
        ResilienceGovernor::new(ResilienceConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_trips_at_threshold() {
        let gov = governor();
        for i in 0..4 {
            assert!(!gov.record_error(format!("err {}", i)).await);
            tokio::time::advance(Duration::from_secs(10)).await;
        }
        assert!(!gov.is_circuit_broken().await);
        assert!(gov.record_error("err 4").await);
        assert!(gov.is_circuit_broken().await);
        assert!(!gov.accepts_work().await);

        // Further errors do not re-trip
        assert!(!gov.record_error("err 5").await);
        let snap = gov.snapshot().await;
        assert_eq!(snap.last_error.as_deref(), Some("err 5"));
        assert_eq!(snap.total_errors, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spread_errors_never_trip() {
        let gov = governor();
        for _ in 0..10 {
            gov.record_error("slow leak").await;
            tokio::time::advance(Duration::from_secs(301)).await;
        }
        assert!(!gov.is_circuit_broken().await);
        assert_eq!(gov.snapshot().await.error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_does_not_auto_heal() {
        let gov = governor();
        for _ in 0..5 {
            gov.record_error("boom").await;
        }
        tokio::time::advance(Duration::from_secs(3600)).await;
        gov.resume().await;
        assert!(gov.is_circuit_broken().await);

        gov.reset().await;
        assert!(!gov.is_circuit_broken().await);
        assert_eq!(gov.snapshot().await.error_count, 0);
    }

    #[tokio::test]
    async fn test_latency_ceiling_pauses() {
        let gov = governor();
        assert!(!gov.record_latency(400.0).await);
        assert!(!gov.is_paused().await);

        assert!(gov.record_latency(600.0).await);
        assert!(gov.is_paused().await);
        assert!(!gov.accepts_work().await);

        gov.resume().await;
        assert!(gov.accepts_work().await);
    }

    #[tokio::test]
    async fn test_latency_ring_is_bounded() {
        let gov = ResilienceGovernor::new(ResilienceConfig {
            latency_samples: 3,
            ..Default::default()
        })
        .unwrap();
        for ms in [100.0, 100.0, 10.0, 20.0, 30.0] {
            gov.record_latency(ms).await;
        }
        let snap = gov.snapshot().await;
        assert!((snap.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(snap.p95_latency_ms, 30.0);
    }

    #[tokio::test]
    async fn test_success_rate() {
        let gov = governor();
        assert_eq!(gov.snapshot().await.success_rate, 1.0);
        gov.record_success().await;
        gov.record_success().await;
        gov.record_success().await;
        gov.record_error("x").await;
        assert!((gov.snapshot().await.success_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = ResilienceConfig {
            error_threshold: 0,
            ..Default::default()
        };
        assert!(ResilienceGovernor::new(config).is_err());
    }
}
