//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;

// Re-export component configs
pub use crate::analysis::creator::CreatorConfig;
pub use crate::analysis::liquidity::{LiquidityConfig, SuspiciousChangeConfig};
pub use crate::detector::validation::TokenValidationConfig;
pub use crate::detector::DetectorConfig;
pub use crate::events::EventsConfig;
pub use crate::provider::{HttpProviderConfig, ProvidersConfig};
pub use crate::sniper::gate::RiskParameters;
pub use crate::sniper::resilience::ResilienceConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub validation: TokenValidationConfig,
    #[serde(default)]
    pub creator: CreatorConfig,
    #[serde(default)]
    pub liquidity: LiquidityConfig,
    #[serde(default)]
    pub risk: RiskParameters,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ws_endpoint")]
    pub ws_endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// processed | confirmed | finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,
    /// Give up connecting the log subscription after this long
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Buffered log batches between the socket and the detector
    #[serde(default = "default_log_buffer")]
    pub log_buffer: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            ws_endpoint: default_ws_endpoint(),
            timeout_ms: default_timeout_ms(),
            commitment: default_commitment(),
            connect_timeout_secs: default_connect_timeout_secs(),
            log_buffer: default_log_buffer(),
        }
    }
}

fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_ws_endpoint() -> String {
    std::env::var("RPC_WS_ENDPOINT").unwrap_or_else(|_| "wss://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_commitment() -> String {
    "confirmed".into()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_log_buffer() -> usize {
    1024
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.ws_endpoint", default_ws_endpoint())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (SNIPER__RISK__MAX_POSITION_SIZE=...)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("validation.excluded_creators")
                    .with_list_parse_key("creator.known_scammers")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values. Invalid thresholds abort startup.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.rpc.endpoint)
            .with_context(|| format!("Invalid rpc.endpoint: {}", mask_url(&self.rpc.endpoint)))?;
        url::Url::parse(&self.rpc.ws_endpoint).with_context(|| {
            format!("Invalid rpc.ws_endpoint: {}", mask_url(&self.rpc.ws_endpoint))
        })?;

        if self.rpc.timeout_ms == 0 {
            anyhow::bail!("rpc.timeout_ms must be positive");
        }

        if !matches!(
            self.rpc.commitment.as_str(),
            "processed" | "confirmed" | "finalized"
        ) {
            anyhow::bail!(
                "rpc.commitment must be processed, confirmed or finalized (got {})",
                self.rpc.commitment
            );
        }

        if self.rpc.log_buffer == 0 {
            anyhow::bail!("rpc.log_buffer must be positive");
        }

        self.detector.validate()?;
        self.validation.validate()?;
        self.creator.validate()?;
        self.liquidity.validate()?;
        self.risk.validate()?;
        self.resilience.validate()?;
        self.providers.validate()?;
        self.events.validate()?;

        Ok(())
    }

    /// Get a display-safe version of config (masks sensitive data)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    ws_endpoint: {}
    timeout: {}ms
    commitment: {}
  Detector:
    program_id: {}
    init_markers: {:?}
  Validation:
    decimals: {}..={}
    required_metadata: {:?}
    excluded_creators: {}
  Creator:
    known_scammers: {}
    scammer_file: {}
  Liquidity:
    min_liquidity: ${}
    min_lp_locked: {}%
    max_creator_tokens: {}%
    poll_interval: {}ms
    monitor_duration: {}s
    max_holders: {}
  Risk:
    max_position_size: {}
    max_daily_exposure: {}
    min_creator_score: {}
    min_liquidity_confidence: {}
    max_risk_score: {}
  Resilience:
    error_threshold: {}
    error_window: {}s
    latency_ceiling: {}ms
  Providers:
    dexscreener: enabled={} base_url={} api_key={}
    jupiter: enabled={} base_url={} api_key={}
"#,
            mask_url(&self.rpc.endpoint),
            mask_url(&self.rpc.ws_endpoint),
            self.rpc.timeout_ms,
            self.rpc.commitment,
            self.detector.program_id,
            self.detector.init_markers,
            self.validation.min_decimals,
            self.validation.max_decimals,
            self.validation.required_metadata,
            self.validation.excluded_creators.len(),
            self.creator.known_scammers.len(),
            self.creator
                .scammer_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".into()),
            self.liquidity.min_liquidity_usd,
            self.liquidity.min_lp_locked_pct,
            self.liquidity.max_creator_pct,
            self.liquidity.poll_interval_ms,
            self.liquidity.monitor_duration_secs,
            self.liquidity.max_holders,
            self.risk.max_position_size,
            self.risk.max_daily_exposure,
            self.risk.min_creator_score,
            self.risk.min_liquidity_confidence,
            self.risk.max_risk_score,
            self.resilience.error_threshold,
            self.resilience.error_window_secs,
            self.resilience.latency_ceiling_ms,
            self.providers.dexscreener.enabled,
            self.providers
                .dexscreener
                .base_url
                .as_deref()
                .map(mask_url)
                .unwrap_or_else(|| "(default)".into()),
            mask_key(self.providers.dexscreener.api_key.as_deref()),
            self.providers.jupiter.enabled,
            self.providers
                .jupiter
                .base_url
                .as_deref()
                .map(mask_url)
                .unwrap_or_else(|| "(default)".into()),
            mask_key(self.providers.jupiter.api_key.as_deref()),
        )
    }
}

/// Parse a base58 address, naming the offending config key on failure
pub(crate) fn parse_address(key: &str, value: &str) -> crate::error::Result<Pubkey> {
    Pubkey::from_str(value).map_err(|_| {
        crate::error::Error::Config(format!("{} is not a valid address: {}", key, value))
    })
}

fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

fn mask_key(key: Option<&str>) -> &'static str {
    match key {
        Some(k) if !k.is_empty() => "***",
        _ => "(not set)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resilience.error_threshold, 5);
        assert_eq!(config.resilience.latency_ceiling_ms, 500);
        assert_eq!(config.validation.max_decimals, 9);
    }

    #[test]
    fn test_inverted_decimal_bounds_fail_fast() {
        let mut config = Config::default();
        config.validation.min_decimals = 9;
        config.validation.max_decimals = 6;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_decimals"));
    }

    #[test]
    fn test_bad_commitment_rejected() {
        let mut config = Config::default();
        config.rpc.commitment = "eventual".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[validation]
min_decimals = 2
max_decimals = 8

[risk]
max_position_size = 2.5

[resilience]
error_threshold = 3
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.validation.min_decimals, 2);
        assert_eq!(config.validation.max_decimals, 8);
        assert_eq!(config.risk.max_position_size, 2.5);
        assert_eq!(config.resilience.error_threshold, 3);
        // Untouched sections keep their defaults
        assert_eq!(config.liquidity.min_lp_locked_pct, 80.0);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[liquidity]\nmin_lp_locked_pct = 140.0").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://rpc.example.com?api-key=secret"),
            "https://rpc.example.com?***"
        );
        assert_eq!(mask_url("https://rpc.example.com"), "https://rpc.example.com");
    }

    #[test]
    fn test_masked_display_hides_keys() {
        let mut config = Config::default();
        config.providers.jupiter.api_key = Some("super-secret".into());
        let shown = config.masked_display();
        assert!(!shown.contains("super-secret"));
        assert!(shown.contains("***"));
    }
}
