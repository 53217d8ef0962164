//! Structural validation of token candidates

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::TokenCandidate;
use crate::config::parse_address;
use crate::error::{Error, Result};

pub const CHECK_DECIMALS: &str = "decimals";
pub const CHECK_METADATA: &str = "required_metadata";
pub const CHECK_CREATOR: &str = "creator_not_excluded";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenValidationConfig {
    /// Inclusive lower decimal bound
    #[serde(default)]
    pub min_decimals: u8,
    /// Inclusive upper decimal bound
    #[serde(default = "default_max_decimals")]
    pub max_decimals: u8,
    /// Metadata keys every candidate must carry
    #[serde(default = "default_required_metadata")]
    pub required_metadata: Vec<String>,
    #[serde(default)]
    pub excluded_creators: Vec<String>,
}

impl Default for TokenValidationConfig {
    fn default() -> Self {
        Self {
            min_decimals: 0,
            max_decimals: default_max_decimals(),
            required_metadata: default_required_metadata(),
            excluded_creators: Vec::new(),
        }
    }
}

fn default_max_decimals() -> u8 {
    9
}

fn default_required_metadata() -> Vec<String> {
    vec!["supply".into(), "decimals".into(), "isInitialized".into()]
}

impl TokenValidationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_decimals >= self.max_decimals {
            return Err(Error::Config(format!(
                "validation.min_decimals ({}) must be below validation.max_decimals ({})",
                self.min_decimals, self.max_decimals
            )));
        }
        for creator in &self.excluded_creators {
            parse_address("validation.excluded_creators", creator)?;
        }
        Ok(())
    }
}

/// Result of one structural rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub check: String,
    pub passed: bool,
    pub detail: String,
    /// A failure here vetoes entry outright
    pub safety_critical: bool,
}

impl ValidationOutcome {
    fn new(check: &str, passed: bool, detail: String, safety_critical: bool) -> Self {
        Self {
            check: check.to_string(),
            passed,
            detail,
            safety_critical,
        }
    }
}

/// Runs the fixed rule set against a candidate
pub struct TokenValidator {
    config: TokenValidationConfig,
    excluded: HashSet<String>,
}

impl TokenValidator {
    pub fn new(config: TokenValidationConfig) -> Result<Self> {
        config.validate()?;
        let excluded = config.excluded_creators.iter().cloned().collect();
        Ok(Self { config, excluded })
    }

    /// Outcomes in rule order: decimals, metadata, creator exclusion
    pub fn validate(&self, candidate: &TokenCandidate) -> Vec<ValidationOutcome> {
        vec![
            self.check_decimals(candidate),
            self.check_metadata(candidate),
            self.check_creator(candidate),
        ]
    }

    fn check_decimals(&self, candidate: &TokenCandidate) -> ValidationOutcome {
        let (min, max) = (self.config.min_decimals, self.config.max_decimals);
        let passed = (min..=max).contains(&candidate.decimals);
        let detail = if passed {
            format!("{} decimals within [{}, {}]", candidate.decimals, min, max)
        } else {
            format!("{} decimals outside [{}, {}]", candidate.decimals, min, max)
        };
        ValidationOutcome::new(CHECK_DECIMALS, passed, detail, false)
    }

    fn check_metadata(&self, candidate: &TokenCandidate) -> ValidationOutcome {
        let missing: Vec<&str> = self
            .config
            .required_metadata
            .iter()
            .filter(|key| !candidate.metadata.contains_key(key.as_str()))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            ValidationOutcome::new(
                CHECK_METADATA,
                true,
                "all required metadata present".into(),
                false,
            )
        } else {
            ValidationOutcome::new(
                CHECK_METADATA,
                false,
                format!("missing metadata: {}", missing.join(", ")),
                false,
            )
        }
    }

    fn check_creator(&self, candidate: &TokenCandidate) -> ValidationOutcome {
        if self.excluded.contains(&candidate.creator) {
            ValidationOutcome::new(
                CHECK_CREATOR,
                false,
                format!("creator {} is excluded", candidate.creator),
                true,
            )
        } else {
            ValidationOutcome::new(CHECK_CREATOR, true, "creator not excluded".into(), true)
        }
    }
}

/// passed / total, 0 for an empty rule set
pub fn confidence(outcomes: &[ValidationOutcome]) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let passed = outcomes.iter().filter(|o| o.passed).count();
    passed as f64 / outcomes.len() as f64
}
