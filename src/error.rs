//! Error types for the sniper pipeline

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a single market data provider.
///
/// Providers never retry on their own; the registry decides whether to fall
/// through to the next provider.
#[derive(Error, Debug, Clone)]
#[error("provider {provider} failed on {operation}: {cause}")]
pub struct ProviderError {
    pub provider: String,
    pub operation: String,
    pub cause: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        operation: impl Into<String>,
        cause: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            cause: cause.into(),
            retryable,
        }
    }

    /// Network or upstream failure worth trying elsewhere
    pub fn transient(
        provider: impl Into<String>,
        operation: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self::new(provider, operation, cause, true)
    }

    /// Malformed payloads and other failures that will not fix themselves
    pub fn permanent(
        provider: impl Into<String>,
        operation: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self::new(provider, operation, cause, false)
    }

    pub fn timeout(provider: impl Into<String>, operation: impl Into<String>, after_ms: u64) -> Self {
        Self::new(
            provider,
            operation,
            format!("timed out after {}ms", after_ms),
            true,
        )
    }
}

/// Main error type for the sniper pipeline
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // RPC / ledger errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("Subscription failed: {0}")]
    Subscription(String),

    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    // Market data errors
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Provider {provider} does not support {operation}")]
    UnsupportedCapability { provider: String, operation: String },

    #[error("All providers exhausted for {operation}: {last}")]
    AllProvidersExhausted {
        operation: String,
        last: Box<ProviderError>,
    },

    #[error("No provider supports {0}")]
    NoCapableProvider(String),

    #[error("Provider registration failed for {provider}: {reason}")]
    ProviderRegistration { provider: String, reason: String },

    // Pipeline errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Pool analysis failed for {pool}: {reason}")]
    PoolAnalysis { pool: String, reason: String },

    #[error("Trade execution failed: {0}")]
    Execution(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Rpc(_) | Error::RpcTimeout(_) | Error::Subscription(_) => true,
            Error::Provider(e) => e.retryable,
            Error::AllProvidersExhausted { last, .. } => last.retryable,
            _ => false,
        }
    }

    /// Check if this error stems from invalid operator input
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::InvalidAddress(_))
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

impl From<solana_client::nonblocking::pubsub_client::PubsubClientError> for Error {
    fn from(e: solana_client::nonblocking::pubsub_client::PubsubClientError) -> Self {
        Error::Subscription(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
