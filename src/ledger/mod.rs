//! Ledger access - log subscriptions and account lookups
//!
//! The detector and analyzers only talk to the chain through [`LedgerClient`],
//! so tests can swap in an in-memory ledger and the pipeline stays agnostic
//! of the RPC transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub mod solana;

pub use solana::SolanaLedger;

/// One transaction's worth of program logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    pub signature: String,
    /// Transaction error, if the transaction failed
    pub err: Option<String>,
    pub logs: Vec<String>,
}

/// Decoded SPL mint account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintAccount {
    pub address: String,
    pub decimals: u8,
    pub supply: u64,
    pub is_initialized: bool,
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,
}

/// Account data as far as the pipeline cares about it
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAccount {
    Mint(MintAccount),
    TokenAccount {
        mint: String,
        owner: String,
        amount: u64,
    },
    AmmPool(AmmPool),
    Other {
        owner: String,
    },
}

impl ParsedAccount {
    /// Returns the mint if this account is one
    pub fn into_mint(self) -> Option<MintAccount> {
        match self {
            ParsedAccount::Mint(mint) => Some(mint),
            _ => None,
        }
    }

    pub fn into_amm_pool(self) -> Option<AmmPool> {
        match self {
            ParsedAccount::AmmPool(pool) => Some(pool),
            _ => None,
        }
    }

    /// Raw amount if this is a token account
    pub fn token_amount(&self) -> Option<u64> {
        match self {
            ParsedAccount::TokenAccount { amount, .. } => Some(*amount),
            _ => None,
        }
    }
}

/// Constant-product pool state: both vaults and the LP receipt mint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmmPool {
    pub address: String,
    pub base_mint: String,
    pub quote_mint: String,
    pub base_vault: String,
    pub quote_vault: String,
    pub lp_mint: String,
}

impl AmmPool {
    /// Vaults as (token side, other side) for `token_mint`
    pub fn vaults_for(&self, token_mint: &str) -> Option<(String, String)> {
        if self.base_mint == token_mint {
            Some((self.base_vault.clone(), self.quote_vault.clone()))
        } else if self.quote_mint == token_mint {
            Some((self.quote_vault.clone(), self.base_vault.clone()))
        } else {
            None
        }
    }

    /// Mint paired against `token_mint`
    pub fn counter_mint(&self, token_mint: &str) -> Option<&str> {
        if self.base_mint == token_mint {
            Some(&self.quote_mint)
        } else if self.quote_mint == token_mint {
            Some(&self.base_mint)
        } else {
            None
        }
    }
}

/// Entry from an address's signature history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    /// Unix seconds, when the node knows it
    pub block_time: Option<i64>,
    pub failed: bool,
}

/// Token balance held by one owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderBalance {
    pub owner: String,
    pub token_account: String,
    pub amount: u64,
}

/// Handle used to tear a log subscription down
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Handle with no forwarding task behind it (in-memory ledgers)
    pub fn detached(cancel: CancellationToken) -> Self {
        Self { cancel, task: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the subscription and wait for the forwarding task to exit
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Log forwarding task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Live log subscription: batches arrive on `receiver` until the handle is
/// unsubscribed or the upstream stream ends.
pub struct LogSubscription {
    pub receiver: mpsc::Receiver<LogBatch>,
    pub handle: SubscriptionHandle,
}

/// Chain access used by the pipeline
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Subscribe to logs of transactions that mention `program_id`
    async fn subscribe_logs(&self, program_id: &str) -> Result<LogSubscription>;

    /// Fetch and decode an account. `Ok(None)` when the account does not exist
    /// or the address is not a valid public key.
    async fn get_parsed_account_info(&self, address: &str) -> Result<Option<ParsedAccount>>;

    /// Most recent signatures for an address, newest first
    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>>;

    /// Largest holders of a mint, resolved to their owners, largest first
    async fn get_token_holders(&self, mint: &str, limit: usize) -> Result<Vec<HolderBalance>>;

    /// Raw token amount `owner` holds of `mint` across all its token accounts
    async fn get_token_balance(&self, owner: &str, mint: &str) -> Result<u64>;

    /// Raw total supply of a mint
    async fn get_token_supply(&self, mint: &str) -> Result<u64>;

    /// Cheap liveness check
    async fn health_check(&self) -> Result<()>;
}
