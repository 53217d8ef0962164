//! Solana RPC / pubsub backed ledger client

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use futures::StreamExt;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::program_pack::Pack;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    AmmPool, HolderBalance, LedgerClient, LogBatch, LogSubscription, MintAccount, ParsedAccount,
    SignatureInfo, SubscriptionHandle,
};
use crate::config::RpcConfig;
use crate::error::{Error, Result};

/// Ledger client over the nonblocking RPC and pubsub clients
pub struct SolanaLedger {
    rpc: Arc<RpcClient>,
    ws_endpoint: String,
    commitment: CommitmentConfig,
    connect_timeout: Duration,
    log_buffer: usize,
}

impl SolanaLedger {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let commitment = parse_commitment(&config.commitment)?;
        let rpc = RpcClient::new_with_timeout_and_commitment(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
            commitment,
        );

        Ok(Self {
            rpc: Arc::new(rpc),
            ws_endpoint: config.ws_endpoint.clone(),
            commitment,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            log_buffer: config.log_buffer,
        })
    }

    /// Connect the pubsub socket, retrying with backoff until the connect timeout
    async fn connect(&self) -> Result<PubsubClient> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(4),
            max_elapsed_time: Some(self.connect_timeout),
            ..Default::default()
        };

        let url = self.ws_endpoint.as_str();
        retry(backoff, || async move {
            PubsubClient::new(url).await.map_err(|e| {
                warn!("Pubsub connect failed, retrying: {}", e);
                backoff::Error::transient(Error::from(e))
            })
        })
        .await
    }
}

#[async_trait]
impl LedgerClient for SolanaLedger {
    async fn subscribe_logs(&self, program_id: &str) -> Result<LogSubscription> {
        let program = parse_pubkey(program_id)?;
        let client = self.connect().await?;

        let (tx, rx) = mpsc::channel(self.log_buffer);
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(forward_logs(
            client,
            program,
            self.commitment,
            tx,
            cancel.clone(),
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => {
                info!(program = %program, "Log subscription established");
                Ok(LogSubscription {
                    receiver: rx,
                    handle: SubscriptionHandle::new(cancel, task),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Subscription(
                "log forwarding task exited before subscribing".into(),
            )),
        }
    }

    async fn get_parsed_account_info(&self, address: &str) -> Result<Option<ParsedAccount>> {
        let Ok(pubkey) = Pubkey::from_str(address) else {
            return Ok(None);
        };

        let response = self
            .rpc
            .get_account_with_commitment(&pubkey, self.commitment)
            .await?;

        Ok(response
            .value
            .map(|account| parse_account(address, &account.owner, &account.data)))
    }

    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        let pubkey = parse_pubkey(address)?;
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };

        let records = self
            .rpc
            .get_signatures_for_address_with_config(&pubkey, config)
            .await?;

        Ok(records
            .into_iter()
            .map(|r| SignatureInfo {
                signature: r.signature,
                slot: r.slot,
                block_time: r.block_time,
                failed: r.err.is_some(),
            })
            .collect())
    }

    async fn get_token_holders(&self, mint: &str, limit: usize) -> Result<Vec<HolderBalance>> {
        let mint = parse_pubkey(mint)?;

        // The node caps this at 20 accounts
        let largest = self.rpc.get_token_largest_accounts(&mint).await?;
        let addresses: Vec<Pubkey> = largest
            .iter()
            .take(limit)
            .filter_map(|b| Pubkey::from_str(&b.address).ok())
            .collect();

        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let accounts = self.rpc.get_multiple_accounts(&addresses).await?;

        let mut holders = Vec::with_capacity(addresses.len());
        for (address, account) in addresses.iter().zip(accounts) {
            let Some(account) = account else { continue };
            if let ParsedAccount::TokenAccount { owner, amount, .. } =
                parse_account(&address.to_string(), &account.owner, &account.data)
            {
                holders.push(HolderBalance {
                    owner,
                    token_account: address.to_string(),
                    amount,
                });
            }
        }

        holders.sort_by(|a, b| b.amount.cmp(&a.amount));
        Ok(holders)
    }

    async fn get_token_balance(&self, owner: &str, mint: &str) -> Result<u64> {
        let owner = parse_pubkey(owner)?;
        let mint = parse_pubkey(mint)?;

        let accounts = self
            .rpc
            .get_token_accounts_by_owner(&owner, TokenAccountsFilter::Mint(mint))
            .await?;

        let mut total: u64 = 0;
        for keyed in accounts {
            match &keyed.account.data {
                UiAccountData::Json(parsed) => {
                    let amount = parsed.parsed["info"]["tokenAmount"]["amount"]
                        .as_str()
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(0);
                    total = total.saturating_add(amount);
                }
                _ => debug!(account = %keyed.pubkey, "Skipping non-json token account"),
            }
        }

        Ok(total)
    }

    async fn get_token_supply(&self, mint: &str) -> Result<u64> {
        let mint = parse_pubkey(mint)?;
        let supply = self.rpc.get_token_supply(&mint).await?;
        supply
            .amount
            .parse::<u64>()
            .map_err(|e| Error::Deserialization(format!("token supply: {}", e)))
    }

    async fn health_check(&self) -> Result<()> {
        self.rpc.get_slot().await?;
        Ok(())
    }
}

/// Pump logs from the pubsub stream into `tx` until cancelled or closed
async fn forward_logs(
    client: PubsubClient,
    program: Pubkey,
    commitment: CommitmentConfig,
    tx: mpsc::Sender<LogBatch>,
    cancel: CancellationToken,
    ready: oneshot::Sender<Result<()>>,
) {
    let filter = RpcTransactionLogsFilter::Mentions(vec![program.to_string()]);
    let config = RpcTransactionLogsConfig {
        commitment: Some(commitment),
    };

    let (mut stream, unsubscribe) = match client.logs_subscribe(filter, config).await {
        Ok(subscription) => {
            let _ = ready.send(Ok(()));
            subscription
        }
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };

        let Some(response) = item else {
            warn!(program = %program, "Log stream closed by server");
            break;
        };

        let value = response.value;
        let batch = LogBatch {
            signature: value.signature,
            err: value.err.map(|e| e.to_string()),
            logs: value.logs,
        };

        // Never block teardown on a full channel
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(batch) => sent,
        };
        if sent.is_err() {
            break;
        }
    }

    unsubscribe().await;
    drop(stream);
    if let Err(e) = client.shutdown().await {
        debug!("Pubsub shutdown error: {}", e);
    }
    debug!(program = %program, "Log forwarding stopped");
}

pub const RAYDIUM_AMM_V4: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// Raydium AMM v4 `AmmInfo` size and pubkey offsets
const AMM_V4_LEN: usize = 752;
const AMM_V4_BASE_VAULT: usize = 336;
const AMM_V4_QUOTE_VAULT: usize = 368;
const AMM_V4_BASE_MINT: usize = 400;
const AMM_V4_QUOTE_MINT: usize = 432;
const AMM_V4_LP_MINT: usize = 464;

fn pubkey_at(data: &[u8], offset: usize) -> Option<String> {
    let bytes: [u8; 32] = data.get(offset..offset + 32)?.try_into().ok()?;
    Some(Pubkey::new_from_array(bytes).to_string())
}

/// Decode a Raydium AMM v4 pool account
pub fn parse_amm_pool(address: &str, data: &[u8]) -> Option<AmmPool> {
    if data.len() != AMM_V4_LEN {
        return None;
    }
    Some(AmmPool {
        address: address.to_string(),
        base_vault: pubkey_at(data, AMM_V4_BASE_VAULT)?,
        quote_vault: pubkey_at(data, AMM_V4_QUOTE_VAULT)?,
        base_mint: pubkey_at(data, AMM_V4_BASE_MINT)?,
        quote_mint: pubkey_at(data, AMM_V4_QUOTE_MINT)?,
        lp_mint: pubkey_at(data, AMM_V4_LP_MINT)?,
    })
}

/// Decode raw account data owned by the token program or a known AMM
pub fn parse_account(address: &str, owner: &Pubkey, data: &[u8]) -> ParsedAccount {
    if owner.to_string() == RAYDIUM_AMM_V4 {
        if let Some(pool) = parse_amm_pool(address, data) {
            return ParsedAccount::AmmPool(pool);
        }
    }
    if *owner != spl_token::id() {
        return ParsedAccount::Other {
            owner: owner.to_string(),
        };
    }

    if data.len() == spl_token::state::Mint::LEN {
        if let Ok(mint) = spl_token::state::Mint::unpack(data) {
            let mint_authority: Option<Pubkey> = mint.mint_authority.into();
            let freeze_authority: Option<Pubkey> = mint.freeze_authority.into();
            return ParsedAccount::Mint(MintAccount {
                address: address.to_string(),
                decimals: mint.decimals,
                supply: mint.supply,
                is_initialized: mint.is_initialized,
                mint_authority: mint_authority.map(|k| k.to_string()),
                freeze_authority: freeze_authority.map(|k| k.to_string()),
            });
        }
    } else if data.len() == spl_token::state::Account::LEN {
        if let Ok(account) = spl_token::state::Account::unpack(data) {
            return ParsedAccount::TokenAccount {
                mint: account.mint.to_string(),
                owner: account.owner.to_string(),
                amount: account.amount,
            };
        }
    }

    ParsedAccount::Other {
        owner: owner.to_string(),
    }
}

fn parse_pubkey(address: &str) -> Result<Pubkey> {
    Pubkey::from_str(address).map_err(|_| Error::InvalidAddress(address.to_string()))
}

fn parse_commitment(level: &str) -> Result<CommitmentConfig> {
    match level {
        "processed" => Ok(CommitmentConfig::processed()),
        "confirmed" => Ok(CommitmentConfig::confirmed()),
        "finalized" => Ok(CommitmentConfig::finalized()),
        other => Err(Error::Config(format!("unknown commitment level: {}", other))),
    }
}
