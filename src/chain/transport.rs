//! Chain Transport (§4.A).
//!
//! Two underlying providers: `ws_provider` serves subscriptions only,
//! `rpc` (wrapped with the signing middleware) serves every read and every
//! transaction submission. Reads are never routed through the streaming
//! provider, even when it's healthy, so that reconciler reads and
//! settlement submission keep working during a reconnect window.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, Ws};
use futures::{Stream, StreamExt};

use crate::chain::contract::{BetPlacedFilter, BetSettledFilter, DiceContract};
use crate::config::RPC_CALL_TIMEOUT;
use crate::error::TransportError;

type RpcMiddleware = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Minimal block header shape the service needs (§4.A).
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: u64,
    pub hash: H256,
}

/// Post-inclusion transaction record (§4.A, GLOSSARY "Receipt").
#[derive(Debug, Clone, Copy)]
pub struct Receipt {
    pub block_number: u64,
    pub status: bool,
}

/// A decoded `BetPlaced` or `BetSettled` log, tagged with the raw log
/// metadata the Ingestor needs regardless of which variant it is.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    BetPlaced { event: BetPlacedFilter, meta: LogMeta },
    BetSettled { event: BetSettledFilter, meta: LogMeta },
}

#[derive(Debug, Clone, Copy)]
pub struct LogMeta {
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: H256,
}

impl From<ethers::contract::LogMeta> for LogMeta {
    fn from(meta: ethers::contract::LogMeta) -> Self {
        LogMeta {
            block_number: meta.block_number.as_u64(),
            log_index: meta.log_index.as_u64(),
            transaction_hash: meta.transaction_hash,
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = ChainEvent> + Send>>;
pub type HeaderStream = Pin<Box<dyn Stream<Item = BlockHeader> + Send>>;

/// The Chain Transport interface (§4.A). Every method fails with
/// `TransportError`, which callers interpret to decide whether to retry.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    async fn block_number(&self) -> Result<u64, TransportError>;
    async fn get_block(&self, number: u64) -> Result<BlockHeader, TransportError>;
    async fn balance_of(&self, address: Address) -> Result<U256, TransportError>;
    async fn reveal_delay(&self) -> Result<u64, TransportError>;
    async fn send_settle_bet(&self, room_id: u32, player: Address) -> Result<H256, TransportError>;
    async fn wait_receipt(&self, tx_hash: H256) -> Result<Receipt, TransportError>;

    /// Opens a fresh subscription to `BetPlaced`/`BetSettled` logs on the
    /// target contract. Called by the Supervisor on every `connected`/
    /// `reconnected` transition (§4.C).
    async fn subscribe_logs(&self) -> Result<EventStream, TransportError>;

    /// Opens a fresh subscription to new block headers, used by the
    /// Connection Supervisor purely as a liveness heartbeat (§4.B).
    async fn subscribe_new_heads(&self) -> Result<HeaderStream, TransportError>;

    /// The account this transport signs settlement transactions with.
    fn signer_address(&self) -> Address;
}

/// `ethers`-backed implementation of the Chain Transport.
pub struct EthersTransport {
    rpc_contract: Arc<DiceContract<RpcMiddleware>>,
    rpc_client: Arc<RpcMiddleware>,
    ws_provider: Arc<Provider<Ws>>,
    contract_address: Address,
    signer_address: Address,
}

impl EthersTransport {
    pub async fn connect(
        rpc_url: &str,
        rpc_wss_url: &str,
        contract_address: Address,
        wallet: LocalWallet,
    ) -> anyhow::Result<Self> {
        let http = Provider::<Http>::try_from(rpc_url)?;
        let chain_id = http.get_chainid().await?.as_u64();
        let signer_address = wallet.address();
        let wallet = wallet.with_chain_id(chain_id);

        let rpc_client = Arc::new(SignerMiddleware::new(http, wallet));
        let rpc_contract = Arc::new(DiceContract::new(contract_address, rpc_client.clone()));

        let ws = Ws::connect(rpc_wss_url).await?;
        let ws_provider = Arc::new(Provider::new(ws));

        Ok(Self { rpc_contract, rpc_client, ws_provider, contract_address, signer_address })
    }

    async fn with_timeout<T>(
        fut: impl std::future::Future<Output = Result<T, anyhow::Error>>,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(RPC_CALL_TIMEOUT, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TransportError::retryable(err)),
            Err(_elapsed) => Err(TransportError::retryable(anyhow::anyhow!("rpc call timed out"))),
        }
    }
}

#[async_trait]
impl ChainTransport for EthersTransport {
    async fn block_number(&self) -> Result<u64, TransportError> {
        let client = self.rpc_client.clone();
        Self::with_timeout(async move {
            let n = client.get_block_number().await?;
            Ok(n.as_u64())
        })
        .await
    }

    async fn get_block(&self, number: u64) -> Result<BlockHeader, TransportError> {
        let client = self.rpc_client.clone();
        Self::with_timeout(async move {
            let block = client
                .get_block(number)
                .await?
                .ok_or_else(|| anyhow::anyhow!("block {number} not found"))?;
            Ok(BlockHeader {
                number,
                timestamp: block.timestamp.as_u64(),
                hash: block.hash.unwrap_or_default(),
            })
        })
        .await
    }

    async fn balance_of(&self, address: Address) -> Result<U256, TransportError> {
        let client = self.rpc_client.clone();
        Self::with_timeout(async move { Ok(client.get_balance(address, None).await?) }).await
    }

    async fn reveal_delay(&self) -> Result<u64, TransportError> {
        let contract = self.rpc_contract.clone();
        Self::with_timeout(async move {
            let delay: u64 = contract.reveal_delay().call().await?;
            Ok(delay)
        })
        .await
    }

    async fn send_settle_bet(&self, room_id: u32, player: Address) -> Result<H256, TransportError> {
        let contract = self.rpc_contract.clone();
        Self::with_timeout(async move {
            let call = contract.settle_bet(room_id, player);
            let pending = call.send().await?;
            Ok(pending.tx_hash())
        })
        .await
    }

    async fn wait_receipt(&self, tx_hash: H256) -> Result<Receipt, TransportError> {
        let client = self.rpc_client.clone();
        Self::with_timeout(async move {
            let receipt = client
                .get_transaction_receipt(tx_hash)
                .await?
                .ok_or_else(|| anyhow::anyhow!("receipt not found for {tx_hash:#x}"))?;
            let status = receipt.status.map(|s| s == U64::from(1)).unwrap_or(false);
            Ok(Receipt {
                block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
                status,
            })
        })
        .await
    }

    async fn subscribe_logs(&self) -> Result<EventStream, TransportError> {
        let contract = DiceContract::new(self.contract_address, self.ws_provider.clone());

        let placed = contract
            .event::<BetPlacedFilter>()
            .from_block(0u64)
            .subscribe_with_meta()
            .await
            .map_err(TransportError::retryable)?
            .filter_map(|item| async move { item.ok() })
            .map(|(event, log)| ChainEvent::BetPlaced { event, meta: log.into() });

        let settled = contract
            .event::<BetSettledFilter>()
            .from_block(0u64)
            .subscribe_with_meta()
            .await
            .map_err(TransportError::retryable)?
            .filter_map(|item| async move { item.ok() })
            .map(|(event, log)| ChainEvent::BetSettled { event, meta: log.into() });

        Ok(Box::pin(futures::stream::select(placed, settled)))
    }

    async fn subscribe_new_heads(&self) -> Result<HeaderStream, TransportError> {
        let stream = self
            .ws_provider
            .subscribe_blocks()
            .await
            .map_err(TransportError::retryable)?
            .map(|block| BlockHeader {
                number: block.number.map(|n| n.as_u64()).unwrap_or_default(),
                timestamp: block.timestamp.as_u64(),
                hash: block.hash.unwrap_or_default(),
            });
        Ok(Box::pin(stream))
    }

    fn signer_address(&self) -> Address {
        self.signer_address
    }
}

pub fn parse_private_key(private_key: &str) -> anyhow::Result<LocalWallet> {
    let trimmed = private_key.trim().trim_start_matches("0x");
    Ok(trimmed.parse::<LocalWallet>()?)
}
