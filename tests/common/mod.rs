use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dice_settler::chain::{BlockHeader, ChainTransport, EventStream, HeaderStream, Receipt};
use dice_settler::error::TransportError;
use ethers::types::{Address, H256, U256};

/// Scripted result for the next `settleBet` call.
pub enum SettleOutcome {
    Success,
    Error(&'static str),
}

/// In-memory stand-in for the Chain Transport (§4.A), driven entirely by
/// the test: block height is set explicitly, `settleBet` outcomes are
/// queued, and every call is recorded for assertions.
pub struct FakeTransport {
    block: AtomicU64,
    signer: Address,
    settle_calls: Mutex<Vec<(u32, Address)>>,
    settle_outcomes: Mutex<VecDeque<SettleOutcome>>,
}

impl FakeTransport {
    pub fn new(block: u64) -> Self {
        Self {
            block: AtomicU64::new(block),
            signer: Address::repeat_byte(0xAA),
            settle_calls: Mutex::new(Vec::new()),
            settle_outcomes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_block(&self, n: u64) {
        self.block.store(n, Ordering::Relaxed);
    }

    pub fn queue_outcome(&self, outcome: SettleOutcome) {
        self.settle_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn settle_call_count(&self) -> usize {
        self.settle_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainTransport for FakeTransport {
    async fn block_number(&self) -> Result<u64, TransportError> {
        Ok(self.block.load(Ordering::Relaxed))
    }

    async fn get_block(&self, number: u64) -> Result<BlockHeader, TransportError> {
        Ok(BlockHeader {
            number,
            timestamp: 1_700_000_000 + number,
            hash: H256::repeat_byte((number % 255) as u8),
        })
    }

    async fn balance_of(&self, _address: Address) -> Result<U256, TransportError> {
        Ok(U256::from(10u64).pow(U256::from(18u64)))
    }

    async fn reveal_delay(&self) -> Result<u64, TransportError> {
        Ok(3)
    }

    async fn send_settle_bet(&self, room_id: u32, player: Address) -> Result<H256, TransportError> {
        self.settle_calls.lock().unwrap().push((room_id, player));
        match self.settle_outcomes.lock().unwrap().pop_front() {
            Some(SettleOutcome::Error(message)) => {
                Err(TransportError::retryable(anyhow::anyhow!(message)))
            }
            Some(SettleOutcome::Success) | None => Ok(H256::repeat_byte(0x42)),
        }
    }

    async fn wait_receipt(&self, _tx_hash: H256) -> Result<Receipt, TransportError> {
        Ok(Receipt { block_number: self.block.load(Ordering::Relaxed), status: true })
    }

    async fn subscribe_logs(&self) -> Result<EventStream, TransportError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn subscribe_new_heads(&self) -> Result<HeaderStream, TransportError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    fn signer_address(&self) -> Address {
        self.signer
    }
}
