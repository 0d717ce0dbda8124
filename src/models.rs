//! Domain entities shared across modules (§3).

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key identifying a single open commitment: the contract enforces at most
/// one open bet per `(roomId, player)` pair.
pub type BetKey = (u32, Address);

/// A commitment awaiting its reveal block (§3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBet {
    pub room_id: u32,
    pub player: Address,
    pub amount_wei: u128,
    pub bet_big: bool,
    pub commit_block: u64,
    pub reveal_block: u64,
    pub tx_hash: H256,
    pub observed_at: DateTime<Utc>,
}

impl PendingBet {
    pub fn key(&self) -> BetKey {
        (self.room_id, self.player)
    }

    pub fn is_due(&self, current_block: u64) -> bool {
        current_block >= self.reveal_block
    }
}

/// Discriminator for `EventRecord` (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BetPlaced,
    BetSettled,
}

/// Durable record of a decoded on-chain event, persisted by the Event
/// Store (§3.2, §4.F). `BetPlaced`-only and `BetSettled`-only fields are
/// `Option` because the store holds both kinds in one shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub event_type: EventType,
    pub room_id: u32,
    pub player: Address,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub log_index: u64,
    pub transaction_hash: H256,
    pub created_at: DateTime<Utc>,

    // BetPlaced-only
    pub amount_wei: Option<u128>,
    pub bet_big: Option<bool>,
    pub commit_block: Option<u64>,
    pub reveal_block: Option<u64>,

    // BetSettled-only
    pub reward_amount_wei: Option<u128>,
    pub won: Option<bool>,
    pub hash_value: Option<u8>,
    pub block_hash: Option<H256>,
    pub result_block: Option<u64>,
    pub bet_id: Option<u128>,

    // Linking
    pub related_event_id: Option<Uuid>,
    pub processed: bool,
}

impl EventRecord {
    /// `hashValue >= 5` is "big" per spec.md §9; the alternate `> 49`
    /// threshold observed elsewhere in the source is treated as a bug and
    /// not implemented here.
    pub fn is_big_from_hash(hash_value: u8) -> bool {
        hash_value >= 5
    }
}

/// A query against the Event Store, used by `find`/`count` (§4.F). Only the
/// filters this service actually needs are modeled; the richer query
/// surface used by the external read API is out of scope.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_type: Option<EventType>,
    pub room_id: Option<u32>,
    pub player: Option<Address>,
    pub processed: Option<bool>,
}
