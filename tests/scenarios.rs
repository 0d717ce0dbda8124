//! End-to-end seed scenarios (spec.md §8 A–F), driven against `FakeTransport`
//! and `MemoryEventStore` rather than a live chain.

mod common;

use std::sync::Arc;

use common::{FakeTransport, SettleOutcome};
use dice_settler::chain::contract::{BetPlacedFilter, BetSettledFilter};
use dice_settler::chain::{ChainEvent, LogMeta};
use dice_settler::dispatcher::SettlementDispatcher;
use dice_settler::ingestor::EventIngestor;
use dice_settler::models::{EventQuery, EventRecord, EventType, PendingBet};
use dice_settler::reconciler::Reconciler;
use dice_settler::store::{EventStore, MemoryEventStore};
use ethers::types::{Address, H256, U256};

fn meta(block_number: u64, log_index: u64, tx: u8) -> LogMeta {
    LogMeta { block_number, log_index, transaction_hash: H256::repeat_byte(tx) }
}

fn bet_placed_event(room_id: u32, player: Address, reveal_block: u64) -> BetPlacedFilter {
    BetPlacedFilter {
        room_id,
        player,
        amount_wei: U256::from(1_000_000_000_000_000u64),
        bet_big: true,
        commit_block: reveal_block - 3,
        reveal_block,
    }
}

fn bet_settled_event(room_id: u32, player: Address, won: bool, hash_value: u8) -> BetSettledFilter {
    BetSettledFilter {
        room_id,
        player,
        amount_wei: if won { U256::from(2_000_000_000_000_000u64) } else { U256::zero() },
        won,
        hash_value,
        block_hash: [7u8; 32],
        bet_id: U256::from(42u64),
    }
}

/// Scenario A — happy path.
#[tokio::test]
async fn happy_path_settles_exactly_once_and_links_records() {
    let transport = Arc::new(FakeTransport::new(1000));
    let store = Arc::new(MemoryEventStore::new());
    let reconciler = Arc::new(Reconciler::new());
    let ingestor =
        EventIngestor::new(transport.clone(), store.clone(), reconciler.clone(), 128, 3);
    let dispatcher = SettlementDispatcher::new();

    let player = Address::repeat_byte(0xAB);

    ingestor
        .handle_event(ChainEvent::BetPlaced {
            event: bet_placed_event(7, player, 1003),
            meta: meta(1000, 0, 1),
        })
        .await;

    assert!(reconciler.contains(&(7, player)));
    assert_eq!(reconciler.pending_count(), 1);

    transport.set_block(1003);
    reconciler.tick(transport.as_ref(), &dispatcher).await;
    assert_eq!(transport.settle_call_count(), 1);

    ingestor
        .handle_event(ChainEvent::BetSettled {
            event: bet_settled_event(7, player, true, 7),
            meta: meta(1003, 0, 2),
        })
        .await;

    assert!(!reconciler.contains(&(7, player)));

    // A second tick after settlement must not dispatch again.
    reconciler.tick(transport.as_ref(), &dispatcher).await;
    assert_eq!(transport.settle_call_count(), 1);

    let records = store.snapshot();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.related_event_id.is_some() && r.processed));
}

/// Scenario B — another party settles first.
#[tokio::test]
async fn settled_event_before_tick_removes_key_without_dispatch() {
    let transport = Arc::new(FakeTransport::new(1000));
    let store = Arc::new(MemoryEventStore::new());
    let reconciler = Arc::new(Reconciler::new());
    let ingestor =
        EventIngestor::new(transport.clone(), store.clone(), reconciler.clone(), 128, 3);
    let dispatcher = SettlementDispatcher::new();
    let player = Address::repeat_byte(0xBC);

    ingestor
        .handle_event(ChainEvent::BetPlaced {
            event: bet_placed_event(9, player, 1003),
            meta: meta(1000, 0, 3),
        })
        .await;

    ingestor
        .handle_event(ChainEvent::BetSettled {
            event: bet_settled_event(9, player, true, 8),
            meta: meta(1001, 0, 4),
        })
        .await;

    assert!(!reconciler.contains(&(9, player)));

    transport.set_block(1003);
    reconciler.tick(transport.as_ref(), &dispatcher).await;
    assert_eq!(
        transport.settle_call_count(),
        0,
        "dispatcher must not fire for an already-settled key"
    );
}

/// Scenario C — contract idempotence race.
#[tokio::test]
async fn idempotence_error_is_treated_as_success() {
    let transport = Arc::new(FakeTransport::new(1003));
    let reconciler = Arc::new(Reconciler::new());
    let dispatcher = SettlementDispatcher::new();
    let player = Address::repeat_byte(0xCD);

    reconciler.upsert(PendingBet {
        room_id: 3,
        player,
        amount_wei: 1_000_000_000_000_000,
        bet_big: false,
        commit_block: 1000,
        reveal_block: 1003,
        tx_hash: H256::repeat_byte(5),
        observed_at: chrono::Utc::now(),
    });

    transport.queue_outcome(SettleOutcome::Error("no valid bet found"));
    reconciler.tick(transport.as_ref(), &dispatcher).await;

    assert!(!reconciler.contains(&(3, player)));
    assert_eq!(transport.settle_call_count(), 1);

    // A later tick must not re-dispatch: the key is already gone.
    reconciler.tick(transport.as_ref(), &dispatcher).await;
    assert_eq!(transport.settle_call_count(), 1);
}

/// Scenario C variant — a non-idempotence error leaves the key for retry.
#[tokio::test]
async fn generic_settlement_error_leaves_key_pending() {
    let transport = Arc::new(FakeTransport::new(1003));
    let reconciler = Arc::new(Reconciler::new());
    let dispatcher = SettlementDispatcher::new();
    let player = Address::repeat_byte(0xDE);

    reconciler.upsert(PendingBet {
        room_id: 4,
        player,
        amount_wei: 500,
        bet_big: true,
        commit_block: 1000,
        reveal_block: 1003,
        tx_hash: H256::repeat_byte(6),
        observed_at: chrono::Utc::now(),
    });

    transport.queue_outcome(SettleOutcome::Error("nonce too low"));
    reconciler.tick(transport.as_ref(), &dispatcher).await;

    assert!(reconciler.contains(&(4, player)), "unrelated errors must leave the key for retry");
}

/// Scenario E — correlation survives a restart that forgets the pending map.
#[tokio::test]
async fn settlement_links_to_pre_restart_bet_placed_record() {
    let store = Arc::new(MemoryEventStore::new());
    let player = Address::repeat_byte(0xEF);

    let placed_id = store
        .append(EventRecord {
            id: uuid::Uuid::new_v4(),
            event_type: EventType::BetPlaced,
            room_id: 11,
            player,
            block_number: 500,
            block_timestamp: chrono::Utc::now(),
            log_index: 0,
            transaction_hash: H256::repeat_byte(1),
            created_at: chrono::Utc::now(),
            amount_wei: Some(1_000),
            bet_big: Some(true),
            commit_block: Some(497),
            reveal_block: Some(500),
            reward_amount_wei: None,
            won: None,
            hash_value: None,
            block_hash: None,
            result_block: None,
            bet_id: None,
            related_event_id: None,
            processed: false,
        })
        .await
        .unwrap();

    // Simulate the restart: a fresh reconciler with nothing in memory, same store.
    let transport = Arc::new(FakeTransport::new(600));
    let reconciler = Arc::new(Reconciler::new());
    let ingestor =
        EventIngestor::new(transport.clone(), store.clone(), reconciler.clone(), 128, 3);

    ingestor
        .handle_event(ChainEvent::BetSettled {
            event: bet_settled_event(11, player, true, 9),
            meta: meta(600, 0, 9),
        })
        .await;

    let records = store.find_by_ids(&[placed_id]).await.unwrap();
    let placed = records.first().expect("original BetPlaced record still present");
    assert!(placed.processed);
    assert!(placed.related_event_id.is_some());
}

/// Scenario F — duplicate settlement log within the same process.
#[tokio::test]
async fn duplicate_settlement_log_is_stored_once() {
    let transport = Arc::new(FakeTransport::new(1003));
    let store = Arc::new(MemoryEventStore::new());
    let reconciler = Arc::new(Reconciler::new());
    let ingestor =
        EventIngestor::new(transport.clone(), store.clone(), reconciler.clone(), 128, 3);
    let player = Address::repeat_byte(0xF0);

    let event = ChainEvent::BetSettled {
        event: bet_settled_event(5, player, true, 9),
        meta: meta(1003, 0, 10),
    };

    ingestor.handle_event(event.clone()).await;
    ingestor.handle_event(event).await;

    let count = store
        .count(&EventQuery { event_type: Some(EventType::BetSettled), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(count, 1, "duplicate delivery of the same tx hash must be dropped");
}
