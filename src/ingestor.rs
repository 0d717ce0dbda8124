//! Event Ingestor (§4.C).
//!
//! Subscribes to `BetPlaced`/`BetSettled` logs on every `connected`/
//! `reconnected` transition from the Connection Supervisor, decodes them,
//! and fans each one out to the Event Store (persist) and the Reconciler
//! (update in-memory state).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ethers::types::{H256, U256};
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::{ChainEvent, ChainTransport, LogMeta};
use crate::dedupe::SettlementDedupe;
use crate::models::{EventRecord, EventType};
use crate::reconciler::Reconciler;
use crate::store::EventStore;

/// Diagnostic counters surfaced for operators (§9 "Open question — reveal
/// block source").
#[derive(Default)]
pub struct IngestorDiagnostics {
    pub reveal_block_mismatches: AtomicU64,
    pub orphan_settlements: AtomicU64,
}

impl IngestorDiagnostics {
    pub fn mismatch_count(&self) -> u64 {
        self.reveal_block_mismatches.load(Ordering::Relaxed)
    }

    pub fn orphan_count(&self) -> u64 {
        self.orphan_settlements.load(Ordering::Relaxed)
    }
}

pub struct EventIngestor {
    transport: Arc<dyn ChainTransport>,
    store: Arc<dyn EventStore>,
    reconciler: Arc<Reconciler>,
    dedupe: SettlementDedupe,
    reveal_delay: u64,
    pub diagnostics: Arc<IngestorDiagnostics>,
}

impl EventIngestor {
    pub fn new(
        transport: Arc<dyn ChainTransport>,
        store: Arc<dyn EventStore>,
        reconciler: Arc<Reconciler>,
        dedupe_capacity: usize,
        reveal_delay: u64,
    ) -> Self {
        Self {
            transport,
            store,
            reconciler,
            dedupe: SettlementDedupe::new(dedupe_capacity),
            reveal_delay,
            diagnostics: Arc::new(IngestorDiagnostics::default()),
        }
    }

    /// Drives the ingestor: waits for the supervisor's `connected`/
    /// `reconnected` generation signal, opens a fresh subscription, and
    /// processes events until the generation changes again, the stream
    /// ends, or cancellation is requested.
    pub async fn run(&self, mut generation: watch::Receiver<u64>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            // Block until the supervisor reports a (re)connection.
            if generation.changed().await.is_err() {
                return;
            }
            if *generation.borrow() == 0 {
                continue;
            }

            info!("ingestor opening log subscription");
            let mut stream = match self.transport.subscribe_logs().await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "ingestor failed to open log subscription");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = generation.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        info!("connection regenerated, re-subscribing");
                        break;
                    }
                    event = stream.next() => {
                        match event {
                            Some(event) => self.handle_event(event).await,
                            None => {
                                warn!("log stream ended, waiting for supervisor reconnect");
                                tokio::time::sleep(Duration::from_millis(500)).await;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Processes one decoded log. Public so it can be driven directly in
    /// tests without a live subscription.
    pub async fn handle_event(&self, event: ChainEvent) {
        match event {
            ChainEvent::BetPlaced { event, meta } => self.handle_bet_placed(event, meta).await,
            ChainEvent::BetSettled { event, meta } => self.handle_bet_settled(event, meta).await,
        }
    }

    async fn handle_bet_placed(&self, event: crate::chain::contract::BetPlacedFilter, meta: LogMeta) {
        let room_id = event.room_id;
        let player = event.player;
        let amount_wei = u256_to_u128(event.amount_wei);
        let bet_big = event.bet_big;
        let commit_block_from_event = event.commit_block;
        let reveal_block_from_event = event.reveal_block;

        let current_block = self.resolve_current_block(meta.block_number).await;
        let local_reveal_block = current_block + self.reveal_delay;

        if local_reveal_block != reveal_block_from_event {
            self.diagnostics.reveal_block_mismatches.fetch_add(1, Ordering::Relaxed);
            warn!(
                room_id,
                player = %player,
                local_reveal_block,
                reveal_block_from_event,
                "reveal block mismatch between event payload and locally computed value"
            );
        }

        let block_timestamp = match self.transport.get_block(meta.block_number).await {
            Ok(header) => {
                chrono::DateTime::<Utc>::from_timestamp(header.timestamp as i64, 0).unwrap_or_else(Utc::now)
            }
            Err(err) => {
                warn!(error = %err, block_number = meta.block_number, "failed to fetch block header timestamp");
                Utc::now()
            }
        };

        let record = EventRecord {
            id: Uuid::new_v4(),
            event_type: EventType::BetPlaced,
            room_id,
            player,
            block_number: meta.block_number,
            block_timestamp,
            log_index: meta.log_index,
            transaction_hash: meta.transaction_hash,
            created_at: Utc::now(),
            amount_wei: Some(amount_wei),
            bet_big: Some(bet_big),
            commit_block: Some(commit_block_from_event),
            // Per spec.md §9's resolution: persist the event's own value,
            // reconcile against the locally computed one.
            reveal_block: Some(reveal_block_from_event),
            reward_amount_wei: None,
            won: None,
            hash_value: None,
            block_hash: None,
            result_block: None,
            bet_id: None,
            related_event_id: None,
            processed: false,
        };

        if let Err(err) = self.store.append(record).await {
            warn!(error = %err, room_id, player = %player, "failed to persist BetPlaced record");
        }

        self.reconciler.upsert(crate::models::PendingBet {
            room_id,
            player,
            amount_wei,
            bet_big,
            commit_block: commit_block_from_event,
            reveal_block: local_reveal_block,
            tx_hash: meta.transaction_hash,
            observed_at: Utc::now(),
        });

        debug!(room_id, player = %player, reveal_block = local_reveal_block, "bet placed");
    }

    async fn handle_bet_settled(&self, event: crate::chain::contract::BetSettledFilter, meta: LogMeta) {
        if !self.dedupe.observe(meta.transaction_hash) {
            debug!(tx_hash = %meta.transaction_hash, "duplicate BetSettled delivery dropped");
            return;
        }

        let room_id = event.room_id;
        let player = event.player;
        let won = event.won;
        let hash_value = event.hash_value;
        let block_hash = H256::from(event.block_hash);
        let bet_id = u256_to_u128(event.bet_id);
        let reward_amount_wei = if won { u256_to_u128(event.amount_wei) } else { 0 };

        let key = (room_id, player);
        let pending = self.reconciler.remove(&key);
        let result_block = pending.as_ref().map(|p| p.reveal_block);

        let block_timestamp = match self.transport.get_block(meta.block_number).await {
            Ok(header) => {
                chrono::DateTime::<Utc>::from_timestamp(header.timestamp as i64, 0).unwrap_or_else(Utc::now)
            }
            Err(err) => {
                warn!(error = %err, block_number = meta.block_number, "failed to fetch block header timestamp");
                Utc::now()
            }
        };

        let settled_id = Uuid::new_v4();
        let record = EventRecord {
            id: settled_id,
            event_type: EventType::BetSettled,
            room_id,
            player,
            block_number: meta.block_number,
            block_timestamp,
            log_index: meta.log_index,
            transaction_hash: meta.transaction_hash,
            created_at: Utc::now(),
            amount_wei: None,
            bet_big: None,
            commit_block: None,
            reveal_block: None,
            reward_amount_wei: Some(reward_amount_wei),
            won: Some(won),
            hash_value: Some(hash_value),
            block_hash: Some(block_hash),
            result_block,
            bet_id: Some(bet_id),
            related_event_id: None,
            processed: false,
        };

        if let Err(err) = self.store.append(record).await {
            warn!(error = %err, room_id, player = %player, "failed to persist BetSettled record");
            return;
        }

        match self.store.find_latest_unprocessed_bet_placed(room_id, player).await {
            Ok(Some(placed)) => {
                if let Err(err) = self.store.link(placed.id, settled_id).await {
                    warn!(error = %err, "failed to link BetSettled to its BetPlaced record");
                }
            }
            Ok(None) => {
                self.diagnostics.orphan_settlements.fetch_add(1, Ordering::Relaxed);
                debug!(room_id, player = %player, "BetSettled has no prior local BetPlaced, storing as orphan");
            }
            Err(err) => {
                warn!(error = %err, "failed to look up prior BetPlaced for correlation");
            }
        }

        debug!(room_id, player = %player, won, "bet settled");
    }

    /// Determines the local current block for a freshly observed
    /// `BetPlaced`: prefer the event's own block number (always present on
    /// a well-formed log), fall back to a live query, and as a last resort
    /// fall back to a rough estimate derived from the event's own block
    /// number (§4.C step 2).
    async fn resolve_current_block(&self, event_block_number: u64) -> u64 {
        if event_block_number > 0 {
            return event_block_number;
        }

        match self.transport.block_number().await {
            Ok(block) => block,
            Err(err) => {
                warn!(error = %err, "falling back to event block number estimate after live query failure");
                event_block_number
            }
        }
    }
}

fn u256_to_u128(value: U256) -> u128 {
    if value > U256::from(u128::MAX) {
        u128::MAX
    } else {
        value.as_u128()
    }
}
