//! Pending-Bet Reconciler (§4.D).
//!
//! Owns the in-memory map of commitments awaiting reveal exclusively; no
//! other component mutates it (§3 ownership rule). `tick` reads the
//! current block once, then hands each due key to the Settlement
//! Dispatcher — the map lock is never held across that dispatch, so
//! concurrent removal (e.g. a `BetSettled` arriving mid-tick) is safe.

use std::collections::HashMap;
use std::sync::Mutex;

use ethers::types::Address;
use tracing::debug;

use crate::chain::ChainTransport;
use crate::dispatcher::SettlementDispatcher;
use crate::models::{BetKey, PendingBet};

#[derive(Default)]
pub struct Reconciler {
    bets: Mutex<HashMap<BetKey, PendingBet>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any prior entry for the same key (§3.1 invariant: the
    /// contract allows at most one open bet per key, so a later
    /// `BetPlaced` implies the prior commit was already settled upstream).
    pub fn upsert(&self, bet: PendingBet) {
        let mut bets = self.bets.lock().expect("reconciler mutex poisoned");
        bets.insert(bet.key(), bet);
    }

    pub fn remove(&self, key: &BetKey) -> Option<PendingBet> {
        self.bets.lock().expect("reconciler mutex poisoned").remove(key)
    }

    pub fn contains(&self, key: &BetKey) -> bool {
        self.bets.lock().expect("reconciler mutex poisoned").contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.bets.lock().expect("reconciler mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn due_keys(&self, current_block: u64) -> Vec<BetKey> {
        let bets = self.bets.lock().expect("reconciler mutex poisoned");
        bets.values()
            .filter(|bet| bet.is_due(current_block))
            .map(|bet| bet.key())
            .collect()
    }

    /// One reconciler tick (§4.D): reads the current block, dispatches
    /// settlement for every due commitment, and logs progress for the rest
    /// at a bounded rate (every 5 blocks of remaining wait, not every tick).
    pub async fn tick(&self, transport: &dyn ChainTransport, dispatcher: &SettlementDispatcher) {
        let current_block = match transport.block_number().await {
            Ok(block) => block,
            Err(err) => {
                tracing::warn!(error = %err, "reconciler tick: failed to read current block");
                return;
            }
        };

        for key in self.due_keys(current_block) {
            dispatcher.dispatch(key, self, transport).await;
        }

        self.log_progress(current_block);
    }

    fn log_progress(&self, current_block: u64) {
        let bets = self.bets.lock().expect("reconciler mutex poisoned");
        for bet in bets.values() {
            if bet.is_due(current_block) {
                continue;
            }
            let remaining = bet.reveal_block.saturating_sub(current_block);
            if remaining % 5 == 0 {
                debug!(
                    room_id = bet.room_id,
                    player = %bet.player,
                    blocks_remaining = remaining,
                    "pending bet awaiting reveal"
                );
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.len()
    }
}

/// Convenience for building lookup keys from raw ABI types.
pub fn key_of(room_id: u32, player: Address) -> BetKey {
    (room_id, player)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ethers::types::H256;

    fn sample_bet(room_id: u32, player: Address, reveal_block: u64) -> PendingBet {
        PendingBet {
            room_id,
            player,
            amount_wei: 1_000_000_000_000_000,
            bet_big: true,
            commit_block: reveal_block.saturating_sub(3),
            reveal_block,
            tx_hash: H256::repeat_byte(9),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn at_most_one_entry_per_key() {
        let reconciler = Reconciler::new();
        let player = Address::repeat_byte(1);
        reconciler.upsert(sample_bet(7, player, 1003));
        assert_eq!(reconciler.len(), 1);

        // A later BetPlaced for the same key replaces the prior one.
        reconciler.upsert(sample_bet(7, player, 2003));
        assert_eq!(reconciler.len(), 1);
        assert_eq!(
            reconciler.bets.lock().unwrap().get(&(7, player)).unwrap().reveal_block,
            2003
        );
    }

    #[test]
    fn due_keys_only_include_entries_past_reveal_block() {
        let reconciler = Reconciler::new();
        let p1 = Address::repeat_byte(1);
        let p2 = Address::repeat_byte(2);
        reconciler.upsert(sample_bet(1, p1, 1000));
        reconciler.upsert(sample_bet(2, p2, 2000));

        let due = reconciler.due_keys(1500);
        assert_eq!(due, vec![(1, p1)]);
    }

    #[test]
    fn remove_drops_the_entry() {
        let reconciler = Reconciler::new();
        let player = Address::repeat_byte(3);
        reconciler.upsert(sample_bet(9, player, 500));
        assert!(reconciler.contains(&(9, player)));
        reconciler.remove(&(9, player));
        assert!(!reconciler.contains(&(9, player)));
    }
}
