//! Bounded dedupe set for recently-seen `BetSettled` transaction hashes.
//!
//! The source this service is modeled on lets this set grow without bound
//! (spec.md §9 flags it). Re-architected here as a capacity-bounded LRU so
//! memory stays flat over a long-running process; entries age out once
//! 10,000 newer hashes have been seen, which comfortably covers the window
//! in which a stream redelivers a duplicate log.

use ethers::types::H256;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub struct SettlementDedupe {
    seen: Mutex<LruCache<H256, ()>>,
}

impl SettlementDedupe {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity must be nonzero");
        Self { seen: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns `true` if this is the first time `tx_hash` has been observed
    /// (and records it), `false` if it's a duplicate that should be dropped.
    pub fn observe(&self, tx_hash: H256) -> bool {
        let mut seen = self.seen.lock().expect("dedupe mutex poisoned");
        if seen.contains(&tx_hash) {
            false
        } else {
            seen.put(tx_hash, ());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_is_not_a_duplicate() {
        let dedupe = SettlementDedupe::new(8);
        assert!(dedupe.observe(H256::repeat_byte(1)));
    }

    #[test]
    fn repeated_observation_is_a_duplicate() {
        let dedupe = SettlementDedupe::new(8);
        let hash = H256::repeat_byte(2);
        assert!(dedupe.observe(hash));
        assert!(!dedupe.observe(hash));
        assert!(!dedupe.observe(hash));
    }

    #[test]
    fn capacity_is_bounded_and_evicts_oldest() {
        let dedupe = SettlementDedupe::new(2);
        let a = H256::repeat_byte(1);
        let b = H256::repeat_byte(2);
        let c = H256::repeat_byte(3);

        assert!(dedupe.observe(a));
        assert!(dedupe.observe(b));
        assert!(dedupe.observe(c)); // evicts `a`

        // `a` was evicted, so it looks new again.
        assert!(dedupe.observe(a));
    }
}
