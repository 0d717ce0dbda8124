//! Settlement Dispatcher (§4.E).

use ethers::types::Address;
use tracing::{error, info, warn};

use crate::chain::ChainTransport;
use crate::models::BetKey;
use crate::reconciler::Reconciler;

/// Case-insensitive substrings that, when found in a failed settlement
/// call's error message, mean "someone already settled this bet" —
/// treated as success-equivalent (§4.E step 4).
const IDEMPOTENCE_MARKERS: &[&str] =
    &["no valid bet found", "already processed", "executed"];

pub struct SettlementDispatcher;

impl SettlementDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Submits `settleBet(roomId, player)`, waits for the receipt, and
    /// removes `key` from the reconciler on success or on a known
    /// idempotence error. Any other error is non-fatal: the key stays and
    /// the next tick retries (§4.E step 4).
    pub async fn dispatch(&self, key: BetKey, reconciler: &Reconciler, transport: &dyn ChainTransport) {
        let (room_id, player) = key;

        match self.settle(room_id, player, transport).await {
            Ok(true) => {
                info!(room_id, player = %player, "settlement succeeded");
                reconciler.remove(&key);
            }
            Ok(false) => {
                // Idempotence marker matched: someone else already settled
                // this bet. Treat as success-equivalent.
                info!(
                    room_id,
                    player = %player,
                    "settlement call reports bet already settled, removing from reconciler"
                );
                reconciler.remove(&key);
            }
            Err(err) => {
                warn!(
                    room_id,
                    player = %player,
                    error = %err,
                    "settlement attempt failed, leaving bet pending for retry"
                );
            }
        }
    }

    /// Returns `Ok(true)` on a confirmed successful settlement, `Ok(false)`
    /// if the call failed with a known idempotence marker, and `Err` for
    /// anything else.
    async fn settle(
        &self,
        room_id: u32,
        player: Address,
        transport: &dyn ChainTransport,
    ) -> anyhow::Result<bool> {
        let tx_hash = match transport.send_settle_bet(room_id, player).await {
            Ok(hash) => hash,
            Err(transport_err) => {
                if is_idempotence_error(&transport_err.cause.to_string()) {
                    return Ok(false);
                }
                return Err(anyhow::anyhow!(transport_err));
            }
        };

        let receipt = transport
            .wait_receipt(tx_hash)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        if receipt.status {
            Ok(true)
        } else {
            error!(room_id, player = %player, "settlement transaction reverted on-chain");
            Err(anyhow::anyhow!("settlement transaction reverted"))
        }
    }
}

impl Default for SettlementDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn is_idempotence_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    IDEMPOTENCE_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_idempotence_markers_case_insensitively() {
        assert!(is_idempotence_error("Error: No Valid Bet Found for player"));
        assert!(is_idempotence_error("revert: already processed"));
        assert!(is_idempotence_error("tx EXECUTED previously"));
    }

    #[test]
    fn does_not_match_unrelated_errors() {
        assert!(!is_idempotence_error("insufficient funds for gas"));
        assert!(!is_idempotence_error("nonce too low"));
    }
}
