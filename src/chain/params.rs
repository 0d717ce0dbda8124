//! Contract Parameter Loader (§4.G).
//!
//! Reads `revealDelay()` once, at startup. A long-running process is not
//! expected to observe this value change, so it's read exactly once and
//! cached for the rest of the process lifetime.

use tracing::{info, warn};

use crate::chain::ChainTransport;
use crate::config::DEFAULT_REVEAL_DELAY;

/// Loads the reveal delay from the contract, falling back to the safe
/// default if the call fails or returns something nonsensical.
pub async fn load_reveal_delay(transport: &dyn ChainTransport) -> u64 {
    match transport.reveal_delay().await {
        Ok(delay) if delay > 0 => {
            info!(reveal_delay = delay, "loaded reveal delay from contract");
            delay
        }
        Ok(delay) => {
            warn!(
                reveal_delay = delay,
                default = DEFAULT_REVEAL_DELAY,
                "contract returned a non-positive reveal delay, using default"
            );
            DEFAULT_REVEAL_DELAY
        }
        Err(err) => {
            warn!(
                error = %err,
                default = DEFAULT_REVEAL_DELAY,
                "failed to read reveal delay from contract, using default"
            );
            DEFAULT_REVEAL_DELAY
        }
    }
}
