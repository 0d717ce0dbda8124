//! Connection Supervisor (§4.B).
//!
//! Owns the streaming connection's lifecycle: establishes it, watches the
//! block heartbeat, reconnects with bounded exponential backoff, and
//! broadcasts `connected`/`reconnected` transitions to listeners (the
//! Ingestor) via a generation counter on a `watch` channel — every change
//! means "open a fresh log subscription".

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chain::ChainTransport;
use crate::config::{MAX_RECONNECT_ATTEMPTS, STALE_THRESHOLD};

/// Runtime-only state of the supervised stream (§3.3).
pub struct StreamState {
    is_connected: AtomicBool,
    last_block_at: std::sync::Mutex<Instant>,
    reconnect_attempts: AtomicU64,
}

impl StreamState {
    fn new() -> Self {
        Self {
            is_connected: AtomicBool::new(false),
            last_block_at: std::sync::Mutex::new(Instant::now()),
            reconnect_attempts: AtomicU64::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }

    pub fn last_block_age(&self) -> Duration {
        self.last_block_at.lock().expect("stream state mutex poisoned").elapsed()
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    fn mark_block_received(&self) {
        *self.last_block_at.lock().expect("stream state mutex poisoned") = Instant::now();
    }
}

/// Computes the backoff delay for the Nth reconnect attempt:
/// `min(30s, 1s * 2^attempts)`, with `attempts` clamped so the delay
/// plateaus at 30s instead of overflowing (§4.B, testable property 5).
pub fn backoff_delay(attempts: u32) -> Duration {
    let clamped = attempts.min(MAX_RECONNECT_ATTEMPTS);
    let secs = 1u64.checked_shl(clamped).unwrap_or(u64::MAX).min(30);
    Duration::from_secs(secs)
}

pub struct ConnectionSupervisor {
    transport: Arc<dyn ChainTransport>,
    state: Arc<StreamState>,
    generation: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(transport: Arc<dyn ChainTransport>, cancel: CancellationToken) -> Self {
        let (generation, _) = watch::channel(0);
        Self { transport, state: Arc::new(StreamState::new()), generation, cancel }
    }

    pub fn state(&self) -> Arc<StreamState> {
        self.state.clone()
    }

    /// A receiver that changes value (the generation counter) every time a
    /// fresh stream has just been established — listeners should
    /// re-subscribe whenever they observe a change.
    pub fn generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Drives the supervisor loop until cancelled. Never returns `Err`;
    /// connection failures are handled internally via backoff.
    pub async fn run(&self) {
        let mut attempts = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                self.state.is_connected.store(false, Ordering::Relaxed);
                return;
            }

            match self.transport.subscribe_new_heads().await {
                Ok(mut headers) => {
                    info!("stream connected");
                    self.state.is_connected.store(true, Ordering::Relaxed);
                    self.state.mark_block_received();
                    attempts = 0;
                    self.state.reconnect_attempts.store(0, Ordering::Relaxed);
                    self.generation.send_modify(|g| *g += 1);

                    let stale_check = tokio::time::interval(Duration::from_secs(60));
                    tokio::pin!(stale_check);

                    loop {
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                self.state.is_connected.store(false, Ordering::Relaxed);
                                return;
                            }
                            header = headers.next() => {
                                match header {
                                    Some(_header) => self.state.mark_block_received(),
                                    None => {
                                        warn!("stream closed by remote, reconnecting");
                                        break;
                                    }
                                }
                            }
                            _ = stale_check.tick() => {
                                if self.state.last_block_age() > STALE_THRESHOLD {
                                    warn!(
                                        age_secs = self.state.last_block_age().as_secs(),
                                        "stream stale, forcing reconnect"
                                    );
                                    break;
                                }
                            }
                        }
                    }

                    self.state.is_connected.store(false, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(error = %err, attempt = attempts, "failed to connect stream");
                }
            }

            attempts += 1;
            self.state.reconnect_attempts.store(attempts as u64, Ordering::Relaxed);
            if attempts > MAX_RECONNECT_ATTEMPTS {
                warn!(
                    attempts,
                    "exceeded configured reconnect attempt budget, continuing to retry at capped backoff"
                );
            }
            let delay = backoff_delay(attempts);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    self.state.is_connected.store(false, Ordering::Relaxed);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps_at_30s() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(4), Duration::from_secs(16));
        assert_eq!(backoff_delay(5), Duration::from_secs(30));
        assert_eq!(backoff_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn stream_state_starts_disconnected() {
        let state = StreamState::new();
        assert!(!state.is_connected());
        assert_eq!(state.reconnect_attempts(), 0);
    }
}
