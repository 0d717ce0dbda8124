//! Environment-driven configuration, loaded once at startup.

use anyhow::{bail, Context};
use ethers::types::Address;
use std::str::FromStr;
use std::time::Duration;

/// Default reveal delay adopted when `revealDelay()` can't be read from the
/// contract at startup (§4.G).
pub const DEFAULT_REVEAL_DELAY: u64 = 3;

/// Stream staleness threshold used by the service-layer monitor (§4.B).
pub const STALE_THRESHOLD: Duration = Duration::from_secs(180);

/// Maximum number of reconnect attempts before backoff stops growing and the
/// supervisor just keeps retrying at the capped delay (§4.B).
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Reconciler tick period (§4.D).
pub const RECONCILER_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Per-RPC-call deadline (§5).
pub const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Threshold, in native units, below which a low-balance warning is logged
/// at startup (§5).
pub const LOW_BALANCE_WARNING_ETHER: f64 = 0.01;

/// Bound on the in-memory settlement dedupe set (§9).
pub const DEDUPE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub rpc_url: String,
    pub rpc_wss_url: String,
    pub contract_address: Address,
    pub settler_private_key: String,
    pub database_url: String,
}

impl Settings {
    /// Loads configuration from the process environment, after first
    /// consulting a `.env` file if present. Fails fast on missing
    /// required variables, per spec.md §7's Fatal row.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let port = std::env::var("PORT")
            .ok()
            .map(|v| v.parse::<u16>())
            .transpose()
            .context("PORT must be a valid port number")?
            .unwrap_or(8080);

        let rpc_url = require_env("RPC_URL")?;
        let rpc_wss_url = require_env("RPC_WSS_URL")?;

        let contract_address_raw = require_env("CONTRACT_ADDRESS")?;
        let contract_address = Address::from_str(contract_address_raw.trim())
            .context("CONTRACT_ADDRESS is not a valid address")?;

        let settler_private_key = require_env("SETTLER_PRIVATE_KEY")?;
        if settler_private_key.trim().is_empty() {
            bail!("SETTLER_PRIVATE_KEY must not be empty");
        }

        let database_url = require_env("DATABASE_URL")?;

        Ok(Self {
            port,
            rpc_url,
            rpc_wss_url,
            contract_address,
            settler_private_key,
            database_url,
        })
    }
}

fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_var_is_fatal() {
        std::env::remove_var("RPC_URL");
        let err = require_env("RPC_URL").unwrap_err();
        assert!(err.to_string().contains("RPC_URL"));
    }
}
