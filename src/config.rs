//! Command line and fixed tracker settings.

use std::{path::PathBuf, time::Duration};

use alloy::{primitives::Address, transports::http::reqwest::Url};
use clap::Parser;
use thiserror::Error;

use crate::robust_provider::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_MIN_DELAY};

/// Blocks fetched per `eth_getLogs` call.
pub const DEFAULT_BATCH_SIZE: u64 = 2_000;
/// Blocks a log must be buried under before it is delivered.
pub const DEFAULT_BLOCK_CONFIRMATIONS: u64 = 0;
/// Interval between two head polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Live batches remembered for reorg detection.
pub const DEFAULT_REORG_DEPTH: usize = 64;
/// Log deltas buffered between the engine and the ingestion loop.
pub const DEFAULT_EVENT_BUFFER_CAPACITY: usize = 1_024;
/// Skip the blocks before the target contract was deployed when there is no stored cursor.
pub const DEFAULT_FAST_TRACK: bool = true;
/// Cursor store location, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "deposit.db";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid endpoint '{0}': expected an http(s) or ws(s) URL")]
    InvalidEndpoint(String),

    #[error("Invalid target '{0}': expected a 20-byte hex address")]
    InvalidTarget(String),
}

/// Tracks `DepositEvent` logs of one contract, backfilling history then following the head.
#[derive(Parser, Debug, Clone)]
#[command(name = "deposit-tracker", version, about)]
pub struct Cli {
    /// JSON-RPC endpoint of the node.
    #[arg(long)]
    pub endpoint: String,

    /// Address of the deposit contract.
    #[arg(long)]
    pub target: String,
}

impl Cli {
    /// Validates the flags.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] naming the offending flag value.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let endpoint = Url::parse(&self.endpoint)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https" | "ws" | "wss"))
            .ok_or_else(|| ConfigError::InvalidEndpoint(self.endpoint.clone()))?;

        let target = self
            .target
            .parse::<Address>()
            .map_err(|_| ConfigError::InvalidTarget(self.target.clone()))?;

        Ok(Config { endpoint, target, tracker: TrackerConfig::default() })
    }
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Url,
    pub target: Address,
    pub tracker: TrackerConfig,
}

/// Settings of the tracking engine and its collaborators. Not exposed on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub batch_size: u64,
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub reorg_depth: usize,
    pub event_buffer_capacity: usize,
    /// Start a first backfill at the contract's deployment block instead of genesis.
    pub fast_track: bool,
    pub store_path: PathBuf,
    pub call_timeout: Duration,
    pub max_retries: usize,
    pub min_delay: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            confirmations: DEFAULT_BLOCK_CONFIRMATIONS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reorg_depth: DEFAULT_REORG_DEPTH,
            event_buffer_capacity: DEFAULT_EVENT_BUFFER_CAPACITY,
            fast_track: DEFAULT_FAST_TRACK,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }
}
