//! Deposit-Tracker follows a deposit contract and reports every `DepositEvent` it emits.
//!
//! The work is split between a few cooperating pieces:
//!
//! - an [`engine::Engine`] (by default [`Tracker`]) that backfills history and follows the chain
//!   head, delivering [`LogDelta`] batches on a channel;
//! - the [`IngestionLoop`], which decodes deposits out of those batches through an
//!   [`EventDecoder`] and writes them with a [`DepositReporter`];
//! - the [`SyncOrchestrator`], which sequences engine startup, filter creation and backfill;
//! - the [`ShutdownCoordinator`], which turns termination signals into cancellation of the
//!   shared [`CancellationToken`](tokio_util::sync::CancellationToken).
//!
//! # Ordering
//!
//! Within a delta, logs are in block and log order. No ordering is promised between backfill
//! and live deltas, which may overlap at the boundary between the two phases.
//!
//! # Reorgs
//!
//! When blocks that were already delivered are orphaned, the engine emits a delta holding the
//! orphaned logs in `removed` before the replacement logs. The reporter only reports `added`
//! logs.
//!
//! # Cursor
//!
//! The last processed block is persisted per filter in an [`engine::store::CursorStore`], so a
//! restarted tracker resumes where it stopped instead of backfilling from genesis. The
//! [`IngestionLoop`] commits a delta's cursor only after reporting its deposits.
//!
//! # Robust providers
//!
//! The [`robust_provider`] module provides [`robust_provider::RobustProvider`], a wrapper that
//! bounds every RPC call with a timeout and retries it with exponential backoff.

pub mod config;
pub mod engine;
pub mod event;
pub mod robust_provider;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod error;
mod ingestion;
mod orchestrator;
mod reporter;
mod shutdown;
mod types;

pub use config::{Cli, Config, ConfigError, TrackerConfig};
pub use engine::{
    Engine, Filter, FilterConfig, Tracker,
    store::{CursorCommit, CursorStore, FileStore, MemoryStore},
};
pub use error::TrackerError;
pub use event::{DecodeError, DecodedDeposit, EventDecoder, EventShape};
pub use ingestion::{IngestionLoop, IngestionState};
pub use orchestrator::SyncOrchestrator;
pub use reporter::DepositReporter;
pub use shutdown::{
    OsSignals, ShutdownCoordinator, ShutdownOutcome, ShutdownState, SignalSource,
    TerminationSignal,
};
pub use types::{BlockRef, LogDelta, SyncOutcome};
