//! Chain tracking engine.
//!
//! The [`Engine`] and [`Filter`] traits are the contract the
//! [`SyncOrchestrator`](crate::SyncOrchestrator) drives; [`Tracker`] is the implementation
//! backed by a [`ChainSource`] and a [`CursorStore`].
//!
//! A filter delivers [`LogDelta`]s on a single channel:
//!
//! * [`Filter::sync`] backfills every block from the stored cursor (or genesis, or the target's
//!   deployment block with [`TrackerConfig::fast_track`](crate::TrackerConfig::fast_track)) up
//!   to the head seen when the filter was created, in batches. Every batch is delivered, even an
//!   empty one, with the cursor of its last block attached.
//! * A live task follows the head beyond that boundary. With
//!   [`FilterConfig::async_delivery`] it starts as soon as the filter exists, otherwise once
//!   backfill completes.
//!
//! Live deltas may carry `removed` logs when a reorg orphans blocks that were already
//! delivered. No ordering is promised between backfill and live deltas.
//!
//! The engine never persists a cursor. The consumer commits the
//! [`CursorCommit`](store::CursorCommit) a delta carries after processing it, so a delta that
//! was queued but never processed is delivered again by the next run.

mod chain;
mod filter;
mod live;
mod range_iterator;
mod ring_buffer;
pub mod store;
mod tracker;

use alloy::primitives::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use chain::ChainSource;
pub use filter::TrackerFilter;
pub use tracker::Tracker;

use crate::{
    TrackerError,
    types::{BlockRef, LogDelta, SyncOutcome},
};

/// What a filter should watch and how it delivers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterConfig {
    /// Deliver live deltas concurrently with backfill instead of after it.
    pub async_delivery: bool,
    pub addresses: Vec<Address>,
}

/// A chain tracking engine.
pub trait Engine: Send + Sync {
    type Filter: Filter;

    /// Connects to the chain and starts background head tracking, stopped by `cancel`.
    ///
    /// Starting an already started engine does nothing.
    fn start(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), TrackerError>> + Send;

    /// Creates a log filter.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotStarted`] before [`Engine::start`].
    fn new_filter(
        &self,
        config: FilterConfig,
    ) -> impl Future<Output = Result<Self::Filter, TrackerError>> + Send;
}

/// Log filter created by an [`Engine`].
pub trait Filter: Send + Sync {
    /// Cursor persisted by a previous run, `None` when starting from genesis.
    fn last_block(&self) -> impl Future<Output = Result<Option<BlockRef>, TrackerError>> + Send;

    /// Hands out the receiving end of the filter's deltas.
    ///
    /// # Errors
    ///
    /// [`TrackerError::EventChannelTaken`] on every call but the first.
    fn event_channel(&mut self) -> Result<mpsc::Receiver<LogDelta>, TrackerError>;

    /// Backfills history up to the filter's boundary, returning once done or cancelled.
    fn sync(
        &self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<SyncOutcome, TrackerError>> + Send;
}

/// Store key of the cursor of a filter watching `addresses`.
///
/// Independent of the order the addresses were given in.
pub(crate) fn cursor_key(addresses: &[Address]) -> String {
    let mut addresses = addresses.to_vec();
    addresses.sort_unstable();
    addresses.dedup();
    let keys = addresses.iter().map(|address| format!("{address:#x}")).collect::<Vec<_>>();
    format!("logs:{}", keys.join(","))
}
