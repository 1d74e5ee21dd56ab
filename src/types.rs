use std::fmt;

use alloy::{primitives::B256, rpc::types::Log};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::store::CursorCommit;

/// A block identified by number and hash.
///
/// Used both as the persisted cursor ("last processed block") and as the engine's view of the
/// chain head.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: B256,
}

impl BlockRef {
    #[must_use]
    pub const fn new(number: u64, hash: B256) -> Self {
        Self { number, hash }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// One chain-state update delivered by a filter.
///
/// `added` holds newly observed logs in node order. `removed` holds previously delivered logs
/// that a reorg invalidated; they carry `removed = true`.
///
/// `commit`, when present, is the cursor to record once the delta has been processed. A delta
/// may carry a commit and no logs at all, advancing the cursor over empty blocks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogDelta {
    pub added: Vec<Log>,
    pub removed: Vec<Log>,
    pub commit: Option<CursorCommit>,
}

impl LogDelta {
    #[must_use]
    pub fn added(logs: Vec<Log>) -> Self {
        Self { added: logs, ..Self::default() }
    }

    #[must_use]
    pub fn removed(logs: Vec<Log>) -> Self {
        Self { removed: logs, ..Self::default() }
    }

    #[must_use]
    pub fn with_commit(mut self, commit: Option<CursorCommit>) -> Self {
        self.commit = commit;
        self
    }

    /// Nothing to report and no cursor to record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.commit.is_none()
    }
}

/// How a historical backfill ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every block up to the boundary captured at filter creation was scanned.
    Completed,
    /// Cancellation was observed before the backfill reached the boundary.
    Cancelled,
}

/// Whether a delivery channel still has a consumer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChannelState {
    Open,
    Closed,
}

impl ChannelState {
    pub(crate) fn is_closed(self) -> bool {
        self == ChannelState::Closed
    }
}

pub(crate) trait TryDeliver {
    async fn try_deliver(&self, delta: LogDelta) -> ChannelState;
}

impl TryDeliver for mpsc::Sender<LogDelta> {
    async fn try_deliver(&self, delta: LogDelta) -> ChannelState {
        debug!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            cursor = ?delta.commit.as_ref().map(|commit| commit.block().number),
            "Delivering log delta"
        );
        if let Err(err) = self.send(delta).await {
            warn!(error = %err, "Event channel closed, stopping delivery");
            return ChannelState::Closed;
        }
        ChannelState::Open
    }
}
