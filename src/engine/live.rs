use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use alloy::{eips::BlockId, primitives::Address, rpc::types::Log};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    chain::ChainSource,
    range_iterator::RangeIterator,
    ring_buffer::RingBuffer,
    store::{CursorCommit, CursorStore},
};
use crate::{
    TrackerError,
    types::{BlockRef, ChannelState, LogDelta, TryDeliver},
};

/// One delivered live batch: the blocks `start..=end.number` and the logs found in them.
#[derive(Clone, Debug)]
struct Checkpoint {
    start: u64,
    end: BlockRef,
    logs: Vec<Log>,
}

/// Follows the chain head past a filter's boundary.
#[derive(Debug)]
pub(crate) struct LiveTask<C, S> {
    chain: C,
    store: Arc<S>,
    key: Arc<str>,
    addresses: Vec<Address>,
    batch_size: u64,
    confirmations: u64,
    head: watch::Receiver<Option<BlockRef>>,
    sender: mpsc::Sender<LogDelta>,
    backfilled: Arc<AtomicBool>,
    cancel: CancellationToken,
    last: BlockRef,
    checkpoints: RingBuffer<Checkpoint>,
}

impl<C: ChainSource, S: CursorStore> LiveTask<C, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        chain: C,
        store: Arc<S>,
        key: Arc<str>,
        addresses: Vec<Address>,
        batch_size: u64,
        confirmations: u64,
        reorg_depth: usize,
        boundary: BlockRef,
        head: watch::Receiver<Option<BlockRef>>,
        sender: mpsc::Sender<LogDelta>,
        backfilled: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        let mut checkpoints = RingBuffer::new(reorg_depth);
        checkpoints.push(Checkpoint { start: boundary.number, end: boundary, logs: Vec::new() });
        Self {
            chain,
            store,
            key,
            addresses,
            batch_size,
            confirmations,
            head,
            sender,
            backfilled,
            cancel,
            last: boundary,
            checkpoints,
        }
    }

    /// Runs until cancellation, the head publisher going away or the consumer dropping the
    /// channel.
    ///
    /// Chain errors are logged and the work is retried on the next head.
    pub(crate) async fn run(mut self) {
        let cancel = self.cancel.clone();
        info!(from_block = self.last.number + 1, "Live tracking started");

        loop {
            let head = *self.head.borrow_and_update();
            if let Some(head) = head {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,
                    result = self.advance(head) => match result {
                        Ok(ChannelState::Open) => {}
                        Ok(ChannelState::Closed) => break,
                        Err(err) => {
                            warn!(error = %err, "Live tracking step failed, retrying on next head");
                        }
                    },
                }
            }

            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                changed = self.head.changed() => {
                    if changed.is_err() {
                        debug!("Head publisher stopped");
                        break;
                    }
                }
            }
        }

        info!(last_block = self.last.number, "Live tracking stopped");
    }

    /// Brings the filter up to `head - confirmations`, handling a reorg first if one happened.
    async fn advance(&mut self, head: BlockRef) -> Result<ChannelState, TrackerError> {
        if let Some(removed) = self.unwind_reorg().await? {
            let rewind = LogDelta::removed(removed).with_commit(self.commit_at(self.last));
            if !rewind.is_empty() && self.sender.try_deliver(rewind).await.is_closed() {
                return Ok(ChannelState::Closed);
            }
        }

        let target = head.number.saturating_sub(self.confirmations);
        if target <= self.last.number {
            return Ok(ChannelState::Open);
        }

        for range in RangeIterator::forward(self.last.number + 1, target, self.batch_size) {
            let end = *range.end();
            // the hash is read before the logs, so a reorg in between is caught on the next head
            let end = self
                .chain
                .block_by_number(end)
                .await?
                .ok_or(TrackerError::BlockNotFound(BlockId::number(end)))?;
            let logs = self.chain.logs(&self.addresses, range.clone()).await?;

            debug!(
                from_block = range.start(),
                to_block = end.number,
                logs = logs.len(),
                "Live batch"
            );
            self.checkpoints.push(Checkpoint { start: *range.start(), end, logs: logs.clone() });
            self.last = end;

            let delta = LogDelta::added(logs).with_commit(self.commit_at(end));
            if !delta.is_empty() && self.sender.try_deliver(delta).await.is_closed() {
                return Ok(ChannelState::Closed);
            }
        }

        Ok(ChannelState::Open)
    }

    /// Cursor to attach to a delta ending at `block`.
    ///
    /// `None` until backfill has completed, since a live cursor would otherwise jump over
    /// history that was not processed yet.
    fn commit_at(&self, block: BlockRef) -> Option<CursorCommit> {
        if !self.backfilled.load(Ordering::Acquire) {
            return None;
        }
        let store: Arc<dyn CursorStore> = self.store.clone();
        Some(CursorCommit::new(store, Arc::clone(&self.key), block))
    }

    /// Detects whether the last delivered batch was orphaned and, if so, rewinds to the newest
    /// checkpoint still on the canonical chain.
    ///
    /// Returns the orphaned logs in chronological order, flagged as removed. Checkpoints are
    /// only dropped once the rewind target is known, so a failed chain call leaves the task
    /// exactly as it was and the next head retries the whole search.
    async fn unwind_reorg(&mut self) -> Result<Option<Vec<Log>>, TrackerError> {
        let Some(newest) = self.checkpoints.back().map(|checkpoint| checkpoint.end) else {
            return Ok(None);
        };
        if self.is_canonical(newest).await? {
            return Ok(None);
        }

        warn!(block = %newest, "Reorg detected, searching for common ancestor");

        let older = self
            .checkpoints
            .iter()
            .rev()
            .skip(1)
            .map(|checkpoint| checkpoint.end)
            .collect::<Vec<_>>();
        let mut orphaned = 1;
        let mut ancestor = None;
        for end in older {
            if self.is_canonical(end).await? {
                ancestor = Some(end);
                break;
            }
            orphaned += 1;
        }

        let resume = match ancestor {
            Some(ancestor) => {
                info!(common_ancestor = %ancestor, "Common ancestor found");
                ancestor
            }
            None => {
                let oldest_start =
                    self.checkpoints.iter().next().map_or(newest.number, |oldest| oldest.start);
                let resume = oldest_start.saturating_sub(1);
                warn!(
                    resume_block = resume,
                    "Reorg deeper than the checkpoint buffer, resuming below the oldest checkpoint"
                );
                self.chain
                    .block_by_number(resume)
                    .await?
                    .ok_or(TrackerError::BlockNotFound(BlockId::number(resume)))?
            }
        };

        let mut removed = Vec::new();
        for _ in 0..orphaned {
            if let Some(checkpoint) = self.checkpoints.pop_back() {
                removed.push(checkpoint.logs);
            }
        }
        if ancestor.is_none() {
            let checkpoint = Checkpoint { start: resume.number, end: resume, logs: Vec::new() };
            self.checkpoints.push(checkpoint);
        }
        self.last = resume;

        let removed = removed
            .into_iter()
            .rev()
            .flatten()
            .map(|mut log| {
                log.removed = true;
                log
            })
            .collect();

        Ok(Some(removed))
    }

    async fn is_canonical(&self, block: BlockRef) -> Result<bool, TrackerError> {
        let canonical = self.chain.block_by_number(block.number).await?;
        Ok(canonical.is_some_and(|canonical| canonical.hash == block.hash))
    }
}
