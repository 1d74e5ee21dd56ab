use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use alloy::{eips::BlockId, primitives::Address};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Filter,
    chain::ChainSource,
    live::LiveTask,
    range_iterator::RangeIterator,
    store::{CursorCommit, CursorStore},
};
use crate::{
    TrackerError,
    types::{BlockRef, LogDelta, SyncOutcome, TryDeliver},
};

/// Filter created by a [`Tracker`](super::Tracker).
#[derive(Debug)]
pub struct TrackerFilter<C, S> {
    chain: C,
    store: Arc<S>,
    key: Arc<str>,
    addresses: Vec<Address>,
    boundary: BlockRef,
    batch_size: u64,
    fast_track: bool,
    sender: mpsc::Sender<LogDelta>,
    receiver: Option<mpsc::Receiver<LogDelta>>,
    backfilled: Arc<AtomicBool>,
    // live task waiting for backfill to complete, when delivery is not asynchronous
    pending_live: Mutex<Option<LiveTask<C, S>>>,
}

impl<C: ChainSource, S: CursorStore> TrackerFilter<C, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        chain: C,
        store: Arc<S>,
        key: Arc<str>,
        addresses: Vec<Address>,
        boundary: BlockRef,
        batch_size: u64,
        fast_track: bool,
        channel: (mpsc::Sender<LogDelta>, mpsc::Receiver<LogDelta>),
        backfilled: Arc<AtomicBool>,
        pending_live: Option<LiveTask<C, S>>,
    ) -> Self {
        let (sender, receiver) = channel;
        Self {
            chain,
            store,
            key,
            addresses,
            boundary,
            batch_size,
            fast_track,
            sender,
            receiver: Some(receiver),
            backfilled,
            pending_live: Mutex::new(pending_live),
        }
    }

    /// Last block backfill will cover: the confirmed head when the filter was created.
    #[must_use]
    pub fn boundary(&self) -> BlockRef {
        self.boundary
    }

    #[must_use]
    pub fn cursor_key(&self) -> &str {
        &self.key
    }

    /// Scans every block from the stored cursor (or the first block worth scanning) up to the
    /// boundary. Each batch is delivered with the cursor of its last block, empty or not.
    async fn backfill(&self, cancel: &CancellationToken) -> Result<SyncOutcome, TrackerError> {
        let start = match self.store.get(&self.key)? {
            Some(cursor) => cursor.number + 1,
            None => tokio::select! {
                biased;

                () = cancel.cancelled() => return Ok(SyncOutcome::Cancelled),
                first = self.first_block() => first,
            },
        };

        info!(from_block = start, to_block = self.boundary.number, "Historical sync started");

        for range in RangeIterator::forward(start, self.boundary.number, self.batch_size) {
            let logs = tokio::select! {
                biased;

                () = cancel.cancelled() => return Ok(SyncOutcome::Cancelled),
                logs = self.chain.logs(&self.addresses, range.clone()) => logs?,
            };
            let cursor = self.cursor_at(*range.end()).await?;

            debug!(
                from_block = range.start(),
                to_block = range.end(),
                logs = logs.len(),
                "Backfill batch"
            );

            let delta = LogDelta::added(logs).with_commit(Some(self.commit_at(cursor)));
            let delivered = tokio::select! {
                biased;

                () = cancel.cancelled() => return Ok(SyncOutcome::Cancelled),
                state = self.sender.try_deliver(delta) => state,
            };
            if delivered.is_closed() {
                if cancel.is_cancelled() {
                    return Ok(SyncOutcome::Cancelled);
                }
                return Err(TrackerError::EventChannelClosed);
            }
        }

        Ok(SyncOutcome::Completed)
    }

    /// First block to backfill when no cursor is stored.
    ///
    /// With fast track on, blocks before the earliest deployment among the watched addresses
    /// cannot hold their logs and are skipped. Genesis whenever that block cannot be found.
    async fn first_block(&self) -> u64 {
        if !self.fast_track || self.addresses.is_empty() {
            return 0;
        }

        let mut first = self.boundary.number;
        for address in &self.addresses {
            match self.deployment_block(*address).await {
                Ok(Some(deployed)) => first = first.min(deployed),
                Ok(None) => {
                    info!(%address, "No code at the boundary, backfilling from genesis");
                    return 0;
                }
                Err(err) => {
                    warn!(
                        %address,
                        error = %err,
                        "Deployment lookup failed, backfilling from genesis"
                    );
                    return 0;
                }
            }
        }

        info!(first_block = first, "Fast track: skipping blocks before deployment");
        first
    }

    /// Lowest block at which `address` has code, `None` if it has none at the boundary.
    async fn deployment_block(&self, address: Address) -> Result<Option<u64>, TrackerError> {
        if !self.chain.has_code(address, self.boundary.number).await? {
            return Ok(None);
        }

        let (mut low, mut high) = (0, self.boundary.number);
        while low < high {
            let mid = low + (high - low) / 2;
            if self.chain.has_code(address, mid).await? {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        Ok(Some(low))
    }

    fn commit_at(&self, block: BlockRef) -> CursorCommit {
        let store: Arc<dyn CursorStore> = self.store.clone();
        CursorCommit::new(store, Arc::clone(&self.key), block)
    }

    async fn cursor_at(&self, number: u64) -> Result<BlockRef, TrackerError> {
        if number == self.boundary.number {
            return Ok(self.boundary);
        }
        self.chain
            .block_by_number(number)
            .await?
            .ok_or(TrackerError::BlockNotFound(BlockId::number(number)))
    }
}

impl<C: ChainSource, S: CursorStore> Filter for TrackerFilter<C, S> {
    async fn last_block(&self) -> Result<Option<BlockRef>, TrackerError> {
        Ok(self.store.get(&self.key)?)
    }

    fn event_channel(&mut self) -> Result<mpsc::Receiver<LogDelta>, TrackerError> {
        self.receiver.take().ok_or(TrackerError::EventChannelTaken)
    }

    async fn sync(&self, cancel: CancellationToken) -> Result<SyncOutcome, TrackerError> {
        let outcome = self.backfill(&cancel).await?;
        if outcome == SyncOutcome::Cancelled {
            info!("Historical sync cancelled");
            return Ok(outcome);
        }

        self.backfilled.store(true, Ordering::Release);
        info!(last_block = self.boundary.number, "Historical sync completed");

        let pending = self.pending_live.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(live) = pending {
            tokio::spawn(live.run());
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::Address;

    use super::*;
    use crate::{
        config::TrackerConfig,
        engine::{Engine, FilterConfig, Tracker, store::MemoryStore},
        test_utils::{MockChain, deposit_log},
    };

    const TARGET: Address = Address::repeat_byte(0x42);

    async fn filter(
        chain: &MockChain,
        store: &Arc<MemoryStore>,
        batch_size: u64,
    ) -> (TrackerFilter<MockChain, MemoryStore>, CancellationToken) {
        filter_with(chain, store, TrackerConfig { batch_size, ..TrackerConfig::default() }).await
    }

    async fn filter_with(
        chain: &MockChain,
        store: &Arc<MemoryStore>,
        config: TrackerConfig,
    ) -> (TrackerFilter<MockChain, MemoryStore>, CancellationToken) {
        let tracker = Tracker::new(chain.clone(), Arc::clone(store), config).unwrap();
        let cancel = CancellationToken::new();
        tracker.start(&cancel).await.unwrap();
        let filter = tracker
            .new_filter(FilterConfig { async_delivery: true, addresses: vec![TARGET] })
            .await
            .unwrap();
        (filter, cancel)
    }

    #[tokio::test]
    async fn event_channel_is_handed_out_once() {
        let chain = MockChain::new();
        let store = Arc::new(MemoryStore::new());
        let (mut filter, _cancel) = filter(&chain, &store, 10).await;

        assert!(filter.event_channel().is_ok());
        assert!(matches!(filter.event_channel(), Err(TrackerError::EventChannelTaken)));
    }

    #[tokio::test]
    async fn backfill_attaches_cursor_to_every_batch() {
        let chain = MockChain::new();
        chain.mine(25);
        chain.push_log(deposit_log(TARGET, 3, &[1; 8], &[1; 8]));
        chain.push_log(deposit_log(TARGET, 17, &[2; 8], &[2; 8]));
        let store = Arc::new(MemoryStore::new());
        let (mut filter, _cancel) = filter(&chain, &store, 10).await;
        let mut events = filter.event_channel().unwrap();

        let outcome = filter.sync(CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Completed);
        assert_eq!(chain.log_requests(), [0..=9, 10..=19, 20..=25]);
        // nothing is persisted until the consumer commits
        assert_eq!(store.get(filter.cursor_key()).unwrap(), None);

        let first = events.recv().await.unwrap();
        assert_eq!(first.added[0].block_number, Some(3));
        assert_eq!(first.commit.as_ref().unwrap().block(), chain.block(9));
        let second = events.recv().await.unwrap();
        assert_eq!(second.added[0].block_number, Some(17));
        assert_eq!(second.commit.as_ref().unwrap().block(), chain.block(19));
        let last = events.recv().await.unwrap();
        assert!(last.added.is_empty());
        let commit = last.commit.unwrap();
        assert_eq!(commit.block(), chain.block(25));

        commit.commit().unwrap();
        assert_eq!(store.get(filter.cursor_key()).unwrap(), Some(chain.block(25)));
    }

    #[tokio::test]
    async fn fast_track_starts_at_deployment_block() {
        let chain = MockChain::new();
        chain.mine(40);
        let deployed = chain.deploy(TARGET);
        chain.mine(20);
        let store = Arc::new(MemoryStore::new());
        let (filter, _cancel) = filter(&chain, &store, 100).await;

        filter.sync(CancellationToken::new()).await.unwrap();

        assert_eq!(deployed.number, 40);
        assert_eq!(chain.log_requests(), [40..=60]);
    }

    #[tokio::test]
    async fn fast_track_off_scans_from_genesis() {
        let chain = MockChain::new();
        chain.mine(40);
        chain.deploy(TARGET);
        chain.mine(20);
        let store = Arc::new(MemoryStore::new());
        let config =
            TrackerConfig { batch_size: 100, fast_track: false, ..TrackerConfig::default() };
        let (filter, _cancel) = filter_with(&chain, &store, config).await;

        filter.sync(CancellationToken::new()).await.unwrap();

        assert_eq!(chain.log_requests(), [0..=60]);
        assert_eq!(chain.code_requests(), 0);
    }

    #[tokio::test]
    async fn undeployed_target_scans_from_genesis() {
        let chain = MockChain::new();
        chain.mine(30);
        let store = Arc::new(MemoryStore::new());
        let (filter, _cancel) = filter(&chain, &store, 100).await;

        filter.sync(CancellationToken::new()).await.unwrap();

        assert_eq!(chain.log_requests(), [0..=30]);
        assert_eq!(chain.code_requests(), 1);
    }

    #[tokio::test]
    async fn backfill_resumes_after_cursor() {
        let chain = MockChain::new();
        chain.mine(30);
        let store = Arc::new(MemoryStore::new());
        let (filter, _cancel) = filter(&chain, &store, 100).await;
        store.set(filter.cursor_key(), chain.block(20)).unwrap();

        assert_eq!(filter.last_block().await.unwrap(), Some(chain.block(20)));
        filter.sync(CancellationToken::new()).await.unwrap();

        assert_eq!(chain.log_requests(), [21..=30]);
        assert_eq!(chain.code_requests(), 0);
    }

    #[tokio::test]
    async fn backfill_observes_cancellation() {
        let chain = MockChain::new();
        chain.mine(100);
        let store = Arc::new(MemoryStore::new());
        let (filter, _cancel) = filter(&chain, &store, 10).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = filter.sync(cancel).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Cancelled);
        assert!(chain.log_requests().is_empty());
        assert_eq!(store.get(filter.cursor_key()).unwrap(), None);
    }

    #[tokio::test]
    async fn dropped_consumer_fails_backfill() {
        let chain = MockChain::new();
        chain.mine(5);
        chain.push_log(deposit_log(TARGET, 2, &[1; 8], &[1; 8]));
        let store = Arc::new(MemoryStore::new());
        let (mut filter, _cancel) = filter(&chain, &store, 10).await;
        drop(filter.event_channel().unwrap());

        let err = filter.sync(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, TrackerError::EventChannelClosed));
    }

    #[tokio::test]
    async fn rpc_failure_aborts_backfill() {
        let chain = MockChain::new();
        chain.mine(5);
        chain.fail_next_log_requests(1);
        let store = Arc::new(MemoryStore::new());
        let (filter, _cancel) = filter(&chain, &store, 10).await;

        let err = filter.sync(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, TrackerError::RpcError(_)));
        assert_eq!(store.get(filter.cursor_key()).unwrap(), None);
    }
}
