use std::sync::{Arc, OnceLock, atomic::AtomicBool};

use tokio::{
    sync::{mpsc, watch},
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Engine, FilterConfig, chain::ChainSource, cursor_key, filter::TrackerFilter, live::LiveTask,
    store::CursorStore,
};
use crate::{TrackerError, config::TrackerConfig, types::BlockRef};

/// [`Engine`] that polls a [`ChainSource`] for the head and persists cursors in a
/// [`CursorStore`].
#[derive(Debug)]
pub struct Tracker<C, S> {
    chain: C,
    store: Arc<S>,
    config: TrackerConfig,
    head: Arc<watch::Sender<Option<BlockRef>>>,
    cancel: OnceLock<CancellationToken>,
}

impl<C: ChainSource, S: CursorStore> Tracker<C, S> {
    /// # Errors
    ///
    /// * [`TrackerError::InvalidBatchSize`] if `config.batch_size` is zero.
    /// * [`TrackerError::InvalidBufferCapacity`] if `config.event_buffer_capacity` is zero.
    pub fn new(chain: C, store: Arc<S>, config: TrackerConfig) -> Result<Self, TrackerError> {
        if config.batch_size == 0 {
            return Err(TrackerError::InvalidBatchSize);
        }
        if config.event_buffer_capacity == 0 {
            return Err(TrackerError::InvalidBufferCapacity);
        }

        let (head, _) = watch::channel(None);
        Ok(Self { chain, store, config, head: Arc::new(head), cancel: OnceLock::new() })
    }

    /// Latest head seen by the poller, `None` before [`Engine::start`].
    #[must_use]
    pub fn head(&self) -> Option<BlockRef> {
        *self.head.borrow()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn spawn_head_poller(&self, cancel: CancellationToken) {
        let chain = self.chain.clone();
        let head = Arc::clone(&self.head);
        let poll_interval = self.config.poll_interval;

        tokio::spawn(async move {
            let mut interval = time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately and the head was just fetched
            interval.tick().await;

            loop {
                let latest = tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,
                    _ = interval.tick() => tokio::select! {
                        biased;

                        () = cancel.cancelled() => break,
                        latest = chain.latest_block() => latest,
                    },
                };

                match latest {
                    Ok(latest) => {
                        let changed = head.send_if_modified(|current| {
                            if *current == Some(latest) {
                                return false;
                            }
                            *current = Some(latest);
                            true
                        });
                        if changed {
                            debug!(head = %latest, "New head");
                        }
                    }
                    Err(err) => warn!(error = %err, "Failed to poll chain head"),
                }
            }

            debug!("Head poller stopped");
        });
    }
}

impl<C: ChainSource, S: CursorStore> Engine for Tracker<C, S> {
    type Filter = TrackerFilter<C, S>;

    async fn start(&self, cancel: &CancellationToken) -> Result<(), TrackerError> {
        if self.cancel.get().is_some() {
            debug!("Tracker already started");
            return Ok(());
        }

        let latest = self.chain.latest_block().await?;
        if self.cancel.set(cancel.clone()).is_err() {
            return Ok(());
        }
        self.head.send_replace(Some(latest));
        self.spawn_head_poller(cancel.clone());

        info!(head = %latest, "Tracker started");
        Ok(())
    }

    async fn new_filter(&self, config: FilterConfig) -> Result<Self::Filter, TrackerError> {
        let cancel = self.cancel.get().ok_or(TrackerError::NotStarted)?.clone();
        let head = self.head().ok_or(TrackerError::NotStarted)?;

        let boundary_number = head.number.saturating_sub(self.config.confirmations);
        let boundary = if boundary_number == head.number {
            head
        } else {
            self.chain.block_by_number(boundary_number).await?.ok_or(
                TrackerError::BlockNotFound(alloy::eips::BlockId::number(boundary_number)),
            )?
        };

        let key: Arc<str> = Arc::from(cursor_key(&config.addresses));
        let (sender, receiver) = mpsc::channel(self.config.event_buffer_capacity);
        let backfilled = Arc::new(AtomicBool::new(false));

        let live = LiveTask::new(
            self.chain.clone(),
            Arc::clone(&self.store),
            Arc::clone(&key),
            config.addresses.clone(),
            self.config.batch_size,
            self.config.confirmations,
            self.config.reorg_depth,
            boundary,
            self.head.subscribe(),
            sender.clone(),
            Arc::clone(&backfilled),
            cancel,
        );

        let pending_live = if config.async_delivery {
            tokio::spawn(live.run());
            None
        } else {
            Some(live)
        };

        info!(
            key = %key,
            boundary = %boundary,
            async_delivery = config.async_delivery,
            "Filter created"
        );

        Ok(TrackerFilter::new(
            self.chain.clone(),
            Arc::clone(&self.store),
            key,
            config.addresses,
            boundary,
            self.config.batch_size,
            self.config.fast_track,
            (sender, receiver),
            backfilled,
            pending_live,
        ))
    }
}
