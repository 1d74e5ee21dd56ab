use std::{
    collections::{BTreeMap, BTreeSet},
    ops::RangeInclusive,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use alloy::{
    primitives::{Address, keccak256},
    rpc::types::Log,
    transports::{RpcError, TransportErrorKind},
};

use crate::{TrackerError, engine::ChainSource, types::BlockRef};

#[derive(Debug, Default)]
struct State {
    blocks: Vec<BlockRef>,
    logs: Vec<Log>,
    fork: u64,
    log_requests: Vec<RangeInclusive<u64>>,
    failing_log_requests: usize,
    failing_blocks: BTreeSet<u64>,
    deployments: BTreeMap<Address, u64>,
    code_requests: usize,
    unreachable: bool,
    latency: Duration,
}

impl State {
    fn push_block(&mut self) -> BlockRef {
        let number = self.blocks.len() as u64;
        let mut seed = [0u8; 16];
        seed[..8].copy_from_slice(&number.to_be_bytes());
        seed[8..].copy_from_slice(&self.fork.to_be_bytes());
        let block = BlockRef::new(number, keccak256(seed));
        self.blocks.push(block);
        block
    }

    fn attach(&mut self, mut log: Log, block: BlockRef) {
        let log_index = self.logs.iter().filter(|l| l.block_number == Some(block.number)).count();
        log.block_number = Some(block.number);
        log.block_hash = Some(block.hash);
        log.log_index = Some(log_index as u64);
        log.removed = false;
        self.logs.push(log);
        self.logs.sort_by_key(|l| (l.block_number, l.log_index));
    }

    fn unavailable() -> TrackerError {
        TrackerError::from(RpcError::Transport(TransportErrorKind::BackendGone))
    }
}

/// In-memory chain implementing [`ChainSource`].
///
/// Starts with a genesis block. Block hashes are derived from the block number and a fork
/// counter, so blocks rebuilt by [`MockChain::reorg`] get new hashes. Clones share state.
#[derive(Clone, Debug)]
pub struct MockChain {
    state: Arc<Mutex<State>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    #[must_use]
    pub fn new() -> Self {
        let mut state = State::default();
        state.push_block();
        Self { state: Arc::new(Mutex::new(state)) }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `count` empty blocks.
    pub fn mine(&self, count: u64) {
        let mut state = self.state();
        for _ in 0..count {
            state.push_block();
        }
    }

    /// Appends one block holding `logs`, whatever block number they claim.
    pub fn mine_with(&self, logs: impl IntoIterator<Item = Log>) -> BlockRef {
        let mut state = self.state();
        let block = state.push_block();
        for log in logs {
            state.attach(log, block);
        }
        block
    }

    /// Adds a log to the existing block it claims.
    ///
    /// # Panics
    ///
    /// If the log has no block number or the block was not mined yet.
    pub fn push_log(&self, log: Log) {
        let mut state = self.state();
        let number = log.block_number.expect("log without block number");
        let block = *state.blocks.get(number as usize).expect("log block not mined yet");
        state.attach(log, block);
    }

    /// Replaces the newest `depth` blocks with empty blocks of a new fork.
    pub fn reorg(&self, depth: u64) {
        let mut state = self.state();
        let height = state.blocks.len() as u64;
        let fork_point = height.saturating_sub(depth).max(1);
        state.blocks.truncate(fork_point as usize);
        state.logs.retain(|log| log.block_number.is_some_and(|number| number < fork_point));
        state.fork += 1;
        for _ in fork_point..height {
            state.push_block();
        }
    }

    /// Canonical block at `number`.
    ///
    /// # Panics
    ///
    /// If the block was not mined.
    #[must_use]
    pub fn block(&self, number: u64) -> BlockRef {
        self.state().blocks[number as usize]
    }

    #[must_use]
    pub fn head(&self) -> BlockRef {
        *self.state().blocks.last().expect("genesis is always present")
    }

    /// Ranges passed to [`ChainSource::logs`], in call order.
    #[must_use]
    pub fn log_requests(&self) -> Vec<RangeInclusive<u64>> {
        self.state().log_requests.clone()
    }

    /// Number of [`ChainSource::has_code`] calls so far.
    #[must_use]
    pub fn code_requests(&self) -> usize {
        self.state().code_requests
    }

    /// Makes the next `count` log requests fail with a transport error.
    pub fn fail_next_log_requests(&self, count: usize) {
        self.state().failing_log_requests = count;
    }

    /// Makes the next request for block `number` fail with a transport error.
    pub fn fail_next_block_request(&self, number: u64) {
        self.state().failing_blocks.insert(number);
    }

    /// Deploys code at `address` in the current head block.
    pub fn deploy(&self, address: Address) -> BlockRef {
        let mut state = self.state();
        let head = *state.blocks.last().expect("genesis is always present");
        state.deployments.insert(address, head.number);
        head
    }

    /// Makes every call fail while `unreachable` is set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Delays every log request by `latency`.
    pub fn set_log_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }
}

impl ChainSource for MockChain {
    async fn latest_block(&self) -> Result<BlockRef, TrackerError> {
        let state = self.state();
        if state.unreachable {
            return Err(State::unavailable());
        }
        state.blocks.last().copied().ok_or(TrackerError::NotStarted)
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockRef>, TrackerError> {
        let mut state = self.state();
        if state.unreachable || state.failing_blocks.remove(&number) {
            return Err(State::unavailable());
        }
        Ok(usize::try_from(number).ok().and_then(|index| state.blocks.get(index)).copied())
    }

    async fn logs(
        &self,
        addresses: &[Address],
        range: RangeInclusive<u64>,
    ) -> Result<Vec<Log>, TrackerError> {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if state.unreachable {
            return Err(State::unavailable());
        }
        state.log_requests.push(range.clone());
        if state.failing_log_requests > 0 {
            state.failing_log_requests -= 1;
            return Err(State::unavailable());
        }

        Ok(state
            .logs
            .iter()
            .filter(|log| log.block_number.is_some_and(|number| range.contains(&number)))
            .filter(|log| addresses.is_empty() || addresses.contains(&log.address()))
            .cloned()
            .collect())
    }

    async fn has_code(&self, address: Address, number: u64) -> Result<bool, TrackerError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(State::unavailable());
        }
        state.code_requests += 1;
        Ok(state.deployments.get(&address).is_some_and(|deployed| *deployed <= number))
    }
}
