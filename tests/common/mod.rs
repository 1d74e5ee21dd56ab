#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use alloy::{primitives::Address, rpc::types::Log};
use deposit_tracker::{
    BlockRef, CursorStore, DepositReporter, EventDecoder, SyncOrchestrator, Tracker,
    TrackerConfig, TrackerError,
    test_utils::{MockChain, SharedBuffer, deposit_log},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TARGET: Address = Address::repeat_byte(0x42);
pub const OTHER: Address = Address::repeat_byte(0x17);

pub type TestOrchestrator<S> = SyncOrchestrator<Tracker<MockChain, S>, SharedBuffer>;

pub struct TrackerSetup<S> {
    pub orchestrator: Arc<TestOrchestrator<S>>,
    pub output: SharedBuffer,
    pub cancel: CancellationToken,
}

impl<S: CursorStore> TrackerSetup<S> {
    /// Runs the orchestrator for [`TARGET`] on its own task.
    pub fn spawn(&self) -> JoinHandle<Result<(), TrackerError>> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let cancel = self.cancel.clone();
        tokio::spawn(async move { orchestrator.run(TARGET, cancel).await })
    }
}

pub fn fast_config(batch_size: u64) -> TrackerConfig {
    TrackerConfig {
        batch_size,
        poll_interval: Duration::from_millis(10),
        ..TrackerConfig::default()
    }
}

pub fn setup_tracker<S: CursorStore>(
    chain: &MockChain,
    store: Arc<S>,
    config: TrackerConfig,
) -> anyhow::Result<TrackerSetup<S>> {
    let tracker = Tracker::new(chain.clone(), store, config)?;
    let output = SharedBuffer::default();
    let orchestrator = SyncOrchestrator::new(
        tracker,
        DepositReporter::new(output.clone()),
        EventDecoder::deposit(),
    );
    Ok(TrackerSetup {
        orchestrator: Arc::new(orchestrator),
        output,
        cancel: CancellationToken::new(),
    })
}

/// Store key of the cursor of a filter watching [`TARGET`] only.
pub fn target_key() -> String {
    format!("logs:{TARGET:#x}")
}

/// A deposit of `amount` with the given `index`, both encoded as 8 little-endian bytes.
pub fn deposit(address: Address, index: u64, amount: u64) -> Log {
    deposit_log(address, 0, &index.to_le_bytes(), &amount.to_le_bytes())
}

/// Waits until `line` has been reported.
pub async fn wait_for_line(output: &SharedBuffer, line: &str) -> anyhow::Result<()> {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while !output.lines().iter().any(|l| l == line) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    anyhow::ensure!(found.is_ok(), "never reported {line:?}, got {:?}", output.lines());
    Ok(())
}

/// Waits until ingestion has committed `block` as the cursor of [`TARGET`].
pub async fn wait_for_cursor<S: CursorStore>(store: &S, block: BlockRef) -> anyhow::Result<()> {
    let key = target_key();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while store.get(&key).ok().flatten() != Some(block) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    anyhow::ensure!(found.is_ok(), "cursor never reached {block}, got {:?}", store.get(&key)?);
    Ok(())
}

/// Reported deposit lines, in report order.
pub fn deposits(output: &SharedBuffer) -> Vec<String> {
    output.lines().into_iter().filter(|l| l.starts_with("Deposit:")).collect()
}
