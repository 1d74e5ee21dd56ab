mod common;

use std::{sync::Arc, time::Duration};

use alloy::primitives::{Bytes, LogData};
use deposit_tracker::{
    EventShape, MemoryStore, ShutdownCoordinator, ShutdownOutcome, ShutdownState,
    TerminationSignal, TrackerError,
    test_utils::{MockChain, raw_log},
};
use tokio::sync::mpsc;

use crate::common::{TARGET, deposit, fast_config, setup_tracker, wait_for_line};

#[tokio::test]
async fn signal_after_backfill_exits_gracefully() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.mine_with([deposit(TARGET, 1, 1)]);
    chain.mine(30);
    let setup = setup_tracker(&chain, Arc::new(MemoryStore::new()), fast_config(10))?;
    let (signals, rx) = mpsc::channel(2);
    let mut coordinator = ShutdownCoordinator::new(rx, setup.cancel.clone());

    let handle = setup.spawn();
    let workers = async { handle.await? };
    let interrupt = async {
        wait_for_line(&setup.output, "Historical sync is done").await?;
        signals.send(TerminationSignal::Interrupt).await?;
        anyhow::Ok(())
    };
    let (outcome, sent) = tokio::join!(coordinator.run(workers), interrupt);
    sent?;

    assert!(matches!(outcome, ShutdownOutcome::Graceful));
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(coordinator.state(), ShutdownState::Done);
    assert!(setup.cancel.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn signal_during_backfill_exits_gracefully() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.mine(1_000);
    chain.set_log_latency(Duration::from_millis(20));
    let setup = setup_tracker(&chain, Arc::new(MemoryStore::new()), fast_config(10))?;
    let (signals, rx) = mpsc::channel(2);
    let mut coordinator = ShutdownCoordinator::new(rx, setup.cancel.clone());

    let handle = setup.spawn();
    let terminate = async {
        wait_for_line(&setup.output, "Tracker is ready").await?;
        signals.send(TerminationSignal::Terminate).await?;
        anyhow::Ok(())
    };
    let (outcome, sent) = tokio::join!(coordinator.run(async { handle.await? }), terminate);
    sent?;

    assert!(matches!(outcome, ShutdownOutcome::Graceful));
    assert!(!setup.output.lines().iter().any(|l| l == "Historical sync is done"));
    assert!(chain.log_requests().len() < 100);
    Ok(())
}

#[tokio::test]
async fn second_signal_forces_exit_while_cleanup_hangs() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.mine(5);
    let setup = setup_tracker(&chain, Arc::new(MemoryStore::new()), fast_config(10))?;
    let (signals, rx) = mpsc::channel(2);
    let mut coordinator = ShutdownCoordinator::new(rx, setup.cancel.clone());

    let handle = setup.spawn();
    // cleanup that never finishes after the tracker stops
    let workers = async {
        handle.await??;
        std::future::pending::<()>().await;
        Ok::<_, TrackerError>(())
    };
    let signal_twice = async {
        wait_for_line(&setup.output, "Historical sync is done").await?;
        signals.send(TerminationSignal::Hangup).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        signals.send(TerminationSignal::Interrupt).await?;
        anyhow::Ok(())
    };
    let (outcome, sent) = tokio::join!(coordinator.run(workers), signal_twice);
    sent?;

    assert!(matches!(outcome, ShutdownOutcome::Forced));
    assert_eq!(outcome.exit_code(), 1);
    Ok(())
}

#[tokio::test]
async fn fatal_decode_error_fails_without_signal() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.mine_with([raw_log(
        TARGET,
        0,
        LogData::new_unchecked(vec![EventShape::deposit().selector()], Bytes::new()),
    )]);
    let setup = setup_tracker(&chain, Arc::new(MemoryStore::new()), fast_config(10))?;
    let (_signals, rx) = mpsc::channel(2);
    let mut coordinator = ShutdownCoordinator::new(rx, setup.cancel.clone());

    let handle = setup.spawn();
    let outcome = coordinator.run(async { handle.await? }).await;

    assert!(matches!(outcome, ShutdownOutcome::Failed(TrackerError::Decode { block: 1, .. })));
    assert_eq!(outcome.exit_code(), 1);
    assert!(!setup.cancel.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn unreachable_node_fails_startup() -> anyhow::Result<()> {
    let chain = MockChain::new();
    chain.set_unreachable(true);
    let setup = setup_tracker(&chain, Arc::new(MemoryStore::new()), fast_config(10))?;
    let (_signals, rx) = mpsc::channel(2);
    let mut coordinator = ShutdownCoordinator::new(rx, setup.cancel.clone());

    let handle = setup.spawn();
    let outcome = coordinator.run(async { handle.await? }).await;

    let ShutdownOutcome::Failed(err) = outcome else {
        panic!("expected a failure, got {outcome:?}");
    };
    assert!(err.to_string().starts_with("Failed to start tracker: RPC error"));
    Ok(())
}
