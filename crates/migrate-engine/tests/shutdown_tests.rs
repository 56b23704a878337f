//! Shutdown Tests
//!
//! Graceful and immediate close, drop without close, and closing from
//! inside an async context.

use migrate_engine::prelude::*;
use migrate_test_utils::{engine_with, ids, wait_for, Behavior, ScriptedLoader};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_graceful_close_waits_for_every_run() {
    let loader = ScriptedLoader::new()
        .with_step_delay(Duration::from_millis(20))
        .into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[1, 2, 3, 4, 5, 6]), 2).unwrap();
    engine.close(ShutdownMode::Graceful);

    assert!(!engine.is_running());
    assert_eq!(engine.tracked_count(), 0);
    assert_eq!(loader.probe().active(), 0);
    for unit in loader.loaded() {
        assert_eq!(unit.runs_started(), 1, "workflow {}", unit.workflow_id());
        assert_eq!(unit.runs_finished(), 1);
        assert_eq!(unit.progress(), 100);
        assert_eq!(unit.releases(), 1);
    }
}

#[test]
fn test_graceful_close_blocks_until_gate_opens() {
    let loader = ScriptedLoader::new()
        .with(1, Behavior::WaitForGate)
        .with(2, Behavior::WaitForGate)
        .into_shared();
    let mut engine = engine_with(&loader);
    engine.start(&ids(&[1, 2]), 2).unwrap();

    let opener = {
        let loader = loader.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            loader.open_gate();
        })
    };

    let started = Instant::now();
    engine.close(ShutdownMode::Graceful);
    assert!(started.elapsed() >= Duration::from_millis(40));
    opener.join().unwrap();

    for unit in loader.loaded() {
        assert_eq!(unit.progress(), 100);
        assert_eq!(unit.releases(), 1);
    }
}

#[test]
fn test_immediate_close_interrupts_running_units() {
    let loader = ScriptedLoader::new()
        .with(1, Behavior::BlockUntilCancelled)
        .with(2, Behavior::BlockUntilCancelled)
        .with(3, Behavior::BlockUntilCancelled)
        .into_shared();
    let mut engine = engine_with(&loader);
    engine.start(&ids(&[1, 2, 3]), 3).unwrap();
    assert!(wait_for(TIMEOUT, || loader.probe().active() == 3));

    let started = Instant::now();
    engine.close(ShutdownMode::Immediate);
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(loader.probe().active(), 0);
    for unit in loader.loaded() {
        assert_eq!(unit.runs_finished(), unit.runs_started());
        assert_eq!(unit.releases(), 1);
    }
}

#[test]
fn test_immediate_close_drops_queued_units() {
    let loader = ScriptedLoader::new()
        .with(1, Behavior::BlockUntilCancelled)
        .with(2, Behavior::BlockUntilCancelled)
        .with(3, Behavior::BlockUntilCancelled)
        .into_shared();
    let mut engine = engine_with(&loader);
    engine.start(&ids(&[1, 2, 3]), 1).unwrap();
    assert!(wait_for(TIMEOUT, || loader.probe().active() == 1));

    engine.close(ShutdownMode::Immediate);

    assert!(!engine.is_running());
    assert_eq!(engine.check().len(), 0);
    for unit in loader.loaded() {
        assert_eq!(unit.runs_finished(), unit.runs_started());
        assert_eq!(unit.releases(), 1);
    }
}

#[test]
fn test_close_is_repeatable() {
    let loader = ScriptedLoader::new().into_shared();
    let mut engine = engine_with(&loader);

    engine.close(ShutdownMode::Graceful);
    engine.start(&ids(&[1]), 1).unwrap();
    engine.close(ShutdownMode::Immediate);
    engine.close(ShutdownMode::Immediate);
    engine.shutdown();

    assert!(!engine.is_running());
    assert_eq!(loader.unit(1).unwrap().releases(), 1);
}

#[test]
fn test_drop_without_close_cancels_units() {
    let loader = ScriptedLoader::new()
        .with(1, Behavior::BlockUntilCancelled)
        .into_shared();
    {
        let mut engine = engine_with(&loader);
        engine.start(&ids(&[1]), 1).unwrap();
        assert!(wait_for(TIMEOUT, || loader.probe().active() == 1));
    }

    let unit = loader.unit(1).unwrap();
    assert!(wait_for(TIMEOUT, || unit.runs_finished() == 1));
}

#[test]
fn test_drop_without_close_releases_settled_units() {
    let loader = ScriptedLoader::new()
        .with(3, Behavior::BlockUntilCancelled)
        .into_shared();
    {
        let mut engine = engine_with(&loader);
        engine.start(&ids(&[1, 2, 3]), 3).unwrap();
        assert!(wait_for(TIMEOUT, || {
            loader.unit(1).is_some_and(|u| u.runs_finished() == 1)
                && loader.unit(2).is_some_and(|u| u.runs_finished() == 1)
                && loader.probe().active() == 1
        }));
        // the task ends just after the run body returns
        std::thread::sleep(Duration::from_millis(100));
    }

    let releases: Vec<usize> = loader.loaded().iter().map(|u| u.releases()).collect();
    assert_eq!(releases, vec![1, 1, 0]);
}

#[tokio::test]
async fn test_close_from_async_context() {
    let loader = ScriptedLoader::new()
        .with_step_delay(Duration::from_millis(5))
        .into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[1, 2]), 2).unwrap();
    engine.close(ShutdownMode::Graceful);

    for unit in loader.loaded() {
        assert_eq!(unit.progress(), 100);
    }
}

#[tokio::test]
async fn test_drop_from_async_context() {
    let loader = ScriptedLoader::new()
        .with(1, Behavior::BlockUntilCancelled)
        .into_shared();
    let mut engine = engine_with(&loader);
    engine.start(&ids(&[1]), 1).unwrap();
    drop(engine);
}
