//! Engine lifecycle tests
//!
//! Drives the engine through start / check / close with scripted units.

use migrate_engine::prelude::*;
use migrate_test_utils::{
    engine_with, ids, poll_until, poll_until_quiescent, triples, Behavior, ScriptedLoader,
    ScriptedUnit,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

fn fail_at(progress: u8, message: &str) -> Behavior {
    Behavior::FailAt {
        progress,
        message: message.to_string(),
    }
}

#[test]
fn test_failing_unit_is_reported_alongside_healthy_ones() {
    let loader = ScriptedLoader::new().with(2, fail_at(40, "boom")).into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[1, 2, 3]), 2).unwrap();
    let snapshot = poll_until_quiescent(&mut engine, TIMEOUT);

    assert_eq!(
        triples(&snapshot),
        vec![
            (1, 100, None),
            (2, 100, Some("Migration failure: boom".to_string())),
            (3, 100, None),
        ]
    );
    engine.shutdown();
}

#[test]
fn test_panicking_unit_is_contained() {
    let loader = ScriptedLoader::new()
        .with(
            1,
            Behavior::PanicAt {
                progress: 30,
                message: "kaboom".to_string(),
            },
        )
        .into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[1, 2]), 2).unwrap();
    let snapshot = poll_until_quiescent(&mut engine, TIMEOUT);

    let failed = snapshot.get(WorkflowId(1)).unwrap();
    assert_eq!(failed.progress, 100);
    assert_eq!(failed.error_message.as_deref(), Some("Migration failure: panicked: kaboom"));
    assert_eq!(snapshot.get(WorkflowId(2)).unwrap().error_message, None);
    engine.shutdown();
}

#[test]
fn test_self_reported_error_surfaces_verbatim() {
    let loader = ScriptedLoader::new()
        .with(
            5,
            Behavior::ReportError {
                message: "target needs plugin git".to_string(),
            },
        )
        .into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[5]), 1).unwrap();
    let snapshot = poll_until_quiescent(&mut engine, TIMEOUT);

    assert_eq!(triples(&snapshot), vec![(5, 100, Some("target needs plugin git".to_string()))]);
    engine.shutdown();
}

#[test]
fn test_running_unit_hides_error_until_done() {
    let loader = ScriptedLoader::new().with(1, Behavior::WaitForGate).into_shared();
    let mut engine = engine_with(&loader);
    engine.start(&ids(&[1]), 1).unwrap();

    let snapshot = poll_until(&mut engine, TIMEOUT, |s| s.entries()[0].progress == 10);
    assert_eq!(triples(&snapshot), vec![(1, 10, None)]);
    assert!(!snapshot.is_quiescent());

    loader.open_gate();
    let snapshot = poll_until_quiescent(&mut engine, TIMEOUT);
    assert_eq!(triples(&snapshot), vec![(1, 100, None)]);
    engine.shutdown();
}

#[test]
fn test_snapshot_follows_submission_order_across_starts() {
    let loader = ScriptedLoader::new().into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[9, 3]), 2).unwrap();
    engine.start(&ids(&[7, 3]), 2).unwrap();

    let snapshot = poll_until_quiescent(&mut engine, TIMEOUT);
    let order: Vec<u64> = snapshot.iter().map(|s| s.workflow_id.get()).collect();
    assert_eq!(order, vec![9, 3, 7, 3]);
    assert_eq!(engine.workflow_ids(), ids(&[9, 3, 7, 3]));
    engine.shutdown();
}

#[test]
fn test_check_is_idempotent_once_settled() {
    let loader = ScriptedLoader::new().with(2, fail_at(60, "nope")).into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[1, 2]), 1).unwrap();
    let first = poll_until_quiescent(&mut engine, TIMEOUT);
    let second = engine.check();
    let third = engine.check();

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(engine.pending_count(), 0);
    engine.shutdown();
}

#[test]
fn test_check_on_idle_engine_is_empty() {
    let loader = ScriptedLoader::new().into_shared();
    let mut engine = engine_with(&loader);

    assert!(engine.check().is_empty());
    engine.start(&[], 3).unwrap();
    assert!(engine.check().is_empty());
    assert_eq!(engine.pool_size(), Some(3));
    engine.shutdown();
}

#[test]
fn test_partial_submission_keeps_earlier_units() {
    let loader = ScriptedLoader::new().rejecting(3).into_shared();
    let mut engine = engine_with(&loader);

    let err = engine.start(&ids(&[1, 2, 3, 4]), 2).unwrap_err();
    assert!(matches!(
        err,
        EngineError::SubmissionFailure {
            workflow_id: WorkflowId(3),
            ..
        }
    ));
    assert!(err.to_string().contains("unknown workflow"), "{err}");

    assert_eq!(engine.tracked_count(), 2);
    assert_eq!(loader.load_count(), 2);

    let snapshot = poll_until_quiescent(&mut engine, TIMEOUT);
    assert_eq!(triples(&snapshot), vec![(1, 100, None), (2, 100, None)]);
    engine.shutdown();
}

#[test]
fn test_reused_pool_keeps_original_size() {
    let loader = ScriptedLoader::new().into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[1]), 2).unwrap();
    engine.start(&ids(&[2]), 8).unwrap();

    assert_eq!(engine.pool_size(), Some(2));
    assert_eq!(engine.tracked_count(), 2);
    engine.shutdown();
}

#[test]
fn test_strict_concurrency_rejects_mismatch() {
    let loader = ScriptedLoader::new().into_shared();
    let config = EngineConfig::default().with_strict_concurrency(true);
    let mut engine = Engine::with_config(loader.clone(), config).unwrap();

    engine.start(&ids(&[1]), 2).unwrap();
    let err = engine.start(&ids(&[2]), 3).unwrap_err();

    assert!(matches!(
        err,
        EngineError::ConcurrencyMismatch {
            active: 2,
            requested: 3
        }
    ));
    assert_eq!(engine.tracked_count(), 1);
    engine.shutdown();
}

#[test]
fn test_start_configured_uses_config_concurrency() {
    let loader = ScriptedLoader::new().into_shared();
    let config = EngineConfig::default().with_concurrency(3);
    let mut engine = Engine::with_config(loader.clone(), config).unwrap();

    engine.start_configured(&ids(&[1, 2])).unwrap();
    assert_eq!(engine.pool_size(), Some(3));
    engine.shutdown();
}

#[test]
fn test_invalid_config_is_rejected_up_front() {
    let loader = ScriptedLoader::new().into_shared();
    let config = EngineConfig::default().with_concurrency(0);
    let err = Engine::with_config(loader.clone(), config).unwrap_err();
    assert!(err.is_configuration_error());
}

#[test]
fn test_units_are_released_exactly_once() {
    let loader = ScriptedLoader::new().with(2, fail_at(10, "bad")).into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[1, 2]), 2).unwrap();
    poll_until_quiescent(&mut engine, TIMEOUT);
    engine.check();
    engine.shutdown();

    for unit in loader.loaded() {
        assert_eq!(unit.releases(), 1, "workflow {}", unit.workflow_id());
        assert_eq!(unit.runs_started(), 1);
    }
}

#[test]
fn test_check_releases_settled_units() {
    let loader = ScriptedLoader::new()
        .with(2, fail_at(40, "boom"))
        .with(3, Behavior::WaitForGate)
        .into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[1, 2, 3]), 3).unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while engine.pending_count() > 1 && Instant::now() < deadline {
        engine.check();
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(loader.unit(1).unwrap().releases(), 1);
    assert_eq!(loader.unit(2).unwrap().releases(), 1);
    assert_eq!(loader.unit(3).unwrap().releases(), 0);
    assert_eq!(engine.pending_count(), 1);

    engine.check();
    assert_eq!(loader.unit(1).unwrap().releases(), 1);

    loader.open_gate();
    engine.shutdown();
    for unit in loader.loaded() {
        assert_eq!(unit.releases(), 1, "workflow {}", unit.workflow_id());
    }
}

#[test]
fn test_engine_restarts_after_close() {
    let loader = ScriptedLoader::new().into_shared();
    let mut engine = engine_with(&loader);

    engine.start(&ids(&[1]), 1).unwrap();
    engine.shutdown();
    assert!(!engine.is_running());
    assert_eq!(engine.tracked_count(), 0);

    engine.start(&ids(&[2, 3]), 4).unwrap();
    assert_eq!(engine.pool_size(), Some(4));

    let snapshot = poll_until_quiescent(&mut engine, TIMEOUT);
    assert_eq!(triples(&snapshot), vec![(2, 100, None), (3, 100, None)]);
    engine.shutdown();
}

#[test]
fn test_shared_context_reaches_loader() {
    let context = SharedContext::new();
    context.insert("target", "ci.example.org".to_string());

    let loader = |id: WorkflowId, ctx: &SharedContext| -> Result<Arc<dyn UnitOfWork>, LoadError> {
        let target = ctx
            .get::<String>("target")
            .ok_or(LoadError::UnknownWorkflow(id))?;
        assert_eq!(target.as_str(), "ci.example.org");
        Ok(Arc::new(ScriptedUnit::new(id, Behavior::Complete)))
    };
    let mut engine = Engine::new(Arc::new(loader)).with_context(context);

    engine.start(&ids(&[1]), 1).unwrap();
    let snapshot = poll_until_quiescent(&mut engine, TIMEOUT);
    assert_eq!(triples(&snapshot), vec![(1, 100, None)]);
    engine.shutdown();
}
