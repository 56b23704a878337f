//! Contracts the engine consumes from the migration layer
//!
//! A `UnitOfWork` migrates exactly one workflow. A `UnitLoader` decides which
//! implementation to build for a given workflow. The engine knows nothing
//! else about what a migration does.

use crate::context::SharedContext;
use crate::error::{BoxError, LoadError};
use crate::status::PROGRESS_DONE;
use crate::types::WorkflowId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One independently runnable migration job
///
/// `progress` and `error` are read from the caller's thread while `run`
/// executes on a pool thread, so implementations must keep them behind
/// thread-safe cells (see `UnitState`).
#[async_trait::async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    /// Workflow this unit migrates
    fn workflow_id(&self) -> WorkflowId;

    /// Execute the migration
    ///
    /// `cancel` fires when the engine is closed immediately; long-running
    /// units should observe it and unwind. Returning `Err` or panicking is
    /// an uncaught fault that the engine records against this unit.
    async fn run(&self, cancel: CancellationToken) -> Result<(), BoxError>;

    /// Current progress in 0..=100
    fn progress(&self) -> u8;

    /// Failure the unit caught and reported on its own
    fn error(&self) -> Option<String>;

    /// Release held resources (connections to source or target system)
    ///
    /// Must be idempotent.
    fn release(&self) {}
}

/// Resolves the unit implementation to run for a workflow
pub trait UnitLoader: Send + Sync {
    /// Build a fresh unit bound to `workflow_id`
    ///
    /// # Errors
    /// Returns `LoadError` when no unit can migrate the workflow
    fn load(
        &self,
        workflow_id: WorkflowId,
        context: &SharedContext,
    ) -> Result<Arc<dyn UnitOfWork>, LoadError>;
}

impl<F> UnitLoader for F
where
    F: Fn(WorkflowId, &SharedContext) -> Result<Arc<dyn UnitOfWork>, LoadError> + Send + Sync,
{
    fn load(
        &self,
        workflow_id: WorkflowId,
        context: &SharedContext,
    ) -> Result<Arc<dyn UnitOfWork>, LoadError> {
        self(workflow_id, context)
    }
}

/// Progress and error cell for unit implementations
///
/// Progress only moves forward and is clamped to 100. Once the unit has
/// finished (progress 100) the cell is frozen.
#[derive(Debug, Default)]
pub struct UnitState {
    progress: AtomicU8,
    error: Mutex<Option<String>>,
}

impl UnitState {
    /// Create a cell at progress 0
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current progress
    #[inline]
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Acquire)
    }

    /// Current self-reported error
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Whether progress reached 100
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.progress() >= PROGRESS_DONE
    }

    /// Raise progress to `value`; lower values are ignored
    ///
    /// Returns the progress after the update.
    pub fn advance(&self, value: u8) -> u8 {
        let value = value.min(PROGRESS_DONE);
        let previous = self.progress.fetch_max(value, Ordering::AcqRel);
        previous.max(value)
    }

    /// Mark the unit done
    pub fn complete(&self) {
        self.advance(PROGRESS_DONE);
    }

    /// Record a caught failure and mark the unit done
    ///
    /// Ignored when the unit already finished.
    pub fn fail(&self, message: impl Into<String>) {
        let mut error = self.error.lock();
        if self.is_finished() {
            return;
        }
        *error = Some(message.into());
        self.progress.store(PROGRESS_DONE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop {
        id: WorkflowId,
        state: UnitState,
    }

    #[async_trait::async_trait]
    impl UnitOfWork for Noop {
        fn workflow_id(&self) -> WorkflowId {
            self.id
        }

        async fn run(&self, _cancel: CancellationToken) -> Result<(), BoxError> {
            self.state.complete();
            Ok(())
        }

        fn progress(&self) -> u8 {
            self.state.progress()
        }

        fn error(&self) -> Option<String> {
            self.state.error()
        }
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let state = UnitState::new();
        assert_eq!(state.advance(30), 30);
        assert_eq!(state.advance(10), 30);
        assert_eq!(state.advance(180), 100);
        assert!(state.is_finished());
    }

    #[test]
    fn fail_forces_completion_once() {
        let state = UnitState::new();
        state.advance(40);
        state.fail("target rejected job");
        assert_eq!(state.progress(), 100);
        assert_eq!(state.error().as_deref(), Some("target rejected job"));

        state.fail("second failure");
        assert_eq!(state.error().as_deref(), Some("target rejected job"));
    }

    #[test]
    fn finished_state_ignores_failure() {
        let state = UnitState::new();
        state.complete();
        state.fail("late");
        assert!(state.error().is_none());
    }

    #[test]
    fn closures_act_as_loaders() {
        let loader =
            |id: WorkflowId, _ctx: &SharedContext| -> Result<Arc<dyn UnitOfWork>, LoadError> {
                if id.get() == 0 {
                    return Err(LoadError::UnknownWorkflow(id));
                }
                Ok(Arc::new(Noop {
                    id,
                    state: UnitState::new(),
                }))
            };

        let ctx = SharedContext::new();
        let unit = loader.load(WorkflowId(4), &ctx).unwrap();
        assert_eq!(unit.workflow_id(), WorkflowId(4));
        assert_eq!(unit.progress(), 0);
        assert!(loader.load(WorkflowId(0), &ctx).is_err());
    }

    #[tokio::test]
    async fn noop_unit_runs_to_completion() {
        let unit = Noop {
            id: WorkflowId(1),
            state: UnitState::new(),
        };
        unit.run(CancellationToken::new()).await.unwrap();
        assert_eq!(unit.progress(), 100);
        assert!(unit.error().is_none());
        unit.release();
    }
}
