//! Simulated migration units
//!
//! Stand-ins for real workflow migrations, used by the CLI to exercise the
//! engine end to end. Each unit walks through a fixed number of steps with a
//! delay per step and can be scripted to fail, panic, or stop on a missing
//! target plugin.

use crate::context::SharedContext;
use crate::error::{BoxError, LoadError};
use crate::types::WorkflowId;
use crate::unit::{UnitLoader, UnitOfWork, UnitState};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Context key holding the plugin set of the target system
pub const KNOWN_PLUGINS_KEY: &str = "known_plugins";

/// Plugins every simulated target system provides
const DEFAULT_PLUGINS: &[&str] = &["git", "maven", "shell", "junit"];

/// Plugin a simulated workflow needs
const REQUIRED_PLUGIN: &str = "git";

/// How simulated workflows behave
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    /// Steps per workflow
    pub steps: u8,
    /// Delay per step
    pub step_delay: Duration,
    /// Workflows whose run returns an error mid-way
    pub failing: BTreeSet<WorkflowId>,
    /// Workflows whose run panics mid-way
    pub panicking: BTreeSet<WorkflowId>,
    /// Workflows the loader does not know
    pub unknown: BTreeSet<WorkflowId>,
    /// Workflows needing a plugin the target lacks
    pub missing_plugin: BTreeSet<WorkflowId>,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            steps: 5,
            step_delay: Duration::from_millis(100),
            failing: BTreeSet::new(),
            panicking: BTreeSet::new(),
            unknown: BTreeSet::new(),
            missing_plugin: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Complete,
    Fail,
    Panic,
}

/// One simulated workflow migration
#[derive(Debug)]
pub struct SimulatedMigration {
    workflow_id: WorkflowId,
    steps: u8,
    step_delay: Duration,
    outcome: Outcome,
    required_plugin: String,
    known_plugins: Arc<BTreeSet<String>>,
    state: UnitState,
    released: AtomicBool,
}

impl SimulatedMigration {
    /// Whether `release` has been called
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn progress_after(&self, step: u8) -> u8 {
        let steps = u16::from(self.steps.max(1));
        let done = u16::from(step) * 100 / steps;
        u8::try_from(done.min(100)).unwrap_or(100)
    }
}

#[async_trait::async_trait]
impl UnitOfWork for SimulatedMigration {
    fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), BoxError> {
        if !self.known_plugins.contains(&self.required_plugin) {
            self.state.fail(format!(
                "target needs plugin {} in order for this workflow to migrate",
                self.required_plugin
            ));
            return Ok(());
        }

        let midpoint = self.steps / 2;
        for step in 1..=self.steps {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(
                        workflow_id = %self.workflow_id,
                        step,
                        "simulation interrupted"
                    );
                    return Err("migration interrupted".into());
                }
                () = tokio::time::sleep(self.step_delay) => {}
            }

            if step > midpoint {
                match self.outcome {
                    Outcome::Fail => {
                        return Err(format!("step {step} rejected by target").into());
                    }
                    Outcome::Panic => panic!("step {step} hit an unexpected step type"),
                    Outcome::Complete => {}
                }
            }
            self.state.advance(self.progress_after(step));
        }

        self.state.complete();
        Ok(())
    }

    fn progress(&self) -> u8 {
        self.state.progress()
    }

    fn error(&self) -> Option<String> {
        self.state.error()
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            tracing::trace!(workflow_id = %self.workflow_id, "released simulated connections");
        }
    }
}

/// Builds `SimulatedMigration` units from a plan
#[derive(Debug, Clone, Default)]
pub struct SimulatedLoader {
    plan: SimulationPlan,
}

impl SimulatedLoader {
    /// Create a loader for `plan`
    #[inline]
    #[must_use]
    pub fn new(plan: SimulationPlan) -> Self {
        Self { plan }
    }

    /// The plan in use
    #[inline]
    #[must_use]
    pub fn plan(&self) -> &SimulationPlan {
        &self.plan
    }
}

impl UnitLoader for SimulatedLoader {
    fn load(
        &self,
        workflow_id: WorkflowId,
        context: &SharedContext,
    ) -> Result<Arc<dyn UnitOfWork>, LoadError> {
        if self.plan.unknown.contains(&workflow_id) {
            return Err(LoadError::UnknownWorkflow(workflow_id));
        }

        let known_plugins = context
            .get_or_insert_with(KNOWN_PLUGINS_KEY, || {
                tracing::debug!("loading target plugin list");
                DEFAULT_PLUGINS
                    .iter()
                    .map(|p| (*p).to_string())
                    .collect::<BTreeSet<String>>()
            })
            .ok_or_else(|| LoadError::Unsupported {
                workflow_id,
                reason: format!("context key {KNOWN_PLUGINS_KEY} holds an unexpected type"),
            })?;

        let outcome = if self.plan.panicking.contains(&workflow_id) {
            Outcome::Panic
        } else if self.plan.failing.contains(&workflow_id) {
            Outcome::Fail
        } else {
            Outcome::Complete
        };

        let required_plugin = if self.plan.missing_plugin.contains(&workflow_id) {
            format!("{REQUIRED_PLUGIN}-enterprise")
        } else {
            REQUIRED_PLUGIN.to_string()
        };

        Ok(Arc::new(SimulatedMigration {
            workflow_id,
            steps: self.plan.steps.max(1),
            step_delay: self.plan.step_delay,
            outcome,
            required_plugin,
            known_plugins,
            state: UnitState::new(),
            released: AtomicBool::new(false),
        }))
    }
}
