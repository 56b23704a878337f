//! Testing utilities for the migration engine workspace
//!
//! Scripted units and loaders, plus polling helpers.

#![allow(missing_docs)]

use dashmap::DashMap;
use migrate_engine::prelude::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a scripted unit does when run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Advance to 50, then finish cleanly
    Complete,
    /// Advance to `progress`, then return an error
    FailAt { progress: u8, message: String },
    /// Advance to `progress`, then panic
    PanicAt { progress: u8, message: String },
    /// Finish at 100 with a self-reported error
    ReportError { message: String },
    /// Advance to 10 and wait for the cancellation signal
    BlockUntilCancelled,
    /// Advance to 10 and wait for the loader gate, ignoring cancellation
    WaitForGate,
}

/// Tracks how many units run at once
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ProbeGuard<'a>(&'a ConcurrencyProbe);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

/// Unit whose run follows a `Behavior`
pub struct ScriptedUnit {
    workflow_id: WorkflowId,
    behavior: Behavior,
    step_delay: Duration,
    gate: CancellationToken,
    probe: Arc<ConcurrencyProbe>,
    state: UnitState,
    runs_started: AtomicUsize,
    runs_finished: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedUnit {
    pub fn new(workflow_id: WorkflowId, behavior: Behavior) -> Self {
        Self {
            workflow_id,
            behavior,
            step_delay: Duration::ZERO,
            gate: CancellationToken::new(),
            probe: Arc::new(ConcurrencyProbe::default()),
            state: UnitState::new(),
            runs_started: AtomicUsize::new(0),
            runs_finished: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    pub fn runs_started(&self) -> usize {
        self.runs_started.load(Ordering::SeqCst)
    }

    /// Runs that got past their behavior, including unwinding ones
    pub fn runs_finished(&self) -> usize {
        self.runs_finished.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
    }
}

struct FinishGuard<'a>(&'a AtomicUsize);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl UnitOfWork for ScriptedUnit {
    fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), BoxError> {
        self.runs_started.fetch_add(1, Ordering::SeqCst);
        self.probe.enter();
        let _probe = ProbeGuard(&self.probe);
        let _finished = FinishGuard(&self.runs_finished);

        self.pause().await;
        match &self.behavior {
            Behavior::Complete => {
                self.state.advance(50);
                self.pause().await;
                self.state.complete();
                Ok(())
            }
            Behavior::FailAt { progress, message } => {
                self.state.advance(*progress);
                Err(message.clone().into())
            }
            Behavior::PanicAt { progress, message } => {
                self.state.advance(*progress);
                panic!("{message}");
            }
            Behavior::ReportError { message } => {
                self.state.fail(message.clone());
                Ok(())
            }
            Behavior::BlockUntilCancelled => {
                self.state.advance(10);
                cancel.cancelled().await;
                Err("interrupted".into())
            }
            Behavior::WaitForGate => {
                self.state.advance(10);
                self.gate.cancelled().await;
                self.state.complete();
                Ok(())
            }
        }
    }

    fn progress(&self) -> u8 {
        self.state.progress()
    }

    fn error(&self) -> Option<String> {
        self.state.error()
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loader handing out `ScriptedUnit`s
///
/// Workflows without a scripted behavior complete. Every unit built is kept
/// for inspection.
pub struct ScriptedLoader {
    behaviors: DashMap<WorkflowId, Behavior>,
    rejected: HashSet<WorkflowId>,
    step_delay: Duration,
    gate: CancellationToken,
    probe: Arc<ConcurrencyProbe>,
    loaded: Mutex<Vec<Arc<ScriptedUnit>>>,
}

impl Default for ScriptedLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self {
            behaviors: DashMap::new(),
            rejected: HashSet::new(),
            step_delay: Duration::ZERO,
            gate: CancellationToken::new(),
            probe: Arc::new(ConcurrencyProbe::default()),
            loaded: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with(self, id: u64, behavior: Behavior) -> Self {
        self.behaviors.insert(WorkflowId(id), behavior);
        self
    }

    #[must_use]
    pub fn rejecting(mut self, id: u64) -> Self {
        self.rejected.insert(WorkflowId(id));
        self
    }

    /// Sleep this long before and after the midpoint of each run
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Let every `WaitForGate` unit finish
    pub fn open_gate(&self) {
        self.gate.cancel();
    }

    pub fn probe(&self) -> &ConcurrencyProbe {
        &self.probe
    }

    /// Every unit built so far, in load order
    pub fn loaded(&self) -> Vec<Arc<ScriptedUnit>> {
        self.loaded.lock().clone()
    }

    /// Most recent unit built for `id`
    pub fn unit(&self, id: u64) -> Option<Arc<ScriptedUnit>> {
        self.loaded
            .lock()
            .iter()
            .rev()
            .find(|u| u.workflow_id == WorkflowId(id))
            .cloned()
    }

    pub fn load_count(&self) -> usize {
        self.loaded.lock().len()
    }
}

impl UnitLoader for ScriptedLoader {
    fn load(
        &self,
        workflow_id: WorkflowId,
        _context: &SharedContext,
    ) -> Result<Arc<dyn UnitOfWork>, LoadError> {
        if self.rejected.contains(&workflow_id) {
            return Err(LoadError::UnknownWorkflow(workflow_id));
        }

        let behavior = self
            .behaviors
            .get(&workflow_id)
            .map_or(Behavior::Complete, |b| b.value().clone());

        let mut unit = ScriptedUnit::new(workflow_id, behavior);
        unit.step_delay = self.step_delay;
        unit.gate = self.gate.clone();
        unit.probe = Arc::clone(&self.probe);

        let unit = Arc::new(unit);
        self.loaded.lock().push(Arc::clone(&unit));
        Ok(unit)
    }
}

/// Engine over a shared scripted loader
pub fn engine_with(loader: &Arc<ScriptedLoader>) -> Engine {
    let loader: Arc<dyn UnitLoader> = Arc::clone(loader) as Arc<dyn UnitLoader>;
    Engine::new(loader)
}

pub fn ids(raw: &[u64]) -> Vec<WorkflowId> {
    raw.iter().copied().map(WorkflowId).collect()
}

/// Poll `check` until every unit reaches 100 or `timeout` passes
pub fn poll_until_quiescent(engine: &mut Engine, timeout: Duration) -> StatusSnapshot {
    poll_until(engine, timeout, StatusSnapshot::is_quiescent)
}

/// Poll `check` until `done` holds or `timeout` passes, returning the last snapshot
pub fn poll_until<F>(engine: &mut Engine, timeout: Duration, done: F) -> StatusSnapshot
where
    F: Fn(&StatusSnapshot) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let snapshot = engine.check();
        if done(&snapshot) || Instant::now() >= deadline {
            return snapshot;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Spin until `cond` holds or `timeout` passes
pub fn wait_for<F>(timeout: Duration, cond: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// `(workflow, progress, error)` triples for compact assertions
pub fn triples(snapshot: &StatusSnapshot) -> Vec<(u64, u8, Option<String>)> {
    snapshot
        .iter()
        .map(|s| (s.workflow_id.get(), s.progress, s.error_message.clone()))
        .collect()
}
