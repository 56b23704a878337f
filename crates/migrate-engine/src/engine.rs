//! Bounded concurrent migration engine
//!
//! The engine runs one `UnitOfWork` per requested workflow on a fixed-size
//! pool and exposes a poll-based status interface:
//!
//! ```text
//! CREATED --start--> RUNNING --start--> RUNNING (pool reused)
//! RUNNING --check--> RUNNING (status refreshed, finished units reaped)
//! RUNNING --close--> CREATED (pool discarded; next start builds a new one)
//! ```
//!
//! `start`, `check`, and `close` are meant to be driven by a single owner
//! (a CLI loop or a UI timer). Unit faults never escape `check`; they are
//! recorded against the faulting unit and surface in its status entry.
//!
//! # Pool
//!
//! The pool is a dedicated multi-thread tokio runtime with one worker thread
//! per slot, gated by a semaphore holding one permit per slot. Units beyond
//! the pool size wait for a permit rather than blocking `start`.

use crate::config::EngineConfig;
use crate::context::SharedContext;
use crate::error::{BoxError, EngineError, MigrateError, UnitFault};
use crate::status::{MigrateStatus, StatusSnapshot, PROGRESS_DONE};
use crate::types::{ShutdownMode, UnitHandle, WorkflowId};
use crate::unit::{UnitLoader, UnitOfWork};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

type UnitResult = Result<(), BoxError>;

/// Fixed-size pool backing one engine
struct WorkerPool {
    runtime: Runtime,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    size: usize,
}

impl WorkerPool {
    fn build(size: usize, thread_name: &str) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(size)
            .thread_name(thread_name)
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            permits: Arc::new(Semaphore::new(size)),
            cancel: CancellationToken::new(),
            size,
        })
    }

    fn submit(&self, handle: UnitHandle, unit: Arc<dyn UnitOfWork>) -> JoinHandle<UnitResult> {
        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.clone();
        let span = tracing::info_span!("unit", workflow_id = %unit.workflow_id(), %handle);

        self.runtime.spawn(
            async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| BoxError::from("worker pool shut down"))?;
                tracing::debug!("unit started");
                unit.run(cancel).await
            }
            .instrument(span),
        )
    }

    fn interrupt(&self) {
        self.cancel.cancel();
    }

    fn discard(self) {
        self.runtime.shutdown_background();
    }
}

/// A submitted unit and what the engine learned about it
struct TrackedUnit {
    workflow_id: WorkflowId,
    unit: Arc<dyn UnitOfWork>,
    fault: Option<MigrateError>,
    released: bool,
}

impl TrackedUnit {
    fn new(workflow_id: WorkflowId, unit: Arc<dyn UnitOfWork>) -> Self {
        Self {
            workflow_id,
            unit,
            fault: None,
            released: false,
        }
    }

    /// Engine-recorded faults win; a unit's own error shows once it is done
    fn status(&self) -> MigrateStatus {
        if let Some(fault) = &self.fault {
            return MigrateStatus::new(self.workflow_id, PROGRESS_DONE, Some(fault.to_string()));
        }

        let progress = self.unit.progress().min(PROGRESS_DONE);
        let error_message = if progress == PROGRESS_DONE {
            self.unit.error()
        } else {
            None
        };
        MigrateStatus::new(self.workflow_id, progress, error_message)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.unit.release();
        }
    }
}

/// Bounded concurrent driver for migration units
///
/// # Example
///
/// ```rust,ignore
/// let mut engine = Engine::new(Arc::new(MyLoader::default()));
/// engine.start(&[WorkflowId(1), WorkflowId(2)], 2)?;
///
/// let mut status = engine.check();
/// while !status.is_quiescent() {
///     std::thread::sleep(engine.config().poll_interval());
///     status = engine.check();
/// }
/// engine.shutdown();
/// ```
pub struct Engine {
    config: EngineConfig,
    loader: Arc<dyn UnitLoader>,
    context: SharedContext,
    pool: Option<WorkerPool>,
    units: BTreeMap<UnitHandle, TrackedUnit>,
    tasks: HashMap<UnitHandle, JoinHandle<UnitResult>>,
    next_handle: u64,
}

impl Engine {
    /// Create an engine with default configuration
    #[must_use]
    pub fn new(loader: Arc<dyn UnitLoader>) -> Self {
        Self {
            config: EngineConfig::default(),
            loader,
            context: SharedContext::new(),
            pool: None,
            units: BTreeMap::new(),
            tasks: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Create an engine with custom configuration
    ///
    /// # Errors
    /// Returns `EngineError::InvalidConfiguration` if the configuration is invalid
    pub fn with_config(
        loader: Arc<dyn UnitLoader>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let mut engine = Self::new(loader);
        engine.config = config;
        Ok(engine)
    }

    /// Replace the shared context handed to the loader
    #[must_use]
    pub fn with_context(mut self, context: SharedContext) -> Self {
        self.context = context;
        self
    }

    /// Submit one unit per workflow to the pool
    ///
    /// The pool is created on the first call and reused afterwards. A reused
    /// pool keeps its original size; a different `concurrency` is ignored with
    /// a warning, or rejected when `strict_concurrency` is configured.
    ///
    /// Returns as soon as every unit is queued.
    ///
    /// # Errors
    /// - `EngineError::InvalidConfiguration` if `concurrency` is 0
    /// - `EngineError::ConcurrencyMismatch` in strict mode on a size mismatch
    /// - `EngineError::PoolUnavailable` if the pool cannot be built
    /// - `EngineError::SubmissionFailure` if a unit cannot be loaded; units
    ///   submitted earlier in the same call keep running
    pub fn start(
        &mut self,
        workflow_ids: &[WorkflowId],
        concurrency: usize,
    ) -> Result<(), EngineError> {
        tracing::info!(workflows = ?workflow_ids, concurrency, "starting migration engine");

        if concurrency == 0 {
            return Err(EngineError::InvalidConfiguration(
                "concurrency must be at least 1".to_string(),
            ));
        }

        if let Some(pool) = &self.pool {
            if pool.size != concurrency {
                if self.config.strict_concurrency {
                    return Err(EngineError::ConcurrencyMismatch {
                        active: pool.size,
                        requested: concurrency,
                    });
                }
                tracing::warn!(
                    active = pool.size,
                    requested = concurrency,
                    "reusing existing pool, requested concurrency ignored"
                );
            }
        }

        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => {
                tracing::debug!(size = concurrency, "creating worker pool");
                WorkerPool::build(concurrency, &self.config.thread_name)
                    .map_err(EngineError::PoolUnavailable)?
            }
        };
        let pool = self.pool.insert(pool);

        for &workflow_id in workflow_ids {
            let unit = self
                .loader
                .load(workflow_id, &self.context)
                .map_err(|e| submission_failure(workflow_id, e.to_string()))?;

            if unit.workflow_id() != workflow_id {
                return Err(submission_failure(
                    workflow_id,
                    format!("loader returned a unit for workflow {}", unit.workflow_id()),
                ));
            }

            let handle = UnitHandle(self.next_handle);
            self.next_handle += 1;

            tracing::debug!(%workflow_id, %handle, "submitting migration unit");
            let task = pool.submit(handle, Arc::clone(&unit));
            self.units.insert(handle, TrackedUnit::new(workflow_id, unit));
            self.tasks.insert(handle, task);
        }

        tracing::debug!(tracked = self.units.len(), "finished submitting units");
        Ok(())
    }

    /// Submit units using the configured concurrency
    ///
    /// # Errors
    /// Same as [`Engine::start`]
    pub fn start_configured(&mut self, workflow_ids: &[WorkflowId]) -> Result<(), EngineError> {
        let concurrency = self.config.concurrency;
        self.start(workflow_ids, concurrency)
    }

    /// Reap finished units and return the status of every tracked unit
    ///
    /// Never blocks on running units. Completed units are released; units
    /// whose run failed or panicked get a `Migration failure` error and are
    /// reported at progress 100.
    pub fn check(&mut self) -> StatusSnapshot {
        self.reap();
        StatusSnapshot::new(self.units.values().map(TrackedUnit::status).collect())
    }

    /// Shut the pool down and release every unit
    ///
    /// `Graceful` lets queued and running units finish. `Immediate` cancels
    /// queued units and signals running ones to stop. Either way this blocks
    /// until every task has ended; afterwards the engine holds no units and
    /// the next `start` builds a fresh pool. A no-op without a pool.
    pub fn close(&mut self, mode: ShutdownMode) {
        let Some(pool) = self.pool.take() else {
            tracing::debug!("close requested with no pool");
            return;
        };

        tracing::info!(?mode, tracked = self.units.len(), "closing migration engine");

        if mode.is_immediate() {
            pool.interrupt();
            for task in self.tasks.values() {
                task.abort();
            }
        }

        let pending: Vec<_> = self
            .tasks
            .drain()
            .map(|(handle, task)| task.map(move |outcome| (handle, outcome)))
            .collect();
        tracing::debug!(pending = pending.len(), "waiting for pool termination");

        let interrupted = mode.is_immediate();
        for (handle, outcome) in futures::executor::block_on(futures::future::join_all(pending)) {
            self.settle(handle, outcome, interrupted);
        }

        for tracked in self.units.values_mut() {
            tracked.release();
        }
        self.units.clear();
        pool.discard();

        tracing::info!("migration engine closed");
    }

    /// Graceful [`Engine::close`]
    pub fn shutdown(&mut self) {
        self.close(ShutdownMode::Graceful);
    }

    /// Whether a pool exists
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    /// Size of the live pool
    #[inline]
    #[must_use]
    pub fn pool_size(&self) -> Option<usize> {
        self.pool.as_ref().map(|p| p.size)
    }

    /// Number of tracked units
    #[inline]
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.units.len()
    }

    /// Number of units whose task has not been reaped yet
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    /// Tracked workflows in submission order
    #[must_use]
    pub fn workflow_ids(&self) -> Vec<WorkflowId> {
        self.units.values().map(|t| t.workflow_id).collect()
    }

    /// Context shared with the loader
    #[inline]
    #[must_use]
    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn reap(&mut self) {
        let finished: Vec<UnitHandle> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(handle, _)| *handle)
            .collect();

        for handle in finished {
            let Some(mut task) = self.tasks.remove(&handle) else {
                continue;
            };
            match (&mut task).now_or_never() {
                Some(outcome) => self.settle(handle, outcome, false),
                None => {
                    self.tasks.insert(handle, task);
                }
            }
        }
    }

    /// Record how a task ended and release its unit
    ///
    /// With `interrupted` set, faults are units unwinding on request and are
    /// not recorded.
    fn settle(
        &mut self,
        handle: UnitHandle,
        outcome: Result<UnitResult, JoinError>,
        interrupted: bool,
    ) {
        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(UnitFault::from_error(&err)),
            Err(join_err) => match join_err.try_into_panic() {
                Ok(payload) => Some(UnitFault::from_panic(payload.as_ref())),
                Err(_) => {
                    tracing::debug!(%handle, "unit was cancelled");
                    return;
                }
            },
        };

        let Some(tracked) = self.units.get_mut(&handle) else {
            tracing::error!(%handle, "finished task has no tracked unit, skipping");
            return;
        };

        let workflow_id = tracked.workflow_id;
        match fault {
            Some(cause) if interrupted => {
                tracing::debug!(%workflow_id, %handle, %cause, "migration unit stopped on close");
            }
            Some(cause) => {
                let error = MigrateError::failure(cause);
                tracing::error!(%workflow_id, %handle, %error, "migration unit failed");
                tracked.fault = Some(error);
            }
            None => {
                tracing::debug!(%workflow_id, %handle, "migration unit finished");
            }
        }
        tracked.release();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("pool_size", &self.pool_size())
            .field("tracked", &self.units.len())
            .field("pending", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

/// Cancels outstanding work without blocking
///
/// Units whose task already ended are released. Units still running are not:
/// their `run` may still be executing on a pool thread.
impl Drop for Engine {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        tracing::warn!(
            pending = self.tasks.len(),
            "engine dropped without close, cancelling outstanding units"
        );

        let tasks = &self.tasks;
        let settled: Vec<UnitHandle> = self
            .units
            .keys()
            .filter(|handle| tasks.get(*handle).map_or(true, JoinHandle::is_finished))
            .copied()
            .collect();

        pool.interrupt();
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
        for handle in settled {
            if let Some(tracked) = self.units.get_mut(&handle) {
                tracked.release();
            }
        }
        self.units.clear();
        pool.discard();
    }
}

fn submission_failure(workflow_id: WorkflowId, reason: String) -> EngineError {
    tracing::error!(%workflow_id, %reason, "failed to submit migration unit");
    EngineError::SubmissionFailure { workflow_id, reason }
}
