//! Caller-side status polling
//!
//! Drives `Engine::check` on a fixed interval until every unit reaches 100,
//! the observer asks to stop, or an optional deadline passes.

use crate::engine::Engine;
use crate::status::StatusSnapshot;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

/// Why polling ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Every unit reached progress 100
    Quiescent(StatusSnapshot),
    /// The observer returned `ControlFlow::Break`
    Stopped(StatusSnapshot),
    /// The deadline passed first
    TimedOut(StatusSnapshot),
}

impl MonitorOutcome {
    /// Last snapshot taken
    #[must_use]
    pub fn snapshot(&self) -> &StatusSnapshot {
        match self {
            Self::Quiescent(s) | Self::Stopped(s) | Self::TimedOut(s) => s,
        }
    }

    /// Consume into the last snapshot
    #[must_use]
    pub fn into_snapshot(self) -> StatusSnapshot {
        match self {
            Self::Quiescent(s) | Self::Stopped(s) | Self::TimedOut(s) => s,
        }
    }

    /// Whether polling ended at quiescence
    #[inline]
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        matches!(self, Self::Quiescent(_))
    }
}

/// Fixed-interval poll loop over an engine
#[derive(Debug, Clone, Copy)]
pub struct Monitor {
    interval: Duration,
    deadline: Option<Duration>,
}

impl Monitor {
    /// Poll every `interval`
    #[inline]
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Give up after `limit`
    #[inline]
    #[must_use]
    pub fn with_deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }

    /// Poll interval
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until quiescence, discarding intermediate snapshots
    pub fn wait(&self, engine: &mut Engine) -> MonitorOutcome {
        self.poll(engine, |_| ControlFlow::Continue(()))
    }

    /// Poll the engine, handing each snapshot to `observer`
    ///
    /// The first check happens immediately; later ones follow `interval`.
    pub fn poll<F>(&self, engine: &mut Engine, mut observer: F) -> MonitorOutcome
    where
        F: FnMut(&StatusSnapshot) -> ControlFlow<()>,
    {
        let started = Instant::now();
        let mut polls = 0_u64;

        loop {
            let snapshot = engine.check();
            polls += 1;
            tracing::debug!(
                polls,
                complete = snapshot.completed_count(),
                total = snapshot.len(),
                "polled engine status"
            );

            if observer(&snapshot).is_break() {
                return MonitorOutcome::Stopped(snapshot);
            }
            if snapshot.is_quiescent() {
                return MonitorOutcome::Quiescent(snapshot);
            }
            if let Some(limit) = self.deadline {
                if started.elapsed() >= limit {
                    tracing::warn!(?limit, "gave up waiting for migration units");
                    return MonitorOutcome::TimedOut(snapshot);
                }
            }

            std::thread::sleep(self.interval);
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
