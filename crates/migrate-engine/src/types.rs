//! Core identifiers for the migration engine
//!
//! - `WorkflowId`: caller-supplied identity of the workflow a unit migrates
//! - `UnitHandle`: engine-generated key pairing a unit with its task
//! - `ShutdownMode`: how `Engine::close` treats outstanding work

use serde::{Deserialize, Serialize};
use std::num::ParseIntError;
use std::str::FromStr;

/// Identifier of a workflow to migrate
///
/// Opaque to the engine; supplied by the caller and immutable once submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub u64);

impl WorkflowId {
    /// Create a workflow identifier
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw identifier value
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for WorkflowId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for WorkflowId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arena key assigned to a unit at submission time
///
/// The same handle keys both the tracked unit and its task, so failures are
/// attributed by identity rather than by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitHandle(pub(crate) u64);

impl UnitHandle {
    /// Sequence number of this handle
    #[inline]
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for UnitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shutdown behavior for `Engine::close`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Stop accepting work and let queued and running units finish
    #[default]
    Graceful,
    /// Cancel queued units and interrupt running ones
    Immediate,
}

impl ShutdownMode {
    /// Whether this mode interrupts outstanding work
    #[inline]
    #[must_use]
    pub fn is_immediate(self) -> bool {
        matches!(self, Self::Immediate)
    }
}

impl From<bool> for ShutdownMode {
    fn from(immediate: bool) -> Self {
        if immediate {
            Self::Immediate
        } else {
            Self::Graceful
        }
    }
}
