//! Status records handed to engine callers
//!
//! A `StatusSnapshot` is a copy taken by `Engine::check`; the engine never
//! touches it again after returning it.

use crate::types::WorkflowId;
use serde::{Deserialize, Serialize};

/// Progress value that marks a unit as finished
pub const PROGRESS_DONE: u8 = 100;

/// Point-in-time status of one unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrateStatus {
    /// Workflow the unit migrates
    pub workflow_id: WorkflowId,
    /// Progress in 0..=100
    pub progress: u8,
    /// Terminal error, if the unit failed
    pub error_message: Option<String>,
}

impl MigrateStatus {
    /// Create a status entry
    #[inline]
    #[must_use]
    pub fn new(workflow_id: WorkflowId, progress: u8, error_message: Option<String>) -> Self {
        Self {
            workflow_id,
            progress: progress.min(PROGRESS_DONE),
            error_message,
        }
    }

    /// Whether the unit has reached 100, successfully or not
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.progress >= PROGRESS_DONE
    }

    /// Whether the unit ended with an error
    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.error_message.is_some()
    }
}

impl std::fmt::Display for MigrateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MigrateStatus: WorkflowId({}) progress({}) errorMessage({})",
            self.workflow_id,
            self.progress,
            self.error_message.as_deref().unwrap_or("null")
        )
    }
}

/// Statuses of every tracked unit, in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusSnapshot {
    entries: Vec<MigrateStatus>,
}

impl StatusSnapshot {
    /// Build a snapshot from entries in submission order
    #[inline]
    #[must_use]
    pub fn new(entries: Vec<MigrateStatus>) -> Self {
        Self { entries }
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no units are tracked
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in submission order
    pub fn iter(&self) -> std::slice::Iter<'_, MigrateStatus> {
        self.entries.iter()
    }

    /// All entries
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[MigrateStatus] {
        &self.entries
    }

    /// First entry for a workflow
    #[must_use]
    pub fn get(&self, workflow_id: WorkflowId) -> Option<&MigrateStatus> {
        self.entries.iter().find(|s| s.workflow_id == workflow_id)
    }

    /// Number of entries at 100
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.entries.iter().filter(|s| s.is_finished()).count()
    }

    /// Entries carrying an error
    pub fn failed(&self) -> impl Iterator<Item = &MigrateStatus> {
        self.entries.iter().filter(|s| s.is_failed())
    }

    /// Whether every entry has reached 100 (true when empty)
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.entries.iter().all(MigrateStatus::is_finished)
    }

    /// Render as JSON
    ///
    /// # Errors
    /// Returns the serializer error, which cannot occur for these field types
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Consume into the underlying entries
    #[inline]
    #[must_use]
    pub fn into_entries(self) -> Vec<MigrateStatus> {
        self.entries
    }
}

impl IntoIterator for StatusSnapshot {
    type Item = MigrateStatus;
    type IntoIter = std::vec::IntoIter<MigrateStatus>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a StatusSnapshot {
    type Item = &'a MigrateStatus;
    type IntoIter = std::slice::Iter<'a, MigrateStatus>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
