//! Error types for the migration engine
//!
//! Engine-level errors (bad configuration, rejected submissions) are returned
//! to the caller of `Engine::start`. Unit-level failures are data: they are
//! captured by `Engine::check` and reported through the status snapshot.

use crate::types::WorkflowId;

/// A boxed error that can be sent across threads
///
/// Returned by `UnitOfWork::run` so implementations can surface any error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned synchronously by the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid engine arguments or configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A unit could not be created or handed to the pool
    #[error("failed to submit workflow {workflow_id}: {reason}")]
    SubmissionFailure {
        /// Workflow whose submission failed
        workflow_id: WorkflowId,
        /// Why the submission failed
        reason: String,
    },

    /// A reused pool was asked for a different size in strict mode
    #[error("pool already running with concurrency {active}, requested {requested}")]
    ConcurrencyMismatch {
        /// Size of the running pool
        active: usize,
        /// Size requested by the caller
        requested: usize,
    },

    /// The worker pool could not be created
    #[error("worker pool unavailable: {0}")]
    PoolUnavailable(#[source] std::io::Error),

    /// Configuration could not be loaded
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Check if the error stems from bad configuration rather than submission
    #[inline]
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::ConcurrencyMismatch { .. } | Self::Config(_)
        )
    }
}

/// Terminal failure recorded against a unit by the engine
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The unit's run terminated with an uncaught fault
    #[error("Migration failure: {cause}")]
    Failure {
        /// What the unit raised
        #[source]
        cause: UnitFault,
    },
}

impl MigrateError {
    /// Wrap a fault raised by a unit
    #[inline]
    #[must_use]
    pub fn failure(cause: UnitFault) -> Self {
        Self::Failure { cause }
    }

    /// The underlying fault
    #[inline]
    #[must_use]
    pub fn cause(&self) -> &UnitFault {
        match self {
            Self::Failure { cause } => cause,
        }
    }
}

/// How a unit's run terminated abnormally
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitFault {
    /// `run` returned an error
    #[error("{0}")]
    Error(String),

    /// `run` panicked
    #[error("panicked: {0}")]
    Panicked(String),
}

impl UnitFault {
    /// Build a fault from the error a unit returned
    #[must_use]
    pub fn from_error(err: &BoxError) -> Self {
        Self::Error(err.to_string())
    }

    /// Build a fault from a panic payload
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }
}

/// Errors raised while resolving a unit for a workflow
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No workflow with this identifier exists
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(WorkflowId),

    /// The workflow exists but cannot be migrated
    #[error("workflow {workflow_id} is not supported: {reason}")]
    Unsupported {
        /// Workflow that was rejected
        workflow_id: WorkflowId,
        /// Why it was rejected
        reason: String,
    },
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The TOML could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// Why it is invalid
        reason: String,
    },
}
