//! Migration Engine - bounded concurrent workflow migration
//!
//! Drives many independent per-workflow migration jobs through a fixed-size
//! worker pool:
//! - Submits one unit of work per workflow (`Engine::start`)
//! - Reports live progress and per-unit failures (`Engine::check`)
//! - Shuts down gracefully or immediately (`Engine::close`)
//!
//! What a migration actually does lives behind two small contracts:
//! [`UnitOfWork`] and [`UnitLoader`].
//!
//! # Example
//!
//! ```rust,ignore
//! use migrate_engine::prelude::*;
//! use std::sync::Arc;
//!
//! let loader = SimulatedLoader::new(SimulationPlan::default());
//! let mut engine = Engine::new(Arc::new(loader));
//!
//! engine.start(&[WorkflowId(1), WorkflowId(2), WorkflowId(3)], 2)?;
//! let outcome = Monitor::new(engine.config().poll_interval()).wait(&mut engine);
//! for status in outcome.snapshot() {
//!     println!("{status}");
//! }
//! engine.shutdown();
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod simulate;
pub mod status;
pub mod types;
pub mod unit;

pub use config::EngineConfig;
pub use context::SharedContext;
pub use engine::Engine;
pub use error::{BoxError, ConfigError, EngineError, LoadError, MigrateError, UnitFault};
pub use monitor::{Monitor, MonitorOutcome};
pub use status::{MigrateStatus, StatusSnapshot, PROGRESS_DONE};
pub use types::{ShutdownMode, UnitHandle, WorkflowId};
pub use unit::{UnitLoader, UnitOfWork, UnitState};

/// Re-exported so unit implementations name the same token type as the engine
pub use tokio_util::sync::CancellationToken;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the engine and writing units
    pub use crate::simulate::{SimulatedLoader, SimulationPlan};
    pub use crate::{
        BoxError, CancellationToken, Engine, EngineConfig, EngineError, LoadError, MigrateStatus,
        Monitor, MonitorOutcome, SharedContext, ShutdownMode, StatusSnapshot, UnitLoader,
        UnitOfWork, UnitState, WorkflowId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
