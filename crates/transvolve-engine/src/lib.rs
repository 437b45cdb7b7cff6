//! Requirement-driven systems and the tick engine for Transvolve.
//!
//! A [`System`] watches the entities of a source [`transvolve_core::EntityManager`]
//! that own every component type it requires and runs its executor on them
//! at most once per interval. The [`Engine`] owns the primary manager and
//! ticks its systems in registration order on a tokio timer. Everything runs
//! on one thread inside a [`tokio::task::LocalSet`].

/// Configuration types for engines and systems.
pub mod config;
/// Contexts handed to executors.
pub mod context;
/// The engine lifecycle and tick loop.
pub mod engine;
/// Error types for the engine crate.
pub mod error;
/// Systems, their builder, and execution results.
pub mod system;

/// Re-exports of [`config::EngineConfig`] and [`config::SystemConfig`].
pub use config::{EngineConfig, SystemConfig};
/// Re-exports of the executor context types.
pub use context::{EngineContext, ExecutionContext, ScopeView, TimeInfo};
/// Re-exports of the engine types.
pub use engine::{Engine, EngineChannel, EngineEvent, EngineState};
/// Re-exports of [`error::EngineError`] and [`error::EngineResult`].
pub use error::{EngineError, EngineResult};
/// Re-exports of the system types.
pub use system::{Execution, ExecutorFuture, System, SystemBuilder, SystemChannel, SystemEvent};
