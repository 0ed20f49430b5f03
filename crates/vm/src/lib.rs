//! Mission script runtime
//!
//! Holds the object model (`Spacecraft`, `Propagator` and generic objects),
//! the per-job execution context, the single-node executor and the
//! [`ScriptEngine`] that runs validated scripts as cancellable background
//! jobs.

pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod objects;

pub use context::ScriptExecutionContext;
pub use engine::ScriptEngine;
pub use error::{Result, VMError};
pub use events::{ChannelEventPublisher, EventPublisher, ScriptEvent, TracingEventPublisher};
pub use executor::CommandExecutor;
pub use job::{JobStatus, ScriptJob};
pub use objects::{GenericObject, Propagator, ScriptObject, Spacecraft};
pub use tokio_util::sync::CancellationToken;
