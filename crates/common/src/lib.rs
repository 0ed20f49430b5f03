//! Common utilities for the mission scripting engine

pub mod config;
pub mod error;
pub mod logging;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use logging::{init_logging, init_tracing};
