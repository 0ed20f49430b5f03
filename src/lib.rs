//! Mission Script
//!
//! GMAT-style mission scripts: line-oriented parsing, semantic validation
//! and cancellable background execution against an in-memory object model.

/// Module version information
pub mod version {
    /// The current version of the library
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

pub use mscript_common as common;
pub use mscript_dsl as dsl;
pub use mscript_storage as storage;
pub use mscript_vm as vm;

pub use mscript_common::{init_logging, init_tracing, EngineConfig};
pub use mscript_dsl::{
    parse_script, validate_script, AstNode, Command, Diagnostic, ParseResult, ScriptParser,
    ScriptValidator, ScriptValue, ValidationResult,
};
pub use mscript_storage::{MemoryScriptRepository, Script, ScriptRepository};
pub use mscript_vm::{
    CancellationToken, ChannelEventPublisher, EventPublisher, JobStatus, ScriptEngine,
    ScriptEvent, ScriptJob, TracingEventPublisher, VMError,
};
