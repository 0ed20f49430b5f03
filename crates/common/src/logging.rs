use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` wins over `config.log_level`. When `log_dir` is set a second,
/// daily-rolling file layer is added next to the console layer.
pub fn init_logging(config: &EngineConfig) -> Result<()> {
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    let console_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(env_filter());

    let file_layer = config.log_dir.as_ref().map(|dir| {
        let file_appender = tracing_appender::rolling::daily(dir, "mscript.log");
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .with_writer(file_appender)
            .with_filter(env_filter())
    });

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::other(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Console-only tracing for tests and tools. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
