use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mscript_common::{init_logging, EngineConfig};
use mscript_dsl::{Diagnostic, ScriptParser, ScriptValidator};
use mscript_vm::{ChannelEventPublisher, JobStatus, ScriptEngine, ScriptEvent, VMError};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file (defaults to MSCRIPT_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "mscript_vm=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a script and print its AST summary
    Parse {
        /// Script file
        file: PathBuf,
        /// Print the full parse result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse and validate a script; exits non-zero on errors
    Validate {
        /// Script file
        file: PathBuf,
    },
    /// Run a script to completion and print its output log
    Run {
        /// Script file
        file: PathBuf,
        /// User the job runs as
        #[arg(long, default_value = "cli")]
        user: String,
    },
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::from_env()?,
    };
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_diagnostics(errors: &[Diagnostic], warnings: &[Diagnostic]) {
    for diagnostic in errors.iter().chain(warnings) {
        eprintln!("{}", diagnostic);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config)?;
    debug!(?config, "configuration loaded");

    match &cli.command {
        Commands::Parse { file, json } => {
            let parsed = ScriptParser::parse_script(&read_script(file)?);
            if *json {
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            } else {
                for node in &parsed.ast {
                    println!(
                        "{:>4}  {:<10} {}",
                        node.line_number,
                        node.command.keyword(),
                        node.raw_text.trim()
                    );
                }
                println!(
                    "{} lines, {} commands, {} errors",
                    parsed.line_count,
                    parsed.command_count,
                    parsed.errors.len()
                );
                print_diagnostics(&parsed.errors, &parsed.warnings);
            }
        }
        Commands::Validate { file } => {
            let parsed = ScriptParser::parse_script(&read_script(file)?);
            let result = ScriptValidator::validate_parsed(&parsed);
            print_diagnostics(&result.errors, &result.warnings);
            if !result.is_valid {
                bail!("{} failed validation with {} error(s)", file.display(), result.errors.len());
            }
            println!("{}: valid ({} warning(s))", file.display(), result.warnings.len());
        }
        Commands::Run { file, user } => run(&config, file, user).await?,
    }

    Ok(())
}

async fn run(config: &EngineConfig, file: &Path, user: &str) -> Result<()> {
    let content = read_script(file)?;
    let (publisher, mut events) = ChannelEventPublisher::channel(config.event_buffer);
    let engine = ScriptEngine::new(config, Arc::new(publisher));

    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ScriptEvent::ExecutionStarted { job_id, .. } => info!(%job_id, "started"),
                ScriptEvent::ExecutionCompleted { job_id, execution_time_ms, .. } => {
                    info!(%job_id, execution_time_ms, "completed")
                }
                ScriptEvent::ExecutionFailed { job_id, line_number, error_message } => {
                    warn!(%job_id, line_number, error = %error_message, "failed")
                }
            }
        }
    });

    let job = match engine.execute_script(&content, user, None).await {
        Ok(job) => job,
        Err(VMError::ValidationFailed(job)) => {
            print_diagnostics(&job.errors, &[]);
            bail!("{} failed validation", file.display());
        }
        Err(e) => return Err(e.into()),
    };

    let finished = {
        let wait = engine.wait_for_job(job.id);
        tokio::pin!(wait);
        tokio::select! {
            result = &mut wait => result?,
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = engine.cancel_job(job.id) {
                    debug!(error = %e, "job finished before cancellation");
                }
                wait.await?
            }
        }
    };

    drop(engine);
    let _ = event_log.await;

    for line in &finished.output_log {
        println!("{}", line);
    }
    print_diagnostics(&finished.errors, &[]);

    match finished.status {
        JobStatus::Completed => {
            println!("Completed in {} ms", finished.execution_time_ms);
            Ok(())
        }
        status => bail!("job {} ended {}", finished.id, status),
    }
}
