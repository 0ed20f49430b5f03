//! Asynchronous job runtime
//!
//! `execute_script` validates synchronously, registers the job and returns
//! while the AST runs on a background task, one node at a time. Jobs are
//! tracked only while they run: the task evicts its record and cancellation
//! token once it reaches a terminal state, so late `get_job_status` calls see
//! `NotFound`. The task handle outlives eviction and is collected by
//! `wait_for_job`, which yields the final record.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use mscript_common::EngineConfig;
use mscript_dsl::{
    codes, diagnostics::first_column, AstNode, Diagnostic, ParseResult, ScriptParser,
    ScriptValidator, ValidationResult,
};
use mscript_storage::ScriptRepository;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::ScriptExecutionContext;
use crate::error::{Result, VMError};
use crate::events::{EventPublisher, ScriptEvent};
use crate::executor::CommandExecutor;
use crate::job::{JobStatus, ScriptJob};

type JobMap = DashMap<Uuid, Arc<RwLock<ScriptJob>>>;
type TokenMap = DashMap<Uuid, CancellationToken>;
type CompletionMap = DashMap<Uuid, JoinHandle<ScriptJob>>;

/// Runs scripts as background jobs
#[derive(Clone)]
pub struct ScriptEngine {
    /// Running jobs by id
    jobs: Arc<JobMap>,
    /// Cancellation tokens of running jobs
    cancellations: Arc<TokenMap>,
    /// Task handles of started jobs, kept until `wait_for_job` collects them
    completions: Arc<CompletionMap>,
    publisher: Arc<dyn EventPublisher>,
    executor: Arc<CommandExecutor>,
    repository: Option<Arc<dyn ScriptRepository>>,
}

impl ScriptEngine {
    /// Create a new engine
    pub fn new(config: &EngineConfig, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            completions: Arc::new(DashMap::new()),
            publisher,
            executor: Arc::new(CommandExecutor::new(config.default_step_seconds)),
            repository: None,
        }
    }

    /// Attach a script library for `execute_stored_script`
    pub fn with_repository(mut self, repository: Arc<dyn ScriptRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Parse script text without validating or running it
    pub fn parse_script(&self, content: &str) -> ParseResult {
        ScriptParser::parse_script(content)
    }

    /// Parse and semantically validate script text
    pub fn validate_script(&self, content: &str) -> ValidationResult {
        ScriptValidator::validate_parsed(&ScriptParser::parse_script(content))
    }

    /// Validate and start a script. Returns the job as registered.
    pub async fn execute_script(
        &self,
        content: &str,
        user_id: &str,
        script_id: Option<Uuid>,
    ) -> Result<ScriptJob> {
        self.execute_script_with_cancellation(content, user_id, script_id, None)
            .await
    }

    /// Like `execute_script`, with the job's token a child of `cancellation`
    pub async fn execute_script_with_cancellation(
        &self,
        content: &str,
        user_id: &str,
        script_id: Option<Uuid>,
        cancellation: Option<CancellationToken>,
    ) -> Result<ScriptJob> {
        let parsed = ScriptParser::parse_script(content);
        let validation = ScriptValidator::validate_parsed(&parsed);

        if !validation.is_valid {
            // Built for the caller only, never registered
            let mut job = ScriptJob::new(user_id, script_id);
            job.errors = validation.errors;
            job.transition(JobStatus::Failed)?;
            job.mark_completed_at(Utc::now());
            warn!(
                job_id = %job.id,
                errors = job.errors.len(),
                "script failed validation"
            );
            return Err(VMError::ValidationFailed(Box::new(job)));
        }

        let job = ScriptJob::new(user_id, script_id);
        let job_id = job.id;
        let record = Arc::new(RwLock::new(job.clone()));
        let token = match cancellation {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        self.jobs.insert(job_id, Arc::clone(&record));
        self.cancellations.insert(job_id, token.clone());
        info!(%job_id, user_id, commands = parsed.command_count, "script job queued");

        let run = JobRun {
            job_id,
            script_id,
            record,
            ast: parsed.ast,
            token,
            publisher: Arc::clone(&self.publisher),
            executor: Arc::clone(&self.executor),
        };
        let cleanup = Eviction {
            job_id,
            jobs: Arc::clone(&self.jobs),
            cancellations: Arc::clone(&self.cancellations),
        };
        let task = tokio::spawn(async move {
            let _cleanup = cleanup;
            run.execute().await
        });
        self.completions.insert(job_id, task);

        Ok(job)
    }

    /// Load a saved script and start it on behalf of `user_id`
    pub async fn execute_stored_script(
        &self,
        script_id: Uuid,
        user_id: &str,
    ) -> Result<ScriptJob> {
        let repository = self
            .repository
            .as_ref()
            .ok_or_else(|| VMError::StorageError("No script repository configured".to_string()))?;

        let script = repository
            .get_by_id(script_id)
            .await?
            .ok_or_else(|| VMError::NotFound(format!("Script {}", script_id)))?;

        if !script.is_visible_to(user_id) {
            return Err(VMError::PermissionError(format!(
                "Script {} is private to its owner",
                script_id
            )));
        }

        self.execute_script(&script.content, user_id, Some(script.id))
            .await
    }

    /// Snapshot of a tracked job
    pub async fn get_job_status(&self, job_id: Uuid) -> Result<ScriptJob> {
        let record = self
            .jobs
            .get(&job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| VMError::NotFound(format!("Job {}", job_id)))?;

        let job = record.read().await.clone();
        Ok(job)
    }

    /// Request cooperative cancellation; observed at the next node boundary
    pub fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        let token = self
            .cancellations
            .get(&job_id)
            .ok_or_else(|| VMError::NotFound(format!("Job {}", job_id)))?;
        token.cancel();
        info!(%job_id, "cancellation requested");
        Ok(())
    }

    /// Wait for a started job to finish and return its final record.
    ///
    /// Works whether or not the job is still tracked. The handle is consumed,
    /// so a second call for the same job returns `NotFound`.
    pub async fn wait_for_job(&self, job_id: Uuid) -> Result<ScriptJob> {
        let (_, task) = self
            .completions
            .remove(&job_id)
            .ok_or_else(|| VMError::NotFound(format!("Job {}", job_id)))?;

        task.await
            .map_err(|e| VMError::InternalError(format!("Job {} task failed: {}", job_id, e)))
    }

    /// Snapshots of every tracked job
    pub async fn list_jobs(&self) -> Vec<ScriptJob> {
        let records: Vec<Arc<RwLock<ScriptJob>>> = self
            .jobs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut jobs = Vec::with_capacity(records.len());
        for record in records {
            jobs.push(record.read().await.clone());
        }
        jobs
    }

    /// Number of jobs currently tracked
    pub fn active_job_count(&self) -> usize {
        self.jobs.len()
    }
}

/// Untracks a job when dropped, however the task ends
struct Eviction {
    job_id: Uuid,
    jobs: Arc<JobMap>,
    cancellations: Arc<TokenMap>,
}

impl Drop for Eviction {
    fn drop(&mut self) {
        self.jobs.remove(&self.job_id);
        self.cancellations.remove(&self.job_id);
        debug!(job_id = %self.job_id, "job evicted from tracking");
    }
}

/// Everything the background task needs to run one job
struct JobRun {
    job_id: Uuid,
    script_id: Option<Uuid>,
    record: Arc<RwLock<ScriptJob>>,
    ast: Vec<AstNode>,
    token: CancellationToken,
    publisher: Arc<dyn EventPublisher>,
    executor: Arc<CommandExecutor>,
}

impl JobRun {
    async fn execute(self) -> ScriptJob {
        let mut ctx = ScriptExecutionContext::new(self.token.clone());
        let outcome = self.run_nodes(&mut ctx).await;
        self.finish(outcome, ctx).await
    }

    async fn run_nodes(&self, ctx: &mut ScriptExecutionContext) -> Result<()> {
        {
            let mut job = self.record.write().await;
            job.transition(JobStatus::Running)?;
            job.started_at = Some(Utc::now());
        }
        self.publish(ScriptEvent::ExecutionStarted {
            job_id: self.job_id,
            script_id: self.script_id,
        })
        .await;

        let total = self.ast.iter().filter(|node| node.is_executable()).count();
        let mut executed = 0usize;

        for node in self.ast.iter().filter(|node| node.is_executable()) {
            ctx.throw_if_cancellation_requested()?;

            {
                let mut job = self.record.write().await;
                job.current_line = node.line_number;
                job.current_command = node.raw_text.trim().to_string();
            }
            debug!(
                job_id = %self.job_id,
                line = node.line_number,
                command = node.command.keyword(),
                "executing node"
            );

            if let Err(e) = self.executor.execute(node, ctx) {
                let mut job = self.record.write().await;
                job.errors.push(Diagnostic::error(
                    node.line_number,
                    first_column(&node.raw_text),
                    codes::RUNTIME_FAILURE,
                    e.to_string(),
                ));
                return Err(e);
            }

            executed += 1;
            {
                let mut job = self.record.write().await;
                job.progress_percent = executed as f64 / total as f64 * 100.0;
            }

            // Node boundary: let cancellers and status readers in
            tokio::task::yield_now().await;
        }

        Ok(())
    }

    async fn finish(&self, outcome: Result<()>, ctx: ScriptExecutionContext) -> ScriptJob {
        let (variables, output_log) = ctx.into_results();

        let (snapshot, event) = {
            let mut job = self.record.write().await;
            job.variables = variables;
            job.output_log = output_log;
            job.mark_completed_at(Utc::now());

            let event = match outcome {
                Ok(()) => {
                    Self::settle(&mut job, JobStatus::Completed);
                    job.progress_percent = 100.0;
                    info!(
                        job_id = %self.job_id,
                        execution_time_ms = job.execution_time_ms,
                        "script job completed"
                    );
                    Some(ScriptEvent::ExecutionCompleted {
                        job_id: self.job_id,
                        success: true,
                        execution_time_ms: job.execution_time_ms,
                    })
                }
                Err(VMError::Cancelled) => {
                    Self::settle(&mut job, JobStatus::Cancelled);
                    info!(job_id = %self.job_id, line = job.current_line, "script job cancelled");
                    None
                }
                Err(e) => {
                    Self::settle(&mut job, JobStatus::Failed);
                    let message = e.to_string();
                    job.output_log.push(format!("Error: {}", message));
                    error!(
                        job_id = %self.job_id,
                        line = job.current_line,
                        error = %message,
                        "script job failed"
                    );
                    Some(ScriptEvent::ExecutionFailed {
                        job_id: self.job_id,
                        error_message: message,
                        line_number: job.current_line,
                    })
                }
            };

            (job.clone(), event)
        };

        if let Some(event) = event {
            self.publish(event).await;
        }
        snapshot
    }

    fn settle(job: &mut ScriptJob, status: JobStatus) {
        if let Err(e) = job.transition(status) {
            warn!(job_id = %job.id, error = %e, "ignoring invalid job transition");
        }
    }

    async fn publish(&self, event: ScriptEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(job_id = %self.job_id, error = %e, "failed to publish job event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelEventPublisher, TracingEventPublisher};
    use mscript_dsl::ScriptValue;
    use mscript_storage::{MemoryScriptRepository, Script};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn engine() -> (ScriptEngine, mpsc::Receiver<ScriptEvent>) {
        let (publisher, rx) = ChannelEventPublisher::channel(16);
        (
            ScriptEngine::new(&EngineConfig::default(), Arc::new(publisher)),
            rx,
        )
    }

    fn variable_script(count: usize) -> String {
        (0..count)
            .map(|i| format!("Var v{} = {}", i, i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let (engine, mut rx) = engine();
        let job = engine
            .execute_script("Create Spacecraft Sat\nSat.X = 7000\nReport Sat.X", "alice", None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(engine.get_job_status(job.id).await.unwrap().status, JobStatus::Queued);

        let done = engine.wait_for_job(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress_percent, 100.0);
        assert_eq!(done.current_line, 3);
        assert_eq!(done.current_command, "Report Sat.X");
        assert_eq!(done.output_log.last().unwrap(), "Report: Sat.X=7000.000000");
        assert!(done.started_at.is_some() && done.completed_at.is_some());

        assert!(matches!(rx.recv().await, Some(ScriptEvent::ExecutionStarted { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(ScriptEvent::ExecutionCompleted { success: true, .. })
        ));

        assert!(matches!(
            engine.get_job_status(job.id).await,
            Err(VMError::NotFound(_))
        ));
        assert_eq!(engine.active_job_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_finished_job_is_still_awaitable() {
        let engine = ScriptEngine::new(&EngineConfig::default(), Arc::new(TracingEventPublisher));

        for _ in 0..50 {
            let job = engine.execute_script("Var a = 1", "alice", None).await.unwrap();
            let done = engine.wait_for_job(job.id).await.unwrap();
            assert_eq!(done.status, JobStatus::Completed);
            assert_eq!(done.variables.get("a"), Some(&ScriptValue::Number(1.0)));
        }

        let job = engine.execute_script("Var a = 1", "alice", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let done = engine.wait_for_job(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        // The handle is consumed by the first wait
        assert!(matches!(
            engine.wait_for_job(job.id).await,
            Err(VMError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_jobs_are_isolated() {
        let engine = ScriptEngine::new(&EngineConfig::default(), Arc::new(TracingEventPublisher));

        let mut submitters = Vec::new();
        for i in 0..16 {
            let engine = engine.clone();
            submitters.push(tokio::spawn(async move {
                let script = format!("Var n = {}\nCreate Spacecraft Sat\nSat.X = {}", i, i);
                let job = engine.execute_script(&script, "alice", None).await?;
                engine.wait_for_job(job.id).await.map(|done| (i, done))
            }));
        }

        for submitter in submitters {
            let (i, done) = submitter.await.unwrap().unwrap();
            assert_eq!(done.status, JobStatus::Completed);
            assert_eq!(done.variables.get("n"), Some(&ScriptValue::Number(i as f64)));
            assert_eq!(done.output_log.len(), 3);
        }
        assert_eq!(engine.active_job_count(), 0);
        assert!(engine.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_registered() {
        let (engine, _rx) = engine();
        let err = engine
            .execute_script("Sat.X = 1\nFrobnicate", "alice", None)
            .await
            .unwrap_err();

        let job = match err {
            VMError::ValidationFailed(job) => job,
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(job.status, JobStatus::Failed);
        let codes: Vec<&str> = job.errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["SE001", "SE002"]);
        assert!(engine.list_jobs().await.is_empty());
        assert!(matches!(
            engine.get_job_status(job.id).await,
            Err(VMError::NotFound(_))
        ));
        assert!(matches!(
            engine.wait_for_job(job.id).await,
            Err(VMError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_runtime_failure_records_error() {
        let (engine, mut rx) = engine();
        let job = engine
            .execute_script(
                "Create Spacecraft Sat\nVar n = 2\n  Sat.X = far\nReport n",
                "bob",
                None,
            )
            .await
            .unwrap();
        let done = engine.wait_for_job(job.id).await.unwrap();

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.errors.len(), 1);
        assert_eq!(done.errors[0].code, codes::RUNTIME_FAILURE);
        assert_eq!(done.errors[0].line_number, 3);
        assert_eq!(done.errors[0].column, 3);
        assert_eq!(done.variables.get("n"), Some(&ScriptValue::Number(2.0)));
        assert!(done.output_log.last().unwrap().starts_with("Error: "));
        assert!(done.progress_percent < 100.0);

        rx.recv().await.unwrap();
        match rx.recv().await {
            Some(ScriptEvent::ExecutionFailed { line_number, .. }) => assert_eq!(line_number, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_out_of_range_propagation_fails_the_job() {
        let (engine, mut rx) = engine();
        let script = "Create Spacecraft Sat\nCreate Propagator Prop\n\
                      Propagate Prop(Sat) {Sat.ElapsedDays = -1e300}";
        let job = engine.execute_script(script, "alice", None).await.unwrap();
        let done = engine.wait_for_job(job.id).await.unwrap();

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.errors[0].code, codes::RUNTIME_FAILURE);
        assert_eq!(done.errors[0].line_number, 3);

        rx.recv().await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ScriptEvent::ExecutionFailed { line_number: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_before_first_node() {
        let (engine, mut rx) = engine();
        let job = engine
            .execute_script("Create Spacecraft Sat\nReport Sat.X", "alice", None)
            .await
            .unwrap();
        engine.cancel_job(job.id).unwrap();

        let done = engine.wait_for_job(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Cancelled);
        assert!(done.errors.is_empty());
        assert!(done.output_log.is_empty());

        // Started only; cancellation publishes nothing
        assert!(matches!(rx.recv().await, Some(ScriptEvent::ExecutionStarted { .. })));
        drop(engine);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_mid_run_keeps_partial_results() {
        let (engine, _rx) = engine();
        let job = engine
            .execute_script(&variable_script(50), "alice", None)
            .await
            .unwrap();

        // The job yields after every node, so it advances while we yield
        loop {
            tokio::task::yield_now().await;
            if engine.get_job_status(job.id).await.unwrap().progress_percent > 0.0 {
                break;
            }
        }
        engine.cancel_job(job.id).unwrap();

        let done = engine.wait_for_job(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Cancelled);
        assert!(done.errors.is_empty());
        assert!(done.progress_percent > 0.0 && done.progress_percent < 100.0);

        let executed = done.output_log.len();
        assert!(executed > 0 && executed < 50);
        assert_eq!(done.variables.len(), executed);
        assert_eq!(done.progress_percent, executed as f64 / 50.0 * 100.0);
        assert_eq!(done.current_line, executed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parent_token_cancels_job() {
        let (engine, _rx) = engine();
        let parent = CancellationToken::new();
        parent.cancel();

        let job = engine
            .execute_script_with_cancellation("Var a = 1", "alice", None, Some(parent.clone()))
            .await
            .unwrap();
        let done = engine.wait_for_job(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Cancelled);
        assert!(done.variables.is_empty());

        // Cancelling a job leaves the caller's token alone
        let parent = CancellationToken::new();
        let job = engine
            .execute_script_with_cancellation("Var a = 1", "alice", None, Some(parent.clone()))
            .await
            .unwrap();
        let _ = engine.cancel_job(job.id);
        engine.wait_for_job(job.id).await.unwrap();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_unknown_jobs() {
        let (engine, _rx) = engine();
        let id = Uuid::new_v4();
        assert!(matches!(engine.cancel_job(id), Err(VMError::NotFound(_))));
        assert!(matches!(engine.wait_for_job(id).await, Err(VMError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stored_script_visibility() {
        let repository = Arc::new(MemoryScriptRepository::default());
        let private = repository
            .add(Script::new("orbit", "Var a = 1", "alice"))
            .await
            .unwrap();
        let (engine, _rx) = engine();
        let engine = engine.with_repository(repository);

        let job = engine.execute_stored_script(private.id, "alice").await.unwrap();
        assert_eq!(job.script_id, Some(private.id));
        engine.wait_for_job(job.id).await.unwrap();

        assert!(matches!(
            engine.execute_stored_script(private.id, "mallory").await,
            Err(VMError::PermissionError(_))
        ));
        assert!(matches!(
            engine.execute_stored_script(Uuid::new_v4(), "alice").await,
            Err(VMError::NotFound(_))
        ));
    }
}
