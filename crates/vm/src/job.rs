//! Job records

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use mscript_dsl::{ScriptError, ScriptValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VMError};

/// Lifecycle of a job. Completed, Failed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running)
            | (JobStatus::Queued, JobStatus::Failed)
            | (JobStatus::Queued, JobStatus::Cancelled) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// One execution attempt of a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptJob {
    pub id: Uuid,
    pub script_id: Option<Uuid>,
    pub created_by_user_id: String,
    pub status: JobStatus,
    /// Line of the node currently (or last) executing
    pub current_line: usize,
    /// Source text of that node
    pub current_command: String,
    pub progress_percent: f64,
    pub errors: Vec<ScriptError>,
    pub variables: BTreeMap<String, ScriptValue>,
    pub output_log: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: i64,
}

impl ScriptJob {
    /// Create a queued job
    pub fn new(created_by_user_id: impl Into<String>, script_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            script_id,
            created_by_user_id: created_by_user_id.into(),
            status: JobStatus::Queued,
            current_line: 0,
            current_command: String::new(),
            progress_percent: 0.0,
            errors: Vec::new(),
            variables: BTreeMap::new(),
            output_log: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_time_ms: 0,
        }
    }

    /// Move to `next`, refusing to leave a terminal state or go backwards
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(VMError::StateError(format!(
                "Job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Stamp the completion time and derive the execution time
    pub fn mark_completed_at(&mut self, completed_at: DateTime<Utc>) {
        self.completed_at = Some(completed_at);
        self.execution_time_ms = self
            .started_at
            .map(|started| (completed_at - started).num_milliseconds())
            .unwrap_or(0);
    }
}
