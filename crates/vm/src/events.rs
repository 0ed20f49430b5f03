//! Job lifecycle events

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{Result, VMError};

/// Events emitted while a job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptEvent {
    /// The job left the queue and started executing
    ExecutionStarted {
        job_id: Uuid,
        script_id: Option<Uuid>,
    },
    /// Every node executed
    ExecutionCompleted {
        job_id: Uuid,
        success: bool,
        execution_time_ms: i64,
    },
    /// A node failed and the job was aborted
    ExecutionFailed {
        job_id: Uuid,
        error_message: String,
        line_number: usize,
    },
}

impl ScriptEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            ScriptEvent::ExecutionStarted { job_id, .. }
            | ScriptEvent::ExecutionCompleted { job_id, .. }
            | ScriptEvent::ExecutionFailed { job_id, .. } => *job_id,
        }
    }
}

/// Sink for lifecycle events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ScriptEvent) -> Result<()>;
}

/// Publishes events into a bounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::Sender<ScriptEvent>,
}

impl ChannelEventPublisher {
    pub fn new(sender: mpsc::Sender<ScriptEvent>) -> Self {
        Self { sender }
    }

    /// Create a publisher together with the receiving end
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ScriptEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: ScriptEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|e| VMError::InternalError(format!("Event channel closed: {}", e)))
    }
}

/// Writes events to the log and drops them
#[derive(Debug, Clone, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: ScriptEvent) -> Result<()> {
        match &event {
            ScriptEvent::ExecutionStarted { job_id, script_id } => {
                info!(%job_id, ?script_id, "script execution started");
            }
            ScriptEvent::ExecutionCompleted {
                job_id,
                success,
                execution_time_ms,
            } => {
                info!(%job_id, success, execution_time_ms, "script execution completed");
            }
            ScriptEvent::ExecutionFailed {
                job_id,
                error_message,
                line_number,
            } => {
                error!(%job_id, line_number, error = %error_message, "script execution failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_publisher_delivers_in_order() {
        let (publisher, mut rx) = ChannelEventPublisher::channel(4);
        let job_id = Uuid::new_v4();

        publisher
            .publish(ScriptEvent::ExecutionStarted {
                job_id,
                script_id: None,
            })
            .await
            .unwrap();
        publisher
            .publish(ScriptEvent::ExecutionCompleted {
                job_id,
                success: true,
                execution_time_ms: 3,
            })
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(ScriptEvent::ExecutionStarted { .. })));
        let completed = rx.recv().await.unwrap();
        assert_eq!(completed.job_id(), job_id);
    }

    #[tokio::test]
    async fn test_closed_channel_is_an_error() {
        let (publisher, rx) = ChannelEventPublisher::channel(1);
        drop(rx);
        let result = publisher
            .publish(ScriptEvent::ExecutionFailed {
                job_id: Uuid::new_v4(),
                error_message: "boom".to_string(),
                line_number: 2,
            })
            .await;
        assert!(matches!(result, Err(VMError::InternalError(_))));
    }

    #[tokio::test]
    async fn test_tracing_publisher_accepts_everything() {
        let publisher = TracingEventPublisher;
        let result = publisher
            .publish(ScriptEvent::ExecutionStarted {
                job_id: Uuid::new_v4(),
                script_id: Some(Uuid::new_v4()),
            })
            .await;
        assert!(result.is_ok());
    }
}
