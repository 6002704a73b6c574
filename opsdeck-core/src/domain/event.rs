//! Live log event types
//!
//! Log events are never persisted. They only travel from a running pipeline
//! to the observers subscribed to the log hub.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::PipelineStatus;

/// Event emitted while a pipeline runs
///
/// Every event is tagged with its pipeline id so observers can demultiplex
/// concurrent runs sharing one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    /// A chunk of script output, usually one line including its newline
    Log { pipeline_id: Uuid, content: String },
    /// The pipeline moved to a new status
    Status {
        pipeline_id: Uuid,
        status: PipelineStatus,
    },
}

impl LogEvent {
    pub fn log(pipeline_id: Uuid, content: impl Into<String>) -> Self {
        LogEvent::Log {
            pipeline_id,
            content: content.into(),
        }
    }

    pub fn status(pipeline_id: Uuid, status: PipelineStatus) -> Self {
        LogEvent::Status {
            pipeline_id,
            status,
        }
    }

    pub fn pipeline_id(&self) -> Uuid {
        match self {
            LogEvent::Log { pipeline_id, .. } | LogEvent::Status { pipeline_id, .. } => {
                *pipeline_id
            }
        }
    }
}
