//! Events broadcast while runs progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipyard_core::ResourceId;
use shipyard_core::executor::LogLine;
use shipyard_core::pipeline::{Halt, RunStatus, StageKind, StageOutcome, TriggerEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunCreated {
        run_id: ResourceId,
        number: u64,
        trigger: TriggerEvent,
    },
    StageStarted {
        run_id: ResourceId,
        stage: StageKind,
    },
    StageLog {
        run_id: ResourceId,
        stage: StageKind,
        line: LogLine,
    },
    StageCompleted {
        run_id: ResourceId,
        stage: StageKind,
        outcome: StageOutcome,
        reason: Option<String>,
    },
    AwaitingApproval {
        run_id: ResourceId,
        deadline: Option<DateTime<Utc>>,
    },
    RunFinished {
        run_id: ResourceId,
        status: RunStatus,
        halt: Option<Halt>,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> ResourceId {
        match self {
            PipelineEvent::RunCreated { run_id, .. }
            | PipelineEvent::StageStarted { run_id, .. }
            | PipelineEvent::StageLog { run_id, .. }
            | PipelineEvent::StageCompleted { run_id, .. }
            | PipelineEvent::AwaitingApproval { run_id, .. }
            | PipelineEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}
