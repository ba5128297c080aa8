use crate::ids::{PipelineRunId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step of a pipeline (§4.7). Mirrors the teacher's `setup_commands`
/// sequencing but generalized to the daemon's own step kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Exec { program: String, args: Vec<String> },
    Prompt { prompt: String },
    Mcp { tool: String, args: serde_json::Value },
    InvokePipeline { name: String },
    SpawnSession { provider: String, workflow: Option<String>, prompt: String, wait_for_exit_condition: bool },
    ActivateWorkflow { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStepSpec {
    pub step: PipelineStep,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub steps: Vec<PipelineStepSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    Running,
    ParkedForApproval,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: PipelineRunId,
    pub pipeline_name: String,
    pub session_id: SessionId,
    pub next_step_index: usize,
    pub status: PipelineRunStatus,
    pub step_results: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
