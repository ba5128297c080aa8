use crate::ids::{AgentRunId, PartyId, SessionId, WorktreeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    InProcess,
    Headless,
    Terminal,
    Embedded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Killed,
    Error,
    Timeout,
}

impl AgentRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Killed | Self::Error | Self::Timeout
        )
    }
}

/// An outstanding or completed spawn (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: AgentRunId,
    pub parent_session_id: SessionId,
    pub child_session_id: Option<SessionId>,
    pub workflow_name: Option<String>,
    pub provider: String,
    pub model: Option<String>,
    pub mode: AgentMode,
    pub prompt: String,
    pub status: AgentRunStatus,
    pub worktree_id: Option<WorktreeId>,
    pub result: Option<serde_json::Value>,
    pub party_id: Option<PartyId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
