use crate::ids::{AgentRunId, ProjectId, WorktreeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    SharedWorkdir,
    GitWorktree,
    GitClone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    Active,
    MergePending,
    Merged,
    Abandoned,
    Failed,
}

/// An isolated filesystem workspace handed to a spawned agent (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub id: WorktreeId,
    pub project_id: ProjectId,
    pub owner_agent_run_id: Option<AgentRunId>,
    pub isolation_mode: IsolationMode,
    pub path: String,
    pub branch: Option<String>,
    pub base_commit: Option<String>,
    pub status: WorktreeStatus,
    pub created_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl Worktree {
    pub fn is_active(&self) -> bool {
        matches!(self.status, WorktreeStatus::Active | WorktreeStatus::MergePending)
    }
}
