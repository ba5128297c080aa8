use crate::ids::{ProjectId, SessionId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    PendingReview,
    Completed,
    Blocked,
    Escalated,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Code,
    Document,
    Research,
    Config,
    Test,
    Manual,
}

/// A unit of work in a project (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: Option<ProjectId>,
    pub seq_num: u64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub parent_task_id: Option<TaskId>,
    pub depends_on: Vec<TaskId>,
    pub category: Option<TaskCategory>,
    pub priority: i32,
    pub validation_criteria: Option<String>,
    pub validation_fail_count: u32,
    pub reference_doc: Option<String>,
    pub expansion_context: Option<String>,
    pub is_enriched: bool,
    pub is_expanded: bool,
    pub is_tdd_applied: bool,
    pub commit_sha: Option<String>,
    pub created_in_session_id: SessionId,
    pub assigned_session_id: Option<SessionId>,
    pub pending_review_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_ready(&self, dependency_statuses: &[TaskStatus]) -> bool {
        self.status == TaskStatus::Pending
            && dependency_statuses.iter().all(|s| *s == TaskStatus::Completed)
    }
}
