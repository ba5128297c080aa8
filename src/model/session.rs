use crate::ids::{AgentRunId, ProjectId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    Claude,
    Gemini,
    Codex,
    ClaudeSdk,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Expired,
    Archived,
}

/// An instance of an LLM CLI connected to the daemon.
///
/// Invariant: `agent_depth == 0` iff `parent_session_id` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub source: SessionSource,
    pub project_id: Option<ProjectId>,
    pub status: SessionStatus,
    pub parent_session_id: Option<SessionId>,
    pub spawned_by_agent_id: Option<AgentRunId>,
    pub agent_depth: u32,
    pub transcript_path: Option<String>,
    pub machine_id: String,
    pub compact_markdown: Option<String>,
    pub terminal_context: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new_root(source: SessionSource, project_id: Option<ProjectId>, machine_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            source,
            project_id,
            status: SessionStatus::Active,
            parent_session_id: None,
            spawned_by_agent_id: None,
            agent_depth: 0,
            transcript_path: None,
            machine_id,
            compact_markdown: None,
            terminal_context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_child(
        source: SessionSource,
        project_id: Option<ProjectId>,
        machine_id: String,
        parent: &Session,
        spawned_by_agent_id: AgentRunId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            source,
            project_id,
            status: SessionStatus::Active,
            parent_session_id: Some(parent.id),
            spawned_by_agent_id: Some(spawned_by_agent_id),
            agent_depth: parent.agent_depth + 1,
            transcript_path: None,
            machine_id,
            compact_markdown: None,
            terminal_context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.agent_depth == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_session_has_zero_depth_and_no_parent() {
        let s = Session::new_root(SessionSource::Claude, None, "m1".into());
        assert_eq!(s.agent_depth, 0);
        assert!(s.parent_session_id.is_none());
    }

    #[test]
    fn child_session_increments_depth() {
        let parent = Session::new_root(SessionSource::Claude, None, "m1".into());
        let child = Session::new_child(
            SessionSource::Claude,
            None,
            "m1".into(),
            &parent,
            AgentRunId::new(),
        );
        assert_eq!(child.agent_depth, 1);
        assert_eq!(child.parent_session_id, Some(parent.id));
    }
}
