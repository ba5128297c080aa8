use crate::ids::{AgentRunId, PartyId, ProjectId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyStatus {
    Forming,
    Active,
    Completing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyMemberStatus {
    Pending,
    Spawning,
    Running,
    Paused,
    Completed,
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnCrash {
    Restart,
    Pause,
    Abort,
}

/// Who gets told when `on_crash=pause` fires (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyTarget {
    Leader,
    User,
    Party,
}

impl Default for NotifyTarget {
    fn default() -> Self {
        Self::Party
    }
}

/// One role slot within a party's role DAG (§3.1, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyMember {
    pub role: String,
    pub depends_on: Vec<String>,
    pub agent_run_id: Option<AgentRunId>,
    pub session_id: Option<SessionId>,
    pub status: PartyMemberStatus,
    pub on_crash: OnCrash,
    #[serde(default)]
    pub notify: NotifyTarget,
    pub restart_count: u32,
}

/// A coordinated group of agents spawned from a role DAG (§3.1, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub project_id: ProjectId,
    pub founder_session_id: SessionId,
    pub name: String,
    pub status: PartyStatus,
    pub members: Vec<PartyMember>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Party {
    pub fn member(&self, role: &str) -> Option<&PartyMember> {
        self.members.iter().find(|m| m.role == role)
    }

    /// Whether every instance of `role` has completed (a role may be spawned
    /// with `count > 1`; dependents wait for all of them).
    fn role_complete(&self, role: &str) -> bool {
        self.members
            .iter()
            .filter(|m| m.role == role)
            .all(|m| m.status == PartyMemberStatus::Completed)
    }

    /// Roles whose `depends_on` are all completed and who are still pending.
    pub fn ready_roles(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.status == PartyMemberStatus::Pending)
            .filter(|m| m.depends_on.iter().all(|dep| self.role_complete(dep)))
            .map(|m| m.role.as_str())
            .collect()
    }
}
