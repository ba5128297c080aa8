//! Party Scheduler (§4.4): DAG-driven orchestration spawning heterogeneous
//! roles with configurable recovery.

use crate::error::{GobbyError, Result};
use crate::ids::{PartyId, ProjectId, SessionId};
use crate::messaging::MessagingBus;
use crate::model::{MessagePriority, NotifyTarget, OnCrash, Party, PartyMember, PartyMemberStatus, PartyStatus};
use crate::persistence::PersistenceManager;
use crate::registry::AgentRegistry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    pub role: String,
    pub depends_on: Vec<String>,
    pub count: u32,
    pub on_crash: OnCrash,
    #[serde(default)]
    pub notify: NotifyTarget,
    pub retry_attempts: u32,
}

pub struct PartyScheduler {
    persistence: Arc<PersistenceManager>,
    registry: Arc<AgentRegistry>,
    messaging: Arc<MessagingBus>,
}

impl PartyScheduler {
    pub fn new(persistence: Arc<PersistenceManager>, registry: Arc<AgentRegistry>, messaging: Arc<MessagingBus>) -> Self {
        Self { persistence, registry, messaging }
    }

    pub fn persistence(&self) -> &Arc<PersistenceManager> {
        &self.persistence
    }

    /// Validates the DAG (acyclic, every dependency refers to a declared
    /// role), creates the party, and returns it `forming` (§4.4 step 1-2).
    pub fn create_party(
        &self,
        project_id: ProjectId,
        founder_session_id: SessionId,
        name: String,
        roles: &[RoleSpec],
    ) -> Result<Party> {
        validate_dag(roles)?;
        let members = roles
            .iter()
            .flat_map(|r| {
                (0..r.count.max(1)).map(move |_| PartyMember {
                    role: r.role.clone(),
                    depends_on: r.depends_on.clone(),
                    agent_run_id: None,
                    session_id: None,
                    status: PartyMemberStatus::Pending,
                    on_crash: r.on_crash,
                    notify: r.notify,
                    restart_count: 0,
                })
            })
            .collect();
        let party = Party {
            id: PartyId::new(),
            project_id,
            founder_session_id,
            name,
            status: PartyStatus::Forming,
            members,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.persistence.insert_party(&party)?;
        Ok(party)
    }

    pub fn get_party(&self, id: PartyId) -> Result<Party> {
        self.persistence.get_party(id)
    }

    /// Roles whose dependencies are all completed and which have at least
    /// one pending member slot; the caller (daemon orchestration loop) is
    /// expected to spawn every pending member of each returned role
    /// concurrently, then call `mark_role_member_*` as they land.
    pub fn ready_roles(&self, party: &Party) -> Vec<String> {
        let mut roles: Vec<String> = party.ready_roles().iter().map(|r| r.to_string()).collect();
        roles.sort();
        roles.dedup();
        roles
    }

    pub fn mark_member_running(&self, mut party: Party, role: &str, index: usize, agent_run_id: crate::ids::AgentRunId, session_id: SessionId) -> Result<Party> {
        if party.status == PartyStatus::Forming {
            party.status = PartyStatus::Active;
        }
        let member = nth_member_mut(&mut party, role, index)
            .ok_or_else(|| GobbyError::NotFound(format!("party member {role}#{index}")))?;
        member.agent_run_id = Some(agent_run_id);
        member.session_id = Some(session_id);
        member.status = PartyMemberStatus::Running;
        self.persistence.update_party(&party)?;
        Ok(party)
    }

    pub fn mark_member_completed(&self, mut party: Party, role: &str, index: usize) -> Result<Party> {
        {
            let member = nth_member_mut(&mut party, role, index)
                .ok_or_else(|| GobbyError::NotFound(format!("party member {role}#{index}")))?;
            member.status = PartyMemberStatus::Completed;
        }
        if party.members.iter().all(|m| m.status == PartyMemberStatus::Completed) {
            party.status = PartyStatus::Completed;
            party.completed_at = Some(Utc::now());
            info!(party_id = %party.id, "party completed");
        }
        self.persistence.update_party(&party)?;
        Ok(party)
    }

    /// Applies the role's `on_crash` policy (§4.4 step 4): `restart` retries
    /// up to `retry_attempts`, failing the party once exhausted; `pause`
    /// marks the member paused and notifies per its `notify` target; `abort`
    /// kills every other live member and marks the party `failed`.
    pub async fn handle_crash(&self, mut party: Party, role: &str, index: usize, retry_attempts: u32) -> Result<(Party, bool)> {
        let policy;
        let notify_target;
        let from_session;
        let crashed_run_id;
        let should_restart;
        {
            let member = nth_member_mut(&mut party, role, index)
                .ok_or_else(|| GobbyError::NotFound(format!("party member {role}#{index}")))?;
            policy = member.on_crash;
            notify_target = member.notify;
            from_session = member.session_id.unwrap_or(party.founder_session_id);
            crashed_run_id = member.agent_run_id;
            match policy {
                OnCrash::Restart if member.restart_count < retry_attempts => {
                    member.restart_count += 1;
                    member.status = PartyMemberStatus::Pending;
                    should_restart = true;
                }
                OnCrash::Restart => {
                    member.status = PartyMemberStatus::Crashed;
                    should_restart = false;
                }
                OnCrash::Pause => {
                    member.status = PartyMemberStatus::Paused;
                    should_restart = false;
                }
                OnCrash::Abort => {
                    member.status = PartyMemberStatus::Crashed;
                    should_restart = false;
                }
            }
        }

        match policy {
            OnCrash::Restart if !should_restart => {
                warn!(party_id = %party.id, %role, "role failed after exhausting restart attempts");
                party.status = PartyStatus::Failed;
            }
            OnCrash::Pause => {
                self.notify(&party, notify_target, from_session, format!("party member {role}#{index} crashed and was paused"))?;
            }
            OnCrash::Abort => {
                warn!(party_id = %party.id, %role, "aborting party after crash, killing remaining members");
                let victims: Vec<_> = party
                    .members
                    .iter()
                    .filter(|m| matches!(m.status, PartyMemberStatus::Running | PartyMemberStatus::Pending | PartyMemberStatus::Spawning))
                    .filter_map(|m| m.agent_run_id)
                    .filter(|id| Some(*id) != crashed_run_id)
                    .collect();
                for run_id in victims {
                    self.registry.kill_agent(run_id).await.ok();
                }
                party.status = PartyStatus::Failed;
            }
            _ => {}
        }

        self.persistence.update_party(&party)?;
        Ok((party, should_restart))
    }

    fn notify(&self, party: &Party, target: NotifyTarget, from: SessionId, body: String) -> Result<()> {
        match target {
            NotifyTarget::Party => {
                self.messaging.broadcast_to_party(from, party, body, MessagePriority::High)?;
            }
            NotifyTarget::Leader | NotifyTarget::User => {
                self.messaging.notify(from, party.founder_session_id, party.id, body)?;
            }
        }
        Ok(())
    }

    /// Changes the crash-recovery policy for every member of `role`, e.g. an
    /// operator upgrading `pause` to `restart` after observing a flaky role.
    pub fn override_recovery(&self, mut party: Party, role: &str, on_crash: OnCrash) -> Result<Party> {
        let mut found = false;
        for member in party.members.iter_mut().filter(|m| m.role == role) {
            member.on_crash = on_crash;
            found = true;
        }
        if !found {
            return Err(GobbyError::NotFound(format!("party role {role}")));
        }
        self.persistence.update_party(&party)?;
        Ok(party)
    }

    /// There is no dedicated `cancelled` status in the model (§3.1); an
    /// operator cancel is recorded as `failed`, the same terminal state a
    /// crashed party reaches.
    pub fn cancel(&self, mut party: Party) -> Result<Party> {
        party.status = PartyStatus::Failed;
        party.completed_at = Some(Utc::now());
        self.persistence.update_party(&party)?;
        Ok(party)
    }
}

fn nth_member_mut<'a>(party: &'a mut Party, role: &str, index: usize) -> Option<&'a mut PartyMember> {
    party.members.iter_mut().filter(|m| m.role == role).nth(index)
}

pub fn validate_dag(roles: &[RoleSpec]) -> Result<()> {
    let names: HashSet<&str> = roles.iter().map(|r| r.role.as_str()).collect();
    for role in roles {
        for dep in &role.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(GobbyError::InvalidState(format!(
                    "party role {} depends on undeclared role {dep}", role.role
                )));
            }
        }
    }
    let by_name: HashMap<&str, &RoleSpec> = roles.iter().map(|r| (r.role.as_str(), r)).collect();
    for role in roles {
        let mut visited = HashSet::new();
        let mut stack = vec![role.role.as_str()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(r) = by_name.get(current) {
                for dep in &r.depends_on {
                    if dep == &role.role {
                        return Err(GobbyError::CycleDetected(format!(
                            "party role DAG has a cycle through {}", role.role
                        )));
                    }
                    stack.push(dep);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> Vec<RoleSpec> {
        vec![
            RoleSpec { role: "leader".into(), depends_on: vec![], count: 1, on_crash: OnCrash::Abort, notify: NotifyTarget::Party, retry_attempts: 0 },
            RoleSpec { role: "dev".into(), depends_on: vec!["leader".into()], count: 2, on_crash: OnCrash::Restart, notify: NotifyTarget::Party, retry_attempts: 1 },
            RoleSpec { role: "qa".into(), depends_on: vec!["dev".into()], count: 1, on_crash: OnCrash::Abort, notify: NotifyTarget::Party, retry_attempts: 0 },
        ]
    }

    fn scheduler() -> (PartyScheduler, ProjectId, SessionId) {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let session = crate::model::Session::new_root(crate::model::SessionSource::Claude, None, "m1".into());
        pm.insert_session(&session).unwrap();
        let registry = Arc::new(AgentRegistry::new(pm.clone(), std::time::Duration::from_secs(5)));
        let messaging = Arc::new(MessagingBus::new(pm.clone()));
        (PartyScheduler::new(pm, registry, messaging), ProjectId::new(), session.id)
    }

    #[test]
    fn s6_leader_spawns_first_then_two_devs_then_qa() {
        let (sched, project_id, founder) = scheduler();
        let party = sched.create_party(project_id, founder, "release".into(), &roles()).unwrap();
        assert_eq!(sched.ready_roles(&party), vec!["leader".to_string()]);

        let party = sched.mark_member_running(party, "leader", 0, crate::ids::AgentRunId::new(), SessionId::new()).unwrap();
        let party = sched.mark_member_completed(party, "leader", 0).unwrap();
        assert_eq!(sched.ready_roles(&party), vec!["dev".to_string()]);

        let party = sched.mark_member_running(party, "dev", 0, crate::ids::AgentRunId::new(), SessionId::new()).unwrap();
        let party = sched.mark_member_running(party, "dev", 1, crate::ids::AgentRunId::new(), SessionId::new()).unwrap();
        assert!(sched.ready_roles(&party).is_empty());

        let party = sched.mark_member_completed(party, "dev", 0).unwrap();
        assert!(sched.ready_roles(&party).is_empty(), "qa must wait for both dev instances");
        let party = sched.mark_member_completed(party, "dev", 1).unwrap();
        assert_eq!(sched.ready_roles(&party), vec!["qa".to_string()]);
    }

    #[tokio::test]
    async fn crash_with_restart_retries_once_then_fails_role() {
        let (sched, project_id, founder) = scheduler();
        let party = sched.create_party(project_id, founder, "release".into(), &roles()).unwrap();
        let party = sched.mark_member_running(party, "leader", 0, crate::ids::AgentRunId::new(), SessionId::new()).unwrap();
        let party = sched.mark_member_completed(party, "leader", 0).unwrap();

        let (party, restarted) = sched.handle_crash(party, "dev", 0, 1).await.unwrap();
        assert!(restarted);
        assert_ne!(party.status, PartyStatus::Failed);

        let (party, restarted) = sched.handle_crash(party, "dev", 0, 1).await.unwrap();
        assert!(!restarted);
        assert_eq!(party.status, PartyStatus::Failed);
    }

    #[tokio::test]
    async fn crash_with_pause_marks_member_paused_and_notifies_party() {
        let (sched, project_id, founder) = scheduler();
        let mut roles = roles();
        roles[1].on_crash = OnCrash::Pause;
        let party = sched.create_party(project_id, founder, "release".into(), &roles).unwrap();
        let dev_session = SessionId::new();
        let party = sched.mark_member_running(party, "leader", 0, crate::ids::AgentRunId::new(), SessionId::new()).unwrap();
        let party = sched.mark_member_completed(party, "leader", 0).unwrap();
        let party = sched.mark_member_running(party, "dev", 0, crate::ids::AgentRunId::new(), dev_session).unwrap();

        let (party, restarted) = sched.handle_crash(party, "dev", 0, 1).await.unwrap();
        assert!(!restarted);
        assert_ne!(party.status, PartyStatus::Failed);
        assert_eq!(party.member("dev").unwrap().status, PartyMemberStatus::Paused);
    }

    #[tokio::test]
    async fn crash_with_abort_kills_other_running_members() {
        let (sched, project_id, founder) = scheduler();
        let mut roles = roles();
        roles[1].on_crash = OnCrash::Abort;
        let party = sched.create_party(project_id, founder, "release".into(), &roles).unwrap();
        let leader_run = crate::ids::AgentRunId::new();
        let party = sched.mark_member_running(party, "leader", 0, leader_run, SessionId::new()).unwrap();
        let party = sched.mark_member_completed(party, "leader", 0).unwrap();
        let party = sched.mark_member_running(party, "dev", 0, crate::ids::AgentRunId::new(), SessionId::new()).unwrap();
        let party = sched.mark_member_running(party, "dev", 1, crate::ids::AgentRunId::new(), SessionId::new()).unwrap();

        let (party, restarted) = sched.handle_crash(party, "dev", 0, 0).await.unwrap();
        assert!(!restarted);
        assert_eq!(party.status, PartyStatus::Failed);
    }

    #[test]
    fn cyclic_role_dag_is_rejected() {
        let roles = vec![
            RoleSpec { role: "a".into(), depends_on: vec!["b".into()], count: 1, on_crash: OnCrash::Abort, notify: NotifyTarget::Party, retry_attempts: 0 },
            RoleSpec { role: "b".into(), depends_on: vec!["a".into()], count: 1, on_crash: OnCrash::Abort, notify: NotifyTarget::Party, retry_attempts: 0 },
        ];
        assert!(validate_dag(&roles).is_err());
    }
}
