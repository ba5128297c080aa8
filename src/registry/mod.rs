//! Agent Registry & Spawner (§4.3): lifecycle tracking for spawned child
//! agents across the four execution modes, PID discovery, and
//! graceful/forceful termination.

pub mod mode;
pub mod pid;
pub mod process;

use crate::error::{GobbyError, Result};
use crate::ids::{AgentRunId, SessionId, TaskId, WorktreeId};
use crate::model::{AgentMode, AgentRun, AgentRunStatus, Session};
use crate::persistence::PersistenceManager;
use crate::registry::mode::RunHandle;
use crate::registry::pid;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionContextMode {
    SummaryMarkdown,
    SessionId(SessionId),
    Transcript(u32),
    File(String),
    None,
}

impl Default for SessionContextMode {
    fn default() -> Self {
        Self::None
    }
}

pub struct SpawnRequest {
    pub provider: String,
    pub model: Option<String>,
    pub mode: AgentMode,
    pub workflow: Option<String>,
    pub task_id: Option<TaskId>,
    pub prompt: String,
    pub worktree_id: Option<WorktreeId>,
    pub session_context_mode: SessionContextMode,
    pub variables: HashMap<String, serde_json::Value>,
    pub timeout: Duration,
}

pub struct SpawnResult {
    pub run_id: AgentRunId,
    pub session_id: Option<SessionId>,
    pub child_fd: Option<i32>,
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Spawned(AgentRunId),
    Running(AgentRunId),
    Completed(AgentRunId),
    Failed(AgentRunId),
    Killed(AgentRunId),
    Crashed(AgentRunId),
}

pub struct AgentRegistry {
    persistence: Arc<PersistenceManager>,
    handles: DashMap<AgentRunId, RunHandle>,
    events: broadcast::Sender<LifecycleEvent>,
    kill_grace: Duration,
}

impl AgentRegistry {
    pub fn new(persistence: Arc<PersistenceManager>, kill_grace: Duration) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self { persistence, handles: DashMap::new(), events, kill_grace }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Refuses the spawn if `parent.agent_depth + 1` would exceed
    /// `max_agent_depth` (§4.3 "Depth enforcement").
    pub fn spawn(&self, parent: &Session, req: SpawnRequest, max_agent_depth: u32) -> Result<(SpawnResult, Session)> {
        let child_depth = parent.agent_depth + 1;
        if child_depth > max_agent_depth {
            return Err(GobbyError::DepthExceeded {
                max: max_agent_depth,
                context: format!("spawning from session {} at depth {}", parent.id, parent.agent_depth),
            });
        }

        let run_id = AgentRunId::new();
        let child = Session::new_child(parent.source, parent.project_id, parent.machine_id.clone(), parent, run_id);
        self.persistence.insert_session(&child)?;

        let run = AgentRun {
            id: run_id,
            parent_session_id: parent.id,
            child_session_id: Some(child.id),
            workflow_name: req.workflow,
            provider: req.provider,
            model: req.model,
            mode: req.mode,
            prompt: req.prompt,
            status: AgentRunStatus::Pending,
            worktree_id: req.worktree_id,
            result: None,
            party_id: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.persistence.insert_agent_run(&run)?;
        self.events.send(LifecycleEvent::Spawned(run_id)).ok();
        info!(run_id = %run_id, mode = ?run.mode, child_session = %child.id, "agent spawned");

        Ok((
            SpawnResult { run_id, session_id: Some(child.id), child_fd: None },
            child,
        ))
    }

    /// Binds a live `RunHandle` for a run created by `spawn`, transitioning
    /// it to `running`. Call sites that only track PID/task-handle
    /// bookkeeping (the LLM SDK call itself is out of scope) call this once
    /// the underlying process/task actually starts.
    pub fn mark_running(&self, run_id: AgentRunId, handle: RunHandle) -> Result<()> {
        self.handles.insert(run_id, handle);
        self.persistence.update_agent_run_status(run_id, AgentRunStatus::Running, None)?;
        self.events.send(LifecycleEvent::Running(run_id)).ok();
        Ok(())
    }

    pub fn mark_completed(&self, run_id: AgentRunId) -> Result<()> {
        self.handles.remove(&run_id);
        self.persistence.update_agent_run_status(run_id, AgentRunStatus::Completed, Some(Utc::now()))?;
        self.events.send(LifecycleEvent::Completed(run_id)).ok();
        Ok(())
    }

    pub fn mark_crashed(&self, run_id: AgentRunId) -> Result<()> {
        self.handles.remove(&run_id);
        self.persistence.update_agent_run_status(run_id, AgentRunStatus::Error, Some(Utc::now()))?;
        self.events.send(LifecycleEvent::Crashed(run_id)).ok();
        Ok(())
    }

    /// Graceful-then-forceful kill (§4.3 "Termination"). Returns
    /// `already_dead=true` via the boolean when there was nothing to kill
    /// (§8 boundary behavior).
    pub async fn kill_agent(&self, run_id: AgentRunId) -> Result<bool> {
        self.discover_terminal_pid_if_needed(run_id);
        let already_dead = match self.handles.get_mut(&run_id) {
            Some(mut handle) => match handle.kill(self.kill_grace).await {
                Ok(was_alive) => !was_alive,
                Err(_) => {
                    warn!(run_id = %run_id, "terminal agent pid could not be discovered; treating as unreachable");
                    true
                }
            },
            None => true,
        };
        self.handles.remove(&run_id);
        self.persistence.update_agent_run_status(run_id, AgentRunStatus::Killed, Some(Utc::now()))?;
        self.events.send(LifecycleEvent::Killed(run_id)).ok();
        if already_dead {
            warn!(run_id = %run_id, "kill_agent found no live process; already_dead=true");
        }
        Ok(already_dead)
    }

    /// Terminal-mode agents are registered with no process handle yet (the
    /// emulator's launcher PID is useless); run the PID discovery algorithm
    /// (§4.3) lazily, right before the kill needs a real PID.
    fn discover_terminal_pid_if_needed(&self, run_id: AgentRunId) {
        let Some(mut handle) = self.handles.get_mut(&run_id) else { return };
        if !matches!(&*handle, RunHandle::Terminal { process: None, .. }) {
            return;
        }
        let Ok(run) = self.persistence.get_agent_run(run_id) else { return };
        let Some(child_session_id) = run.child_session_id else { return };
        let Ok(session) = self.persistence.get_session(child_session_id) else { return };
        let (discovered, found_via) = pid::discover(&session);
        if let RunHandle::Terminal { process, .. } = &mut *handle {
            *process = discovered;
        }
        debug!(run_id = %run_id, ?found_via, "attempted pid discovery ahead of terminal agent kill");
    }

    pub fn get_run(&self, run_id: AgentRunId) -> Result<AgentRun> {
        self.persistence.get_agent_run(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionSource;

    fn setup() -> (AgentRegistry, Session) {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let parent = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&parent).unwrap();
        (AgentRegistry::new(pm, Duration::from_secs(5)), parent)
    }

    fn req() -> SpawnRequest {
        SpawnRequest {
            provider: "claude".into(),
            model: None,
            mode: AgentMode::Headless,
            workflow: None,
            task_id: None,
            prompt: "do work".into(),
            worktree_id: None,
            session_context_mode: SessionContextMode::None,
            variables: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn spawn_at_exactly_max_depth_is_allowed() {
        let (registry, parent) = setup();
        let (result, child) = registry.spawn(&parent, req(), 1).unwrap();
        assert_eq!(child.agent_depth, 1);
        assert!(result.session_id.is_some());
    }

    #[test]
    fn spawn_beyond_max_depth_is_refused() {
        let (registry, parent) = setup();
        let err = registry.spawn(&parent, req(), 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DepthExceeded);
    }

    #[tokio::test]
    async fn undiscoverable_terminal_agent_kill_reports_already_dead() {
        let (registry, parent) = setup();
        let (result, _child) = registry.spawn(&parent, req(), 1).unwrap();
        registry
            .mark_running(result.run_id, RunHandle::Terminal { session_marker: "marker".into(), process: None })
            .unwrap();
        let already_dead = registry.kill_agent(result.run_id).await.unwrap();
        assert!(already_dead);
        let run = registry.get_run(result.run_id).unwrap();
        assert_eq!(run.status, AgentRunStatus::Killed);
    }

    #[tokio::test]
    async fn killing_unregistered_run_reports_already_dead() {
        let (registry, parent) = setup();
        let (result, _child) = registry.spawn(&parent, req(), 1).unwrap();
        let already_dead = registry.kill_agent(result.run_id).await.unwrap();
        assert!(already_dead);
        let run = registry.get_run(result.run_id).unwrap();
        assert_eq!(run.status, AgentRunStatus::Killed);
    }
}
