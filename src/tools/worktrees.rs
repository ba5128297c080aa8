//! `worktrees.*` (§6.1): CRUD and claim/release over the persisted worktree
//! rows. No dedicated manager exists (§3.1 keeps worktree state as plain
//! rows, not a stateful subsystem); actual git plumbing (`git worktree add`,
//! flat-directory clone) is out of this surface's scope per §6.1's closing
//! note that transport/wire specifics aren't hardened beyond what exercises
//! the dispatch table — `sync_worktree_from_main` and
//! `spawn_agent_in_worktree` are therefore stubs that record intent only.

use super::parse;
use crate::error::{GobbyError, Result};
use crate::ids::{AgentRunId, ProjectId, WorktreeId};
use crate::model::{IsolationMode, Worktree, WorktreeStatus};
use crate::persistence::PersistenceManager;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Worktrees idle this long with no owner are reported as stale.
const STALE_AFTER: chrono::Duration = chrono::Duration::hours(24);

pub struct WorktreesNamespace {
    pub persistence: Arc<PersistenceManager>,
}

#[derive(Deserialize)]
struct CreateWorktreeParams {
    project_id: ProjectId,
    isolation_mode: IsolationMode,
    path: String,
    branch: Option<String>,
    base_commit: Option<String>,
}

#[derive(Deserialize)]
struct ProjectScopeParams {
    project_id: ProjectId,
}

#[derive(Deserialize)]
struct WorktreeIdParams {
    worktree_id: WorktreeId,
}

#[derive(Deserialize)]
struct ClaimParams {
    worktree_id: WorktreeId,
    owner_agent_run_id: AgentRunId,
}

#[async_trait]
impl super::ToolNamespace for WorktreesNamespace {
    async fn call(&self, tool: &str, params: Value) -> Result<Value> {
        let p = &self.persistence;
        match tool {
            "create_worktree" => {
                let params: CreateWorktreeParams = parse(params)?;
                let w = Worktree {
                    id: WorktreeId::new(),
                    project_id: params.project_id,
                    owner_agent_run_id: None,
                    isolation_mode: params.isolation_mode,
                    path: params.path,
                    branch: params.branch,
                    base_commit: params.base_commit,
                    status: WorktreeStatus::Active,
                    created_at: Utc::now(),
                    removed_at: None,
                };
                p.insert_worktree(&w)?;
                Ok(serde_json::to_value(w)?)
            }
            "list_worktrees" => {
                let params: ProjectScopeParams = parse(params)?;
                Ok(serde_json::to_value(p.list_worktrees_by_project(params.project_id)?)?)
            }
            "claim_worktree" => {
                let params: ClaimParams = parse(params)?;
                let w = p.get_worktree(params.worktree_id)?;
                if w.owner_agent_run_id.is_some() {
                    return Err(GobbyError::Conflict(format!("worktree {} already claimed", params.worktree_id)));
                }
                p.update_worktree_owner(params.worktree_id, Some(params.owner_agent_run_id))?;
                Ok(serde_json::to_value(p.get_worktree(params.worktree_id)?)?)
            }
            "release_worktree" => {
                let params: WorktreeIdParams = parse(params)?;
                p.update_worktree_owner(params.worktree_id, None)?;
                Ok(serde_json::to_value(p.get_worktree(params.worktree_id)?)?)
            }
            "delete_worktree" => {
                let params: WorktreeIdParams = parse(params)?;
                p.update_worktree_status(params.worktree_id, WorktreeStatus::Abandoned, Some(Utc::now()))?;
                Ok(Value::Bool(true))
            }
            "spawn_agent_in_worktree" => {
                warn!("spawn_agent_in_worktree requires composing worktrees with agents.start_agent at the call site");
                Err(GobbyError::Internal("spawn_agent_in_worktree is not a standalone operation; claim the worktree then call agents.start_agent".into()))
            }
            "sync_worktree_from_main" => {
                let params: WorktreeIdParams = parse(params)?;
                warn!(worktree_id = %params.worktree_id, "sync_worktree_from_main has no bound git plumbing; recording as a no-op");
                Ok(serde_json::json!({ "synced": false }))
            }
            "detect_stale_worktrees" => {
                let params: ProjectScopeParams = parse(params)?;
                let now = Utc::now();
                let stale: Vec<Worktree> = p
                    .list_worktrees_by_project(params.project_id)?
                    .into_iter()
                    .filter(|w| w.is_active() && w.owner_agent_run_id.is_none() && now - w.created_at > STALE_AFTER)
                    .collect();
                Ok(serde_json::to_value(stale)?)
            }
            "cleanup_stale_worktrees" => {
                let params: ProjectScopeParams = parse(params)?;
                let now = Utc::now();
                let all = p.list_worktrees_by_project(params.project_id)?;
                let mut cleaned = Vec::new();
                for w in all {
                    if w.is_active() && w.owner_agent_run_id.is_none() && now - w.created_at > STALE_AFTER {
                        p.update_worktree_status(w.id, WorktreeStatus::Abandoned, Some(now))?;
                        cleaned.push(w.id);
                    }
                }
                Ok(serde_json::to_value(cleaned)?)
            }
            other => Err(GobbyError::NotFound(format!("worktrees.{other}"))),
        }
    }
}
