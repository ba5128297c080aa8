//! `agents.*` (§6.1): spawn/track/kill child agents and the messaging
//! operations exposed alongside them, delegating to `AgentRegistry` and
//! `MessagingBus`.

use super::parse;
use crate::error::{GobbyError, Result};
use crate::ids::{AgentRunId, SessionId, TaskId, WorktreeId};
use crate::messaging::MessagingBus;
use crate::model::{AgentMode, MessagePriority};
use crate::persistence::PersistenceManager;
use crate::registry::mode::RunHandle;
use crate::registry::pid;
use crate::registry::process::ProcessHandle;
use crate::registry::{AgentRegistry, SessionContextMode, SpawnRequest};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

pub struct AgentsNamespace {
    pub registry: Arc<AgentRegistry>,
    pub persistence: Arc<PersistenceManager>,
    pub messaging: Arc<MessagingBus>,
    pub max_agent_depth: u32,
}

#[derive(Deserialize)]
struct StartAgentParams {
    parent_session_id: SessionId,
    provider: String,
    model: Option<String>,
    mode: AgentMode,
    workflow: Option<String>,
    task_id: Option<TaskId>,
    prompt: String,
    worktree_id: Option<WorktreeId>,
    #[serde(default)]
    session_context_mode: SessionContextMode,
    #[serde(default)]
    variables: HashMap<String, Value>,
    #[serde(default = "default_timeout_s")]
    timeout_s: u64,
}

fn default_timeout_s() -> u64 {
    300
}

#[derive(Deserialize)]
struct RunIdParams {
    run_id: AgentRunId,
}

#[derive(Deserialize)]
struct ListAgentsParams {
    parent_session_id: SessionId,
}

#[derive(Deserialize)]
struct SendToParentParams {
    from: crate::model::Session,
    body: String,
    #[serde(default)]
    priority: MessagePriority,
}

#[derive(Deserialize)]
struct SendToChildParams {
    from: SessionId,
    child: SessionId,
    body: String,
    #[serde(default)]
    priority: MessagePriority,
}

#[derive(Deserialize)]
struct BroadcastToChildrenParams {
    from: SessionId,
    parent_session_id: SessionId,
    body: String,
    #[serde(default)]
    priority: MessagePriority,
}

#[derive(Deserialize)]
struct SendMessageParams {
    from: crate::model::Session,
    to: crate::model::Session,
    body: String,
    #[serde(default)]
    priority: MessagePriority,
}

#[derive(Deserialize)]
struct PollMessagesParams {
    session_id: SessionId,
    #[serde(default)]
    unread_only: bool,
}

#[derive(Deserialize)]
struct MarkReadParams {
    message_id: crate::ids::MessageId,
}

impl AgentsNamespace {
    /// Turns a bookkeeping-only `spawn()` result into a live process or
    /// task, then binds it into the registry so `kill_agent` has something
    /// real to terminate (§4.3 modes table). `in_process` and `embedded`
    /// have no bound LLM SDK/PTY allocator in this build; they register a
    /// handle but do no real work, matching `pipeline::execute_step`'s
    /// no-bound-runner isolation pattern elsewhere in this crate.
    fn launch(
        &self,
        run_id: AgentRunId,
        child_session_id: SessionId,
        mode: AgentMode,
        provider: &str,
        model: Option<&str>,
        prompt: &str,
    ) -> Result<()> {
        let marker = pid::marker_for(&child_session_id.to_string());
        match mode {
            AgentMode::Headless => {
                let preamble_prompt = format!("{marker}\n{prompt}");
                let mut command = Command::new(provider);
                command.arg("--print").arg("--output-format").arg("json").arg("--permission-mode").arg("acceptEdits");
                if let Some(model) = model {
                    command.arg("--model").arg(model);
                }
                command.arg("--").arg(&preamble_prompt);
                command.stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());

                let mut child = command
                    .spawn()
                    .map_err(|e| GobbyError::Internal(format!("failed to spawn {provider}: {e}")))?;
                let pid = child
                    .id()
                    .ok_or_else(|| GobbyError::Internal(format!("spawned {provider} process had no pid")))?;
                self.registry.mark_running(run_id, RunHandle::Headless { process: ProcessHandle::new(pid) })?;

                let registry = self.registry.clone();
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) if status.success() => {
                            registry.mark_completed(run_id).ok();
                        }
                        Ok(status) => {
                            warn!(run_id = %run_id, %status, "headless agent exited non-zero");
                            registry.mark_crashed(run_id).ok();
                        }
                        Err(e) => {
                            warn!(run_id = %run_id, %e, "headless agent process could not be awaited");
                            registry.mark_crashed(run_id).ok();
                        }
                    }
                });
            }
            AgentMode::Terminal => {
                self.registry.mark_running(run_id, RunHandle::Terminal { session_marker: marker, process: None })?;
            }
            AgentMode::InProcess => {
                let registry = self.registry.clone();
                let task: tokio::task::JoinHandle<Result<serde_json::Value>> = tokio::spawn(async move {
                    warn!(run_id = %run_id, "in_process mode has no bound LLM SDK turn runner; completing as a no-op");
                    registry.mark_completed(run_id).ok();
                    Ok(serde_json::json!({ "executed": false }))
                });
                self.registry.mark_running(run_id, RunHandle::InProcess { task })?;
            }
            AgentMode::Embedded => {
                warn!(run_id = %run_id, "embedded mode has no bound PTY allocator in this build; run stays pending");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl super::ToolNamespace for AgentsNamespace {
    async fn call(&self, tool: &str, params: Value) -> Result<Value> {
        match tool {
            "start_agent" => {
                let p: StartAgentParams = parse(params)?;
                let parent = self.persistence.get_session(p.parent_session_id)?;
                let mode = p.mode;
                let provider = p.provider.clone();
                let model = p.model.clone();
                let prompt = p.prompt.clone();
                let req = SpawnRequest {
                    provider: p.provider,
                    model: p.model,
                    mode: p.mode,
                    workflow: p.workflow,
                    task_id: p.task_id,
                    prompt: p.prompt,
                    worktree_id: p.worktree_id,
                    session_context_mode: p.session_context_mode,
                    variables: p.variables,
                    timeout: Duration::from_secs(p.timeout_s),
                };
                let (spawn_result, child) = self.registry.spawn(&parent, req, self.max_agent_depth)?;
                let run_id = spawn_result.run_id;
                let child_session_id = child.id;

                self.launch(run_id, child_session_id, mode, &provider, model.as_deref(), &prompt)?;

                Ok(serde_json::json!({
                    "run_id": spawn_result.run_id,
                    "session_id": spawn_result.session_id,
                    "child_session": child,
                }))
            }
            "kill_agent" | "cancel_agent" => {
                let p: RunIdParams = parse(params)?;
                let already_dead = self.registry.kill_agent(p.run_id).await?;
                Ok(serde_json::json!({ "already_dead": already_dead }))
            }
            "list_agents" => {
                let p: ListAgentsParams = parse(params)?;
                Ok(serde_json::to_value(self.persistence.list_agent_runs_for_parent(p.parent_session_id)?)?)
            }
            "get_agent_result" => {
                let p: RunIdParams = parse(params)?;
                let run = self.registry.get_run(p.run_id)?;
                Ok(serde_json::json!({ "status": run.status, "result": run.result }))
            }
            "complete" => {
                let p: RunIdParams = parse(params)?;
                self.registry.mark_completed(p.run_id)?;
                Ok(Value::Bool(true))
            }
            "send_to_parent" => {
                let p: SendToParentParams = parse(params)?;
                Ok(serde_json::to_value(self.messaging.send_to_parent(&p.from, p.body, p.priority)?)?)
            }
            "send_to_child" => {
                let p: SendToChildParams = parse(params)?;
                Ok(serde_json::to_value(self.messaging.send_to_child(p.from, p.child, p.body, p.priority)?)?)
            }
            "broadcast_to_children" => {
                let p: BroadcastToChildrenParams = parse(params)?;
                let children: Vec<SessionId> = self
                    .persistence
                    .list_agent_runs_for_parent(p.parent_session_id)?
                    .into_iter()
                    .filter_map(|r| r.child_session_id)
                    .collect();
                let mut sent = Vec::with_capacity(children.len());
                for child in children {
                    sent.push(self.messaging.send_to_child(p.from, child, p.body.clone(), p.priority)?);
                }
                Ok(serde_json::to_value(sent)?)
            }
            "send_message" => {
                let p: SendMessageParams = parse(params)?;
                Ok(serde_json::to_value(self.messaging.send_message(&p.from, &p.to, p.body, p.priority)?)?)
            }
            "poll_messages" => {
                let p: PollMessagesParams = parse(params)?;
                Ok(serde_json::to_value(self.messaging.poll_messages(p.session_id, p.unread_only)?)?)
            }
            "mark_read" => {
                let p: MarkReadParams = parse(params)?;
                self.messaging.mark_read(p.message_id)?;
                Ok(Value::Bool(true))
            }
            other => Err(GobbyError::NotFound(format!("agents.{other}"))),
        }
    }
}
