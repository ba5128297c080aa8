//! Pipeline Executor (§4.7): deterministic step sequences, generalizing the
//! teacher's `ExecutionPlan`/`SetupCommand` sequencing
//! (`src/task/execution_plan.rs`) to the daemon's own step kinds. Approval
//! gates park the run; the workflow engine resumes it on a later event.

use crate::error::{GobbyError, Result};
use crate::ids::{PipelineRunId, SessionId};
use crate::model::{PipelineDefinition, PipelineRun, PipelineRunStatus, PipelineStep};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// Calls into the daemon's own tool surface; implemented by `tools` once
/// built. Mirrors `workflow::actions::ActionHost`'s isolation pattern: no
/// host bound means the step fails in isolation, not the whole pipeline.
pub trait McpToolCaller: Send + Sync {
    fn call(&self, _tool: &str, _args: &serde_json::Value) -> Option<serde_json::Value> {
        None
    }
}

pub struct NoopMcpToolCaller;
impl McpToolCaller for NoopMcpToolCaller {}

pub struct PipelineRegistry {
    definitions: HashMap<String, PipelineDefinition>,
}

impl PipelineRegistry {
    pub fn new(definitions: Vec<PipelineDefinition>) -> Self {
        Self {
            definitions: definitions.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PipelineDefinition> {
        self.definitions.get(name)
    }
}

/// Pipeline run state is not part of the persisted entity model (§3.1 does
/// not name pipelines); it lives in-memory for the life of the daemon
/// process, keyed by run id.
pub struct PipelineExecutor {
    registry: PipelineRegistry,
    runs: DashMap<PipelineRunId, PipelineRun>,
    tool_caller: Arc<dyn McpToolCaller>,
}

impl PipelineExecutor {
    pub fn new(registry: PipelineRegistry, tool_caller: Arc<dyn McpToolCaller>) -> Self {
        Self { registry, runs: DashMap::new(), tool_caller }
    }

    pub fn get_run(&self, id: PipelineRunId) -> Option<PipelineRun> {
        self.runs.get(&id).map(|r| r.clone())
    }

    /// Starts a fresh pipeline run and drives it until completion, failure,
    /// or an approval gate parks it.
    pub async fn start(&self, pipeline_name: &str, session_id: SessionId) -> Result<PipelineRun> {
        let def = self
            .registry
            .get(pipeline_name)
            .ok_or_else(|| GobbyError::NotFound(format!("pipeline {pipeline_name}")))?
            .clone();
        let now = chrono::Utc::now();
        let run = PipelineRun {
            id: PipelineRunId::new(),
            pipeline_name: def.name.clone(),
            session_id,
            next_step_index: 0,
            status: PipelineRunStatus::Running,
            step_results: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.runs.insert(run.id, run.clone());
        self.drive(run.id, &def).await
    }

    /// Resumes a parked run (an approval having been granted by a workflow
    /// action) and drives it until the next gate, completion, or failure.
    pub async fn resume(&self, run_id: PipelineRunId) -> Result<PipelineRun> {
        let run = self.runs.get(&run_id).map(|r| r.clone()).ok_or_else(|| GobbyError::NotFound(format!("pipeline run {run_id}")))?;
        if run.status != PipelineRunStatus::ParkedForApproval {
            return Err(GobbyError::InvalidState(format!("pipeline run {run_id} is not parked")));
        }
        let def = self
            .registry
            .get(&run.pipeline_name)
            .ok_or_else(|| GobbyError::NotFound(format!("pipeline {}", run.pipeline_name)))?
            .clone();
        {
            let mut entry = self.runs.get_mut(&run_id).unwrap();
            entry.status = PipelineRunStatus::Running;
        }
        self.drive(run_id, &def).await
    }

    pub fn cancel(&self, run_id: PipelineRunId) -> Result<()> {
        let mut entry = self.runs.get_mut(&run_id).ok_or_else(|| GobbyError::NotFound(format!("pipeline run {run_id}")))?;
        entry.status = PipelineRunStatus::Cancelled;
        Ok(())
    }

    async fn drive(&self, run_id: PipelineRunId, def: &PipelineDefinition) -> Result<PipelineRun> {
        loop {
            let mut snapshot = self.runs.get(&run_id).map(|r| r.clone()).expect("run must exist while driving");
            if snapshot.status != PipelineRunStatus::Running {
                return Ok(snapshot);
            }
            let Some(spec) = def.steps.get(snapshot.next_step_index) else {
                snapshot.status = PipelineRunStatus::Completed;
                snapshot.updated_at = chrono::Utc::now();
                self.runs.insert(run_id, snapshot.clone());
                info!(run_id = %run_id, pipeline = %def.name, "pipeline completed");
                return Ok(snapshot);
            };

            if spec.requires_approval {
                snapshot.status = PipelineRunStatus::ParkedForApproval;
                snapshot.updated_at = chrono::Utc::now();
                self.runs.insert(run_id, snapshot.clone());
                info!(run_id = %run_id, step = snapshot.next_step_index, "pipeline parked for approval");
                return Ok(snapshot);
            }

            let result = self.execute_step(&spec.step).await;
            match result {
                Ok(value) => {
                    snapshot.step_results.push(value);
                    snapshot.next_step_index += 1;
                    snapshot.updated_at = chrono::Utc::now();
                    self.runs.insert(run_id, snapshot);
                }
                Err(err) => {
                    warn!(run_id = %run_id, %err, "pipeline step failed");
                    snapshot.status = PipelineRunStatus::Failed;
                    snapshot.updated_at = chrono::Utc::now();
                    self.runs.insert(run_id, snapshot.clone());
                    return Ok(snapshot);
                }
            }
        }
    }

    async fn execute_step(&self, step: &PipelineStep) -> Result<serde_json::Value> {
        match step {
            PipelineStep::Exec { program, args } => {
                let output = Command::new(program)
                    .args(args)
                    .output()
                    .await
                    .map_err(|e| GobbyError::Internal(format!("exec {program}: {e}")))?;
                if !output.status.success() {
                    return Err(GobbyError::Internal(format!(
                        "{program} exited with {}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr)
                    )));
                }
                Ok(serde_json::json!({ "stdout": String::from_utf8_lossy(&output.stdout) }))
            }
            PipelineStep::Mcp { tool, args } => self
                .tool_caller
                .call(tool, args)
                .ok_or_else(|| GobbyError::Internal(format!("tool {tool} produced no result"))),
            PipelineStep::InvokePipeline { name } => {
                Err(GobbyError::Internal(format!("nested pipeline invocation of {name} must go through start()")))
            }
            PipelineStep::Prompt { prompt } => {
                warn!(%prompt, "prompt step has no bound LLM turn runner; recording as a no-op");
                Ok(serde_json::json!({ "prompt": prompt, "executed": false }))
            }
            PipelineStep::SpawnSession { provider, .. } => {
                warn!(%provider, "spawn_session step requires registry wiring at the call site");
                Ok(serde_json::json!({ "spawned": false }))
            }
            PipelineStep::ActivateWorkflow { name } => Ok(serde_json::json!({ "activate_workflow": name })),
        }
    }
}

/// Binds `run_pipeline` workflow actions to a real `PipelineExecutor`
/// (§4.1: "the `run_pipeline` workflow action invokes this executor
/// synchronously within a trigger or step-enter hook"). `ActionHost` is
/// intentionally a sync trait, so this blocks on the current tokio runtime;
/// callers must invoke workflow evaluation from a context where that's
/// legal (a spawned blocking task, not directly inside another future).
pub struct PipelineActionHost {
    executor: Arc<PipelineExecutor>,
    session_id: SessionId,
    stop_signals: Arc<crate::workflow::StopSignalRegistry>,
}

impl PipelineActionHost {
    pub fn new(
        executor: Arc<PipelineExecutor>,
        session_id: SessionId,
        stop_signals: Arc<crate::workflow::StopSignalRegistry>,
    ) -> Self {
        Self { executor, session_id, stop_signals }
    }
}

impl crate::workflow::actions::ActionHost for PipelineActionHost {
    fn run_pipeline(&self, pipeline: &str) -> Option<serde_json::Value> {
        let executor = self.executor.clone();
        let pipeline = pipeline.to_string();
        let session_id = self.session_id;
        match tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(executor.start(&pipeline, session_id))
        }) {
            Ok(run) => serde_json::to_value(&run).ok(),
            Err(err) => {
                warn!(%pipeline, %err, "run_pipeline action failed");
                None
            }
        }
    }

    fn check_stop_signal(&self, session_id: SessionId) -> Option<crate::model::StopSignal> {
        self.stop_signals.take(session_id)
    }
}
