//! Action execution (§4.1 step 3b). Each action mutates the iterating
//! workflow's instance state and/or the session-shared variable map and
//! yields an `ActionOutcome` the evaluator folds into the aggregated
//! response. A failing action is isolated to that rule (§4.1/§7): it never
//! upgrades/downgrades the overall decision on its own.

use crate::ids::SessionId;
use crate::model::{Action, StopSignal, WorkflowInstance};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ActionOutcome {
    pub context: Option<String>,
    pub message: Option<String>,
    pub block: bool,
    pub end_workflow: bool,
    pub activate_workflow: Option<String>,
}

/// Side-effecting hooks an action may need that live outside the workflow
/// engine proper (pipeline execution, MCP dispatch, memory recall). A
/// no-op default lets the engine run standalone in tests; the daemon binds
/// a real implementation backed by `pipeline`/`tools`/`providers`.
pub trait ActionHost {
    fn run_pipeline(&self, _pipeline: &str) -> Option<serde_json::Value> {
        None
    }
    fn call_mcp_tool(&self, _tool: &str, _args: &serde_json::Value) -> Option<serde_json::Value> {
        None
    }
    fn memory_recall(&self, _query: &str) -> Option<String> {
        None
    }
    fn remember(&self, text: &str) {
        debug!(%text, "remember (no-op host)");
    }
    fn check_stop_signal(&self, _session_id: SessionId) -> Option<StopSignal> {
        None
    }
}

pub struct NoopActionHost;
impl ActionHost for NoopActionHost {}

pub fn execute(
    action: &Action,
    instance: &mut WorkflowInstance,
    session_variables: &mut HashMap<String, serde_json::Value>,
    host: &dyn ActionHost,
) -> ActionOutcome {
    instance.total_action_count += 1;
    match action {
        Action::InjectContext { text } => ActionOutcome {
            context: Some(text.clone()),
            ..Default::default()
        },
        Action::InjectMessage { text } => ActionOutcome {
            message: Some(text.clone()),
            ..Default::default()
        },
        Action::BlockTools { tools } => {
            debug!(?tools, "block_tools action fired");
            ActionOutcome { block: true, ..Default::default() }
        }
        Action::BlockStop => ActionOutcome { block: true, ..Default::default() },
        Action::SetVariable { name, value } => {
            instance.variables.insert(name.clone(), value.clone());
            ActionOutcome::default()
        }
        Action::SetSessionVariable { name, value } => {
            session_variables.insert(name.clone(), value.clone());
            ActionOutcome::default()
        }
        Action::CallMcpTool { tool, args } => {
            match host.call_mcp_tool(tool, args) {
                Some(result) => ActionOutcome {
                    context: Some(result.to_string()),
                    ..Default::default()
                },
                None => {
                    warn!(%tool, "call_mcp_tool had no host result; isolating failure to this rule");
                    ActionOutcome::default()
                }
            }
        }
        Action::RunPipeline { pipeline, store_as } => match host.run_pipeline(pipeline) {
            Some(result) => {
                instance.variables.insert(store_as.clone(), result);
                ActionOutcome::default()
            }
            None => {
                warn!(%pipeline, "run_pipeline had no host result; isolating failure to this rule");
                ActionOutcome::default()
            }
        },
        Action::ActivateWorkflow { name } => ActionOutcome {
            activate_workflow: Some(name.clone()),
            ..Default::default()
        },
        Action::EndWorkflow => ActionOutcome { end_workflow: true, ..Default::default() },
        Action::ExtractHandoffContext => {
            let markdown = instance
                .variables
                .iter()
                .map(|(k, v)| format!("- {k}: {v}"))
                .collect::<Vec<_>>()
                .join("\n");
            ActionOutcome { context: Some(markdown), ..Default::default() }
        }
        Action::MemoryRecall { query } => ActionOutcome {
            context: host.memory_recall(query),
            ..Default::default()
        },
        Action::Remember { text } => {
            host.remember(text);
            ActionOutcome::default()
        }
        Action::TrackProgress => {
            instance.step_action_count += 1;
            ActionOutcome::default()
        }
        Action::CheckStopSignal => match host.check_stop_signal(instance.session_id) {
            Some(sig) => ActionOutcome {
                block: true,
                message: Some(sig.reason.unwrap_or_else(|| "stop requested".into())),
                ..Default::default()
            },
            None => ActionOutcome::default(),
        },
    }
}
