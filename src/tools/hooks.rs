//! `hooks.*` (§6.2): the only production entry point into
//! `hooks::HookIngress` and, through it, `workflow::WorkflowEngine`. A
//! single call may normalize into more than one `HookEvent` (a synthesized
//! `session_start` ahead of a hookless provider's first `before_agent`);
//! every event is evaluated and the responses are folded into one, first
//! block wins.

use super::parse;
use crate::error::{GobbyError, Result};
use crate::hooks::{HookIngress, RawHookPayload};
use crate::ids::SessionId;
use crate::persistence::PersistenceManager;
use crate::pipeline::{PipelineActionHost, PipelineExecutor};
use crate::task_graph::TaskGraph;
use crate::workflow::condition::LiveConditionProvider;
use crate::workflow::eval::{Decision, HookResponse, WorkflowEngine};
use crate::workflow::StopSignalRegistry;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub struct HooksNamespace {
    pub ingress: Arc<HookIngress>,
    pub engine: Arc<WorkflowEngine>,
    pub task_graph: Arc<TaskGraph>,
    pub persistence: Arc<PersistenceManager>,
    pub pipeline_executor: Arc<PipelineExecutor>,
    pub stop_signals: Arc<StopSignalRegistry>,
}

#[derive(Deserialize)]
struct IngestParams {
    session_id: SessionId,
    event_type: String,
    source: String,
    #[serde(default)]
    data: Value,
    #[serde(default = "default_supports_native_session_start")]
    supports_native_session_start: bool,
}

fn default_supports_native_session_start() -> bool {
    true
}

#[async_trait]
impl super::ToolNamespace for HooksNamespace {
    async fn call(&self, tool: &str, params: Value) -> Result<Value> {
        match tool {
            "ingest" => {
                let p: IngestParams = parse(params)?;
                let raw = RawHookPayload { event_type: p.event_type, source: p.source, data: p.data };
                let events = self.ingress.ingest(p.session_id, p.supports_native_session_start, raw)?;
                let session = self.persistence.get_session(p.session_id)?;

                let mut merged: Option<HookResponse> = None;
                for event in &events {
                    let conditions = LiveConditionProvider {
                        task_graph: &self.task_graph,
                        project_id: session.project_id,
                        user_text: event.user_text(),
                        tool_path: None,
                    };
                    let host = PipelineActionHost::new(
                        self.pipeline_executor.clone(),
                        p.session_id,
                        self.stop_signals.clone(),
                    );
                    let response = self.engine.evaluate(event, &conditions, &host)?;
                    merged = Some(match merged {
                        None => response,
                        Some(prev) => merge(prev, response),
                    });
                }
                let response = merged.unwrap_or(HookResponse {
                    decision: Decision::Allow,
                    context: None,
                    message: None,
                    variables_updated: None,
                });
                Ok(serde_json::to_value(response)?)
            }
            other => Err(GobbyError::NotFound(format!("hooks.{other}"))),
        }
    }
}

/// Folds the synthesized `session_start` response into the real event's
/// response: a block from either stage wins, contexts concatenate, the
/// later message takes precedence, and `variables_updated` maps merge.
fn merge(prev: HookResponse, next: HookResponse) -> HookResponse {
    let decision = if matches!(prev.decision, Decision::Block) || matches!(next.decision, Decision::Block) {
        Decision::Block
    } else {
        Decision::Allow
    };
    let context = match (prev.context, next.context) {
        (Some(a), Some(b)) => Some(format!("{a}\n{b}")),
        (Some(a), None) => Some(a),
        (None, b) => b,
    };
    let message = next.message.or(prev.message);
    let variables_updated = match (prev.variables_updated, next.variables_updated) {
        (Some(Value::Object(mut a)), Some(Value::Object(b))) => {
            a.extend(b);
            Some(Value::Object(a))
        }
        (Some(a), None) => Some(a),
        (None, b) => b,
        (Some(a), Some(_)) => Some(a),
    };
    HookResponse { decision, context, message, variables_updated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Session, SessionSource};
    use crate::pipeline::{NoopMcpToolCaller, PipelineRegistry};
    use crate::registry::AgentRegistry;
    use crate::task_graph::TaskGraph;
    use crate::tools::ToolNamespace;
    use crate::workflow::definition::WorkflowRegistry;

    fn setup() -> (HooksNamespace, SessionId) {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let session = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&session).unwrap();
        let _ = Arc::new(AgentRegistry::new(pm.clone(), std::time::Duration::from_secs(5)));
        let ns = HooksNamespace {
            ingress: Arc::new(HookIngress::new(pm.clone())),
            engine: Arc::new(WorkflowEngine::new(WorkflowRegistry::default(), pm.clone())),
            task_graph: Arc::new(TaskGraph::new(pm.clone(), 3)),
            pipeline_executor: Arc::new(PipelineExecutor::new(PipelineRegistry::new(vec![]), Arc::new(NoopMcpToolCaller))),
            stop_signals: Arc::new(StopSignalRegistry::new()),
            persistence: pm,
        };
        (ns, session.id)
    }

    #[tokio::test]
    async fn ingest_normalizes_and_evaluates_to_an_allow_decision() {
        let (ns, session_id) = setup();
        let params = serde_json::json!({
            "session_id": session_id,
            "event_type": "PreToolUse",
            "source": "claude",
            "data": {"tool_name": "Bash"},
        });
        let response = ns.call("ingest", params).await.unwrap();
        assert_eq!(response["decision"], "allow");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let (ns, _session_id) = setup();
        let err = ns.call("nope", Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
