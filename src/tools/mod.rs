//! Tool Protocol Surface (§6.1): a namespaced, in-process async dispatch
//! table keyed by `"<namespace>.<tool>"`, plus a thin JSON-RPC-shaped stdio
//! reader at the binary's edge. Wire encoding beyond that shape is out of
//! scope; this module only has to exercise the dispatch table end to end.

mod agents;
mod hooks;
mod party;
mod sessions;
mod stdio;
mod tasks;
mod worktrees;
mod workflows;

pub use stdio::serve_stdio;

use crate::error::{GobbyError, Result};
use crate::hooks::HookIngress;
use crate::messaging::MessagingBus;
use crate::party::PartyScheduler;
use crate::persistence::PersistenceManager;
use crate::pipeline::PipelineExecutor;
use crate::registry::AgentRegistry;
use crate::task_graph::TaskGraph;
use crate::workflow::eval::WorkflowEngine;
use crate::workflow::StopSignalRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// One addressable namespace in the dispatch table (`agents`, `tasks`, ...).
#[async_trait]
pub trait ToolNamespace: Send + Sync {
    async fn call(&self, tool: &str, params: Value) -> Result<Value>;
}

/// Routes `"<namespace>.<tool>"` calls to the manager that owns that
/// namespace. Holds an `Arc` to every manager the daemon already built;
/// it does not own any state of its own.
pub struct ToolDispatcher {
    namespaces: std::collections::HashMap<&'static str, Box<dyn ToolNamespace>>,
}

pub struct Managers {
    pub persistence: Arc<PersistenceManager>,
    pub task_graph: Arc<TaskGraph>,
    pub registry: Arc<AgentRegistry>,
    pub workflow_engine: Arc<WorkflowEngine>,
    pub party_scheduler: Arc<PartyScheduler>,
    pub messaging: Arc<MessagingBus>,
    pub hook_ingress: Arc<HookIngress>,
    pub pipeline_executor: Arc<PipelineExecutor>,
    pub stop_signals: Arc<StopSignalRegistry>,
    pub max_agent_depth: u32,
}

impl ToolDispatcher {
    pub fn new(m: Managers) -> Self {
        let mut namespaces: std::collections::HashMap<&'static str, Box<dyn ToolNamespace>> = std::collections::HashMap::new();
        namespaces.insert(
            "agents",
            Box::new(agents::AgentsNamespace {
                registry: m.registry.clone(),
                persistence: m.persistence.clone(),
                messaging: m.messaging.clone(),
                max_agent_depth: m.max_agent_depth,
            }),
        );
        namespaces.insert("tasks", Box::new(tasks::TasksNamespace { task_graph: m.task_graph.clone() }));
        namespaces.insert(
            "workflows",
            Box::new(workflows::WorkflowsNamespace { engine: m.workflow_engine.clone() }),
        );
        namespaces.insert("worktrees", Box::new(worktrees::WorktreesNamespace { persistence: m.persistence.clone() }));
        namespaces.insert(
            "sessions",
            Box::new(sessions::SessionsNamespace {
                persistence: m.persistence.clone(),
                messaging: m.messaging.clone(),
                stop_signals: m.stop_signals.clone(),
            }),
        );
        namespaces.insert(
            "party",
            Box::new(party::PartyNamespace { scheduler: m.party_scheduler.clone(), messaging: m.messaging.clone() }),
        );
        namespaces.insert(
            "hooks",
            Box::new(hooks::HooksNamespace {
                ingress: m.hook_ingress.clone(),
                engine: m.workflow_engine.clone(),
                task_graph: m.task_graph.clone(),
                persistence: m.persistence.clone(),
                pipeline_executor: m.pipeline_executor.clone(),
                stop_signals: m.stop_signals.clone(),
            }),
        );
        Self { namespaces }
    }

    /// `method` is `"<namespace>.<tool>"`, e.g. `"tasks.create_task"`.
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        let (namespace, tool) = method
            .split_once('.')
            .ok_or_else(|| GobbyError::InvalidState(format!("tool method {method} is not namespace.tool shaped")))?;
        let ns = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| GobbyError::NotFound(format!("tool namespace {namespace}")))?;
        debug!(%namespace, %tool, "dispatching tool call");
        ns.call(tool, params).await
    }
}

fn field<'a>(params: &'a Value, name: &str) -> Result<&'a Value> {
    params
        .get(name)
        .ok_or_else(|| GobbyError::InvalidState(format!("missing required field {name}")))
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| GobbyError::InvalidState(format!("bad params: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_namespace_is_not_found() {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let registry = Arc::new(AgentRegistry::new(pm.clone(), std::time::Duration::from_secs(5)));
        let messaging = Arc::new(MessagingBus::new(pm.clone()));
        let dispatcher = ToolDispatcher::new(Managers {
            task_graph: Arc::new(TaskGraph::new(pm.clone(), 3)),
            registry: registry.clone(),
            workflow_engine: Arc::new(WorkflowEngine::new(
                crate::workflow::definition::WorkflowRegistry::from_definitions(vec![]),
                pm.clone(),
            )),
            party_scheduler: Arc::new(PartyScheduler::new(pm.clone(), registry.clone(), messaging.clone())),
            messaging: messaging.clone(),
            hook_ingress: Arc::new(crate::hooks::HookIngress::new(pm.clone())),
            pipeline_executor: Arc::new(crate::pipeline::PipelineExecutor::new(
                crate::pipeline::PipelineRegistry::new(vec![]),
                Arc::new(crate::pipeline::NoopMcpToolCaller),
            )),
            stop_signals: Arc::new(crate::workflow::StopSignalRegistry::new()),
            persistence: pm,
            max_agent_depth: 5,
        });
        let err = dispatcher.dispatch("nope.foo", Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn malformed_method_is_rejected() {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let registry = Arc::new(AgentRegistry::new(pm.clone(), std::time::Duration::from_secs(5)));
        let messaging = Arc::new(MessagingBus::new(pm.clone()));
        let dispatcher = ToolDispatcher::new(Managers {
            task_graph: Arc::new(TaskGraph::new(pm.clone(), 3)),
            registry: registry.clone(),
            workflow_engine: Arc::new(WorkflowEngine::new(
                crate::workflow::definition::WorkflowRegistry::from_definitions(vec![]),
                pm.clone(),
            )),
            party_scheduler: Arc::new(PartyScheduler::new(pm.clone(), registry.clone(), messaging.clone())),
            messaging: messaging.clone(),
            hook_ingress: Arc::new(crate::hooks::HookIngress::new(pm.clone())),
            pipeline_executor: Arc::new(crate::pipeline::PipelineExecutor::new(
                crate::pipeline::PipelineRegistry::new(vec![]),
                Arc::new(crate::pipeline::NoopMcpToolCaller),
            )),
            stop_signals: Arc::new(crate::workflow::StopSignalRegistry::new()),
            persistence: pm,
            max_agent_depth: 5,
        });
        let err = dispatcher.dispatch("tasks", Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
    }
}
