//! `workflows.*` (§6.1): session-scoped workflow-instance lifecycle,
//! delegating to `workflow::instance` and the persisted variable maps.

use super::parse;
use crate::error::{GobbyError, Result};
use crate::ids::SessionId;
use crate::workflow::eval::WorkflowEngine;
use crate::workflow::instance;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub struct WorkflowsNamespace {
    pub engine: Arc<WorkflowEngine>,
}

#[derive(Deserialize)]
struct ActivateParams {
    session_id: SessionId,
    workflow_name: String,
}

#[derive(Deserialize)]
struct EndParams {
    session_id: SessionId,
    workflow_name: String,
}

#[derive(Deserialize)]
struct SetVariableParams {
    session_id: SessionId,
    workflow_name: String,
    name: String,
    value: Value,
}

#[derive(Deserialize)]
struct SetSessionVariableParams {
    session_id: SessionId,
    name: String,
    value: Value,
}

#[derive(Deserialize)]
struct GetVariableParams {
    session_id: SessionId,
    workflow_name: Option<String>,
    name: String,
}

#[derive(Deserialize)]
struct ListActiveParams {
    session_id: SessionId,
}

#[async_trait]
impl super::ToolNamespace for WorkflowsNamespace {
    async fn call(&self, tool: &str, params: Value) -> Result<Value> {
        let persistence = self.engine.persistence();
        match tool {
            "activate_workflow" => {
                let p: ActivateParams = parse(params)?;
                let def = self
                    .engine
                    .definition(&p.workflow_name)
                    .ok_or_else(|| GobbyError::NotFound(format!("workflow definition {}", p.workflow_name)))?;
                Ok(serde_json::to_value(instance::activate(persistence, p.session_id, &def)?)?)
            }
            "end_workflow" => {
                let p: EndParams = parse(params)?;
                let inst = persistence
                    .get_workflow_instance(p.session_id, &p.workflow_name)?
                    .ok_or_else(|| GobbyError::NotFound(format!("workflow instance {}", p.workflow_name)))?;
                instance::end(persistence, inst)?;
                Ok(Value::Bool(true))
            }
            "set_variable" => {
                let p: SetVariableParams = parse(params)?;
                let mut inst = persistence
                    .get_workflow_instance(p.session_id, &p.workflow_name)?
                    .ok_or_else(|| GobbyError::NotFound(format!("workflow instance {}", p.workflow_name)))?;
                inst.variables.insert(p.name, p.value);
                persistence.upsert_workflow_instance(&inst)?;
                Ok(serde_json::to_value(inst)?)
            }
            "set_session_variable" => {
                let p: SetSessionVariableParams = parse(params)?;
                let mut vars = persistence.get_session_variables(p.session_id)?;
                vars.insert(p.name, p.value);
                persistence.set_session_variables(p.session_id, &vars)?;
                Ok(serde_json::to_value(vars)?)
            }
            "get_variable" => {
                let p: GetVariableParams = parse(params)?;
                if let Some(workflow_name) = &p.workflow_name {
                    if let Some(inst) = persistence.get_workflow_instance(p.session_id, workflow_name)? {
                        if let Some(v) = inst.variables.get(&p.name) {
                            return Ok(v.clone());
                        }
                    }
                }
                let vars = persistence.get_session_variables(p.session_id)?;
                Ok(vars.get(&p.name).cloned().unwrap_or(Value::Null))
            }
            "list_active_workflows" => {
                let p: ListActiveParams = parse(params)?;
                let instances = persistence
                    .list_workflow_instances_for_session(p.session_id)?
                    .into_iter()
                    .filter(|i| i.enabled)
                    .collect::<Vec<_>>();
                Ok(serde_json::to_value(instances)?)
            }
            other => Err(GobbyError::NotFound(format!("workflows.{other}"))),
        }
    }
}
