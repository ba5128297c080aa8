use crate::ids::{SessionId, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    InjectContext { text: String },
    InjectMessage { text: String },
    BlockTools { tools: Vec<String> },
    BlockStop,
    SetVariable { name: String, value: serde_json::Value },
    SetSessionVariable { name: String, value: serde_json::Value },
    CallMcpTool { tool: String, args: serde_json::Value },
    RunPipeline { pipeline: String, store_as: String },
    ActivateWorkflow { name: String },
    EndWorkflow,
    ExtractHandoffContext,
    MemoryRecall { query: String },
    Remember { text: String },
    TrackProgress,
    CheckStopSignal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRule {
    /// Expression evaluated against the evaluation context; `None` always matches.
    pub when: Option<String>,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolRuleKind {
    Block,
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRule {
    pub tool_pattern: String,
    pub kind: ToolRuleKind,
    pub when: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTransition {
    pub to: String,
    pub when: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub allowed_tools: Vec<String>,
    pub rules: Vec<ToolRule>,
    pub on_enter: Vec<Action>,
    pub on_exit: Vec<Action>,
    pub transitions: Vec<StepTransition>,
}

/// Declarative spec loaded from a source repository of definitions (§3.1).
///
/// Invariant: a definition with neither `triggers` nor `steps` is invalid
/// (rejected by the loader, see `workflow::definition::load_all`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub priority: i32,
    pub enabled_default: bool,
    pub sources: Vec<String>,
    pub workflow_variables: HashMap<String, serde_json::Value>,
    pub session_variables: HashMap<String, serde_json::Value>,
    pub triggers: HashMap<String, Vec<TriggerRule>>,
    pub steps: Vec<Step>,
    pub observers: Vec<String>,
    pub exit_condition: Option<String>,
    pub max_agent_depth: Option<u32>,
}

impl WorkflowDefinition {
    pub fn is_valid(&self) -> bool {
        !self.triggers.is_empty() || !self.steps.is_empty()
    }

    pub fn declares_steps(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn first_step(&self) -> Option<&Step> {
        self.steps.first()
    }
}

/// The runtime per-session projection of a definition (§3.1).
///
/// Invariant: `(session_id, workflow_name)` is unique within the persistence
/// layer; enforced by a unique index, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: WorkflowInstanceId,
    pub session_id: SessionId,
    pub workflow_name: String,
    pub enabled: bool,
    pub priority: i32,
    pub current_step: Option<String>,
    pub step_entered_at: Option<DateTime<Utc>>,
    pub step_action_count: u32,
    pub total_action_count: u32,
    pub variables: HashMap<String, serde_json::Value>,
    pub context_injected: bool,
}

impl WorkflowInstance {
    pub fn activate(def: &WorkflowDefinition, session_id: SessionId) -> Self {
        Self {
            id: WorkflowInstanceId::new(),
            session_id,
            workflow_name: def.name.clone(),
            enabled: def.enabled_default,
            priority: def.priority,
            current_step: def.first_step().map(|s| s.name.clone()),
            step_entered_at: def.first_step().map(|_| Utc::now()),
            step_action_count: 0,
            total_action_count: 0,
            variables: def.workflow_variables.clone(),
            context_injected: false,
        }
    }

    /// Resets step state to the first step of `def`, clearing counters.
    /// Used when `current_step` refers to a step that no longer exists.
    pub fn reset_step_state(&mut self, def: &WorkflowDefinition) {
        self.current_step = def.first_step().map(|s| s.name.clone());
        self.step_entered_at = def.first_step().map(|_| Utc::now());
        self.step_action_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(enabled_default: bool) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "wf".into(),
            priority: 0,
            enabled_default,
            sources: vec![],
            workflow_variables: HashMap::new(),
            session_variables: HashMap::new(),
            triggers: HashMap::new(),
            steps: vec![],
            observers: vec![],
            exit_condition: None,
            max_agent_depth: None,
        }
    }

    #[test]
    fn activate_honors_enabled_default_true() {
        let instance = WorkflowInstance::activate(&def(true), SessionId::new());
        assert!(instance.enabled);
    }

    #[test]
    fn activate_honors_enabled_default_false() {
        let instance = WorkflowInstance::activate(&def(false), SessionId::new());
        assert!(!instance.enabled);
    }
}
