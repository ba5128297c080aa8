//! The per-event evaluation algorithm (§4.1 "Per-event evaluation").

use crate::error::Result;
use crate::ids::SessionId;
use crate::model::{ToolRule, ToolRuleKind, WorkflowInstance};
use crate::persistence::PersistenceManager;
use crate::workflow::actions::{self, ActionHost, ActionOutcome};
use crate::workflow::condition::ConditionProvider;
use crate::workflow::definition::WorkflowRegistry;
use crate::workflow::expr::{self, EvalContext};
use crate::workflow::instance;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{debug, error};

/// Bounds a single event's step-transition chain to prevent livelock
/// (§4.1 step 3d).
pub const MAX_TRANSITION_CHAIN: u32 = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Block,
}

/// Canonical normalized hook payload (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    pub event_type: String,
    pub session_id: SessionId,
    pub source: String,
    pub data: serde_json::Value,
}

impl HookEvent {
    pub fn tool_name(&self) -> Option<&str> {
        self.data.get("tool_name").and_then(|v| v.as_str())
    }

    pub fn user_text(&self) -> Option<&str> {
        self.data.get("text").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResponse {
    pub decision: Decision,
    pub context: Option<String>,
    pub message: Option<String>,
    pub variables_updated: Option<serde_json::Value>,
}

pub struct WorkflowEngine {
    registry: RwLock<WorkflowRegistry>,
    persistence: std::sync::Arc<PersistenceManager>,
}

impl WorkflowEngine {
    pub fn new(registry: WorkflowRegistry, persistence: std::sync::Arc<PersistenceManager>) -> Self {
        Self { registry: RwLock::new(registry), persistence }
    }

    /// Replaces the loaded definitions, blocking new evaluations for the
    /// duration (§4.1 "Concurrency").
    pub fn reload(&self, registry: WorkflowRegistry) {
        *self.registry.write().expect("workflow registry lock poisoned") = registry;
    }

    pub fn definition(&self, name: &str) -> Option<crate::model::WorkflowDefinition> {
        self.registry.read().expect("workflow registry lock poisoned").get(name).cloned()
    }

    pub fn persistence(&self) -> &std::sync::Arc<PersistenceManager> {
        &self.persistence
    }

    pub fn evaluate(&self, event: &HookEvent, conditions: &dyn ConditionProvider, host: &dyn ActionHost) -> Result<HookResponse> {
        let registry = self.registry.read().expect("workflow registry lock poisoned");
        let candidates = registry.candidates_for(&event.event_type);

        let mut session_variables = self.persistence.get_session_variables(event.session_id)?;
        let session_variables_before = session_variables.clone();
        let mut contexts: Vec<String> = Vec::new();
        let mut message: Option<String> = None;
        let mut decision = Decision::Allow;
        let mut to_activate: Vec<String> = Vec::new();
        let mut to_end: Vec<WorkflowInstance> = Vec::new();
        let mut variables_updated: std::collections::HashMap<String, serde_json::Value> = std::collections::HashMap::new();

        'workflows: for name in candidates {
            let Some(def) = registry.get(&name) else { continue };
            let mut wi = instance::load_or_activate(&self.persistence, event.session_id, def)?;
            if !wi.enabled {
                continue;
            }
            let wi_variables_before = wi.variables.clone();

            let eval_ctx = EvalContext {
                event_type: &event.event_type,
                tool_name: event.tool_name(),
                workflow_variables: &wi.variables,
                session_variables: &session_variables,
                conditions,
            };

            if let Some(rules) = def.triggers.get(&event.event_type) {
                for rule in rules {
                    if !expr::eval(rule.when.as_deref(), &eval_ctx) {
                        continue;
                    }
                    let outcome = actions::execute(&rule.action, &mut wi, &mut session_variables, host);
                    apply_outcome(&outcome, &mut contexts, &mut message, &mut decision, &mut to_activate);
                    if outcome.end_workflow {
                        to_end.push(wi.clone());
                    }
                    if matches!(decision, Decision::Block) {
                        record_changed(&mut variables_updated, &def.name, &wi_variables_before, &wi.variables);
                        self.persistence.upsert_workflow_instance(&wi)?;
                        break 'workflows;
                    }
                }
            }

            if def.declares_steps() && (event.event_type == "before_tool" || event.event_type == "after_tool") {
                if let Some(tool) = event.tool_name() {
                    if tool_blocked(def.step(wi.current_step.as_deref().unwrap_or_default()), tool, &eval_ctx) {
                        decision = Decision::Block;
                        record_changed(&mut variables_updated, &def.name, &wi_variables_before, &wi.variables);
                        self.persistence.upsert_workflow_instance(&wi)?;
                        break 'workflows;
                    }
                }
                run_transitions(def, &mut wi, &mut session_variables, host, &mut contexts, conditions);
            }

            record_changed(&mut variables_updated, &def.name, &wi_variables_before, &wi.variables);
            self.persistence.upsert_workflow_instance(&wi)?;
        }
        drop(registry);

        for (key, value) in session_variables.iter() {
            if session_variables_before.get(key) != Some(value) {
                variables_updated.insert(key.clone(), value.clone());
            }
        }

        self.persistence.set_session_variables(event.session_id, &session_variables)?;
        for wi in to_end {
            instance::end(&self.persistence, wi)?;
        }
        for name in to_activate {
            if let Some(def) = self.registry.read().expect("workflow registry lock poisoned").get(&name) {
                instance::activate(&self.persistence, event.session_id, def)?;
            }
        }

        Ok(HookResponse {
            decision,
            context: if contexts.is_empty() { None } else { Some(contexts.join("\n")) },
            message,
            variables_updated: if variables_updated.is_empty() {
                None
            } else {
                Some(serde_json::to_value(variables_updated)?)
            },
        })
    }
}

/// Records every workflow-scoped variable that changed or was added under
/// `"<workflow_name>.<key>"`, keeping workflow-scoped keys from colliding
/// with each other or with session-scoped keys in the flat response map.
fn record_changed(
    updated: &mut std::collections::HashMap<String, serde_json::Value>,
    workflow_name: &str,
    before: &std::collections::HashMap<String, serde_json::Value>,
    after: &std::collections::HashMap<String, serde_json::Value>,
) {
    for (key, value) in after.iter() {
        if before.get(key) != Some(value) {
            updated.insert(format!("{workflow_name}.{key}"), value.clone());
        }
    }
}

fn apply_outcome(
    outcome: &ActionOutcome,
    contexts: &mut Vec<String>,
    message: &mut Option<String>,
    decision: &mut Decision,
    to_activate: &mut Vec<String>,
) {
    if let Some(c) = &outcome.context {
        contexts.push(c.clone());
    }
    if let Some(m) = &outcome.message {
        *message = Some(m.clone());
    }
    if outcome.block {
        *decision = Decision::Block;
    }
    if let Some(name) = &outcome.activate_workflow {
        to_activate.push(name.clone());
    }
}

/// Tool-rule precedence: explicit block > explicit allow > step
/// `allowed_tools` > default allow (§4.1 step 3c).
fn tool_blocked(step: Option<&crate::model::Step>, tool_name: &str, ctx: &EvalContext) -> bool {
    let Some(step) = step else { return false };
    let matching: Vec<&ToolRule> = step
        .rules
        .iter()
        .filter(|r| tool_matches(&r.tool_pattern, tool_name) && expr::eval(r.when.as_deref(), ctx))
        .collect();
    if matching.iter().any(|r| matches!(r.kind, ToolRuleKind::Block)) {
        return true;
    }
    if matching.iter().any(|r| matches!(r.kind, ToolRuleKind::Allow)) {
        return false;
    }
    if !step.allowed_tools.is_empty() {
        return !step.allowed_tools.iter().any(|t| tool_matches(t, tool_name));
    }
    false
}

fn tool_matches(pattern: &str, tool_name: &str) -> bool {
    pattern == "*" || pattern == tool_name
}

fn run_transitions(
    def: &crate::model::WorkflowDefinition,
    wi: &mut WorkflowInstance,
    session_variables: &mut std::collections::HashMap<String, serde_json::Value>,
    host: &dyn ActionHost,
    contexts: &mut Vec<String>,
    conditions: &dyn ConditionProvider,
) {
    let mut chained = 0;
    loop {
        if chained >= MAX_TRANSITION_CHAIN {
            debug!(workflow = %def.name, "transition chain bound reached, deferring to next event");
            break;
        }
        let Some(current_name) = wi.current_step.clone() else { break };
        let Some(current) = def.step(&current_name) else { break };

        let eval_ctx = EvalContext {
            event_type: "step_transition",
            tool_name: None,
            workflow_variables: &wi.variables,
            session_variables,
            conditions,
        };
        let Some(transition) = current.transitions.iter().find(|t| expr::eval(Some(&t.when), &eval_ctx)) else {
            break;
        };
        let Some(next) = def.step(&transition.to) else {
            error!(workflow = %def.name, to = %transition.to, "transition target step does not exist");
            break;
        };

        for action in &current.on_exit {
            let outcome = actions::execute(action, wi, session_variables, host);
            if let Some(c) = outcome.context {
                contexts.push(c);
            }
        }
        wi.current_step = Some(next.name.clone());
        wi.step_entered_at = Some(chrono::Utc::now());
        wi.step_action_count = 0;
        for action in &next.on_enter {
            let outcome = actions::execute(action, wi, session_variables, host);
            if let Some(c) = outcome.context {
                contexts.push(c);
            }
        }
        chained += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Session, SessionSource, Step, StepTransition, TriggerRule, WorkflowDefinition};
    use crate::workflow::actions::NoopActionHost;
    use crate::workflow::condition::StaticConditionProvider;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn setup() -> (WorkflowEngine, SessionId) {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let session = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&session).unwrap();
        (WorkflowEngine::new(WorkflowRegistry::default(), pm), session.id)
    }

    fn cond() -> StaticConditionProvider {
        StaticConditionProvider { task_tree_complete: false, user_says: false, is_test_file: false }
    }

    #[test]
    fn s3_first_block_wins() {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let session = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&session).unwrap();

        let mut wf10_triggers = HashMap::new();
        wf10_triggers.insert(
            "before_tool".to_string(),
            vec![TriggerRule { when: None, action: Action::InjectContext { text: "sec-block".into() } },
                 TriggerRule { when: None, action: Action::BlockStop }],
        );
        let wf10 = WorkflowDefinition {
            name: "wf10".into(), priority: 10, enabled_default: true, sources: vec![],
            workflow_variables: HashMap::new(), session_variables: HashMap::new(),
            triggers: wf10_triggers, steps: vec![], observers: vec![], exit_condition: None, max_agent_depth: None,
        };

        let mut wf20_triggers = HashMap::new();
        wf20_triggers.insert(
            "before_tool".to_string(),
            vec![TriggerRule { when: None, action: Action::InjectContext { text: "audit-log".into() } }],
        );
        let wf20 = WorkflowDefinition {
            name: "wf20".into(), priority: 20, enabled_default: true, sources: vec![],
            workflow_variables: HashMap::new(), session_variables: HashMap::new(),
            triggers: wf20_triggers, steps: vec![], observers: vec![], exit_condition: None, max_agent_depth: None,
        };

        let engine = WorkflowEngine::new(WorkflowRegistry::from_definitions(vec![wf10, wf20]), pm);
        let event = HookEvent {
            event_type: "before_tool".into(),
            session_id: session.id,
            source: "claude".into(),
            data: serde_json::json!({"tool_name": "Bash"}),
        };
        let response = engine.evaluate(&event, &cond(), &NoopActionHost).unwrap();
        assert!(matches!(response.decision, Decision::Block));
        assert_eq!(response.context.as_deref(), Some("sec-block"));
    }

    #[test]
    fn variables_updated_reports_workflow_and_session_scoped_changes() {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let session = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&session).unwrap();

        let mut triggers = HashMap::new();
        triggers.insert(
            "before_tool".to_string(),
            vec![
                TriggerRule { when: None, action: Action::SetVariable { name: "counter".into(), value: serde_json::json!(1) } },
                TriggerRule { when: None, action: Action::SetSessionVariable { name: "flag".into(), value: serde_json::json!(true) } },
            ],
        );
        let def = WorkflowDefinition {
            name: "tracked".into(), priority: 0, enabled_default: true, sources: vec![],
            workflow_variables: HashMap::new(), session_variables: HashMap::new(),
            triggers, steps: vec![], observers: vec![], exit_condition: None, max_agent_depth: None,
        };

        let engine = WorkflowEngine::new(WorkflowRegistry::from_definitions(vec![def]), pm);
        let event = HookEvent {
            event_type: "before_tool".into(), session_id: session.id, source: "claude".into(),
            data: serde_json::json!({"tool_name": "Bash"}),
        };
        let response = engine.evaluate(&event, &cond(), &NoopActionHost).unwrap();
        let updated = response.variables_updated.expect("variables_updated should be populated");
        assert_eq!(updated.get("tracked.counter"), Some(&serde_json::json!(1)));
        assert_eq!(updated.get("flag"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn s4_variable_isolation() {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let session = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&session).unwrap();

        let mut a_vars = HashMap::new();
        a_vars.insert("counter".to_string(), serde_json::json!(0));
        let mut a_sess_vars = HashMap::new();
        a_sess_vars.insert("flag".to_string(), serde_json::json!(false));
        let mut a_triggers = HashMap::new();
        a_triggers.insert(
            "before_tool".to_string(),
            vec![
                TriggerRule { when: None, action: Action::SetVariable { name: "counter".into(), value: serde_json::json!(5) } },
                TriggerRule { when: None, action: Action::SetSessionVariable { name: "flag".into(), value: serde_json::json!(true) } },
            ],
        );
        let wf_a = WorkflowDefinition {
            name: "a".into(), priority: 0, enabled_default: true, sources: vec![],
            workflow_variables: a_vars, session_variables: a_sess_vars.clone(),
            triggers: a_triggers, steps: vec![], observers: vec![], exit_condition: None, max_agent_depth: None,
        };

        let mut b_vars = HashMap::new();
        b_vars.insert("counter".to_string(), serde_json::json!(0));
        let wf_b = WorkflowDefinition {
            name: "b".into(), priority: 10, enabled_default: true, sources: vec![],
            workflow_variables: b_vars, session_variables: a_sess_vars,
            triggers: HashMap::new(), steps: vec![], observers: vec![], exit_condition: None, max_agent_depth: None,
        };

        let engine = WorkflowEngine::new(WorkflowRegistry::from_definitions(vec![wf_a, wf_b.clone()]), pm.clone());
        let event = HookEvent {
            event_type: "before_tool".into(), session_id: session.id, source: "claude".into(),
            data: serde_json::json!({"tool_name": "Bash"}),
        };
        engine.evaluate(&event, &cond(), &NoopActionHost).unwrap();

        let b_instance = pm.get_workflow_instance(session.id, "b").unwrap().unwrap();
        assert_eq!(b_instance.variables.get("counter"), Some(&serde_json::json!(0)));

        let session_vars = pm.get_session_variables(session.id).unwrap();
        assert_eq!(session_vars.get("flag"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn step_tool_rule_blocks_tool_not_in_allowed_list() {
        let (engine_pm, session_id) = setup();
        let step = Step {
            name: "s1".into(), allowed_tools: vec!["Read".into()], rules: vec![],
            on_enter: vec![], on_exit: vec![], transitions: vec![],
        };
        let def = WorkflowDefinition {
            name: "gated".into(), priority: 0, enabled_default: true, sources: vec![],
            workflow_variables: HashMap::new(), session_variables: HashMap::new(),
            triggers: HashMap::new(), steps: vec![step], observers: vec![], exit_condition: None, max_agent_depth: None,
        };
        engine_pm.reload(WorkflowRegistry::from_definitions(vec![def]));
        let event = HookEvent {
            event_type: "before_tool".into(), session_id, source: "claude".into(),
            data: serde_json::json!({"tool_name": "Bash"}),
        };
        let response = engine_pm.evaluate(&event, &cond(), &NoopActionHost).unwrap();
        assert!(matches!(response.decision, Decision::Block));
    }

    #[test]
    fn explicit_allow_overrides_step_allowed_tools_restriction() {
        let (engine, session_id) = setup();
        let step = Step {
            name: "s1".into(),
            allowed_tools: vec!["Read".into()],
            rules: vec![ToolRule { tool_pattern: "Bash".into(), kind: ToolRuleKind::Allow, when: None }],
            on_enter: vec![], on_exit: vec![], transitions: vec![],
        };
        let def = WorkflowDefinition {
            name: "gated".into(), priority: 0, enabled_default: true, sources: vec![],
            workflow_variables: HashMap::new(), session_variables: HashMap::new(),
            triggers: HashMap::new(), steps: vec![step], observers: vec![], exit_condition: None, max_agent_depth: None,
        };
        engine.reload(WorkflowRegistry::from_definitions(vec![def]));
        let event = HookEvent {
            event_type: "before_tool".into(), session_id, source: "claude".into(),
            data: serde_json::json!({"tool_name": "Bash"}),
        };
        let response = engine.evaluate(&event, &cond(), &NoopActionHost).unwrap();
        assert!(matches!(response.decision, Decision::Allow));
    }

    #[test]
    fn step_transitions_on_enter_and_on_exit_fire() {
        let (engine, session_id) = setup();
        let s1 = Step {
            name: "s1".into(), allowed_tools: vec![], rules: vec![],
            on_enter: vec![], on_exit: vec![Action::InjectContext { text: "left-s1".into() }],
            transitions: vec![StepTransition { to: "s2".into(), when: "true".into() }],
        };
        let s2 = Step {
            name: "s2".into(), allowed_tools: vec![], rules: vec![],
            on_enter: vec![Action::InjectContext { text: "entered-s2".into() }],
            on_exit: vec![], transitions: vec![],
        };
        let def = WorkflowDefinition {
            name: "gated".into(), priority: 0, enabled_default: true, sources: vec![],
            workflow_variables: HashMap::new(), session_variables: HashMap::new(),
            triggers: HashMap::new(), steps: vec![s1, s2], observers: vec![], exit_condition: None, max_agent_depth: None,
        };
        engine.reload(WorkflowRegistry::from_definitions(vec![def]));
        let event = HookEvent {
            event_type: "before_tool".into(), session_id, source: "claude".into(),
            data: serde_json::json!({"tool_name": "Bash"}),
        };
        let response = engine.evaluate(&event, &cond(), &NoopActionHost).unwrap();
        let context = response.context.unwrap_or_default();
        assert!(context.contains("left-s1"));
        assert!(context.contains("entered-s2"));
    }
}
