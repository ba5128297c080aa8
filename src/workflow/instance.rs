//! Per-session workflow instance lifecycle: activation on demand, lookup,
//! and the corrupt-step-state recovery rule (§3.2, §4.1 failure semantics).

use crate::error::Result;
use crate::ids::SessionId;
use crate::model::{WorkflowDefinition, WorkflowInstance};
use crate::persistence::PersistenceManager;
use tracing::warn;

/// Loads the instance for `(session_id, def.name)`, creating one from
/// `enabled_default` if it doesn't exist yet, and repairing it if
/// `current_step` no longer names a step in `def`.
pub fn load_or_activate(persistence: &PersistenceManager, session_id: SessionId, def: &WorkflowDefinition) -> Result<WorkflowInstance> {
    match persistence.get_workflow_instance(session_id, &def.name)? {
        Some(mut instance) => {
            if let Some(step_name) = &instance.current_step {
                if def.step(step_name).is_none() {
                    warn!(workflow = %def.name, step = %step_name, "unknown current_step, resetting to first step");
                    instance.reset_step_state(def);
                    persistence.upsert_workflow_instance(&instance)?;
                }
            }
            Ok(instance)
        }
        None => {
            let instance = WorkflowInstance::activate(def, session_id);
            if def.enabled_default {
                persistence.upsert_workflow_instance(&instance)?;
            }
            Ok(instance)
        }
    }
}

pub fn activate(persistence: &PersistenceManager, session_id: SessionId, def: &WorkflowDefinition) -> Result<WorkflowInstance> {
    let instance = WorkflowInstance::activate(def, session_id);
    persistence.upsert_workflow_instance(&instance)?;
    Ok(instance)
}

/// Deletes step state and workflow-scoped variables but preserves session
/// variables (§3.2).
pub fn end(persistence: &PersistenceManager, mut instance: WorkflowInstance) -> Result<()> {
    instance.enabled = false;
    instance.current_step = None;
    instance.step_entered_at = None;
    instance.variables.clear();
    persistence.upsert_workflow_instance(&instance)
}
