//! Loading and indexing workflow definitions (§4.1 "Loading & indexing").
//!
//! Definitions are read from three layers and merged by name, project
//! overriding user overriding bundled.

use crate::error::{GobbyError, Result};
use crate::model::WorkflowDefinition;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Layer {
    Bundled,
    User,
    Project,
}

/// All loaded definitions plus the `trigger_event_type -> [(name, priority)]`
/// index used by the evaluator to find candidates without scanning every
/// definition on every event.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    definitions: HashMap<String, WorkflowDefinition>,
    trigger_index: HashMap<String, Vec<(String, i32)>>,
    step_workflows: Vec<String>,
}

impl WorkflowRegistry {
    pub fn load(bundled_dir: &Path, user_dir: Option<&Path>, project_dir: Option<&Path>) -> Result<Self> {
        let mut by_layer: Vec<(Layer, Vec<WorkflowDefinition>)> = Vec::new();
        by_layer.push((Layer::Bundled, load_dir(bundled_dir)?));
        if let Some(dir) = user_dir {
            by_layer.push((Layer::User, load_dir(dir)?));
        }
        if let Some(dir) = project_dir {
            by_layer.push((Layer::Project, load_dir(dir)?));
        }

        let mut merged: HashMap<String, (Layer, WorkflowDefinition)> = HashMap::new();
        for (layer, defs) in by_layer {
            for def in defs {
                if !def.is_valid() {
                    warn!(name = %def.name, "skipping workflow definition with neither triggers nor steps");
                    continue;
                }
                match merged.get(&def.name) {
                    Some((existing_layer, _)) if *existing_layer > layer => continue,
                    _ => {
                        merged.insert(def.name.clone(), (layer, def));
                    }
                }
            }
        }

        let mut registry = Self::default();
        for (name, (_, def)) in merged {
            registry.index_one(&def);
            registry.definitions.insert(name, def);
        }
        Ok(registry)
    }

    /// Builds a registry directly from a caller-provided set, skipping
    /// filesystem discovery — used by tests and by in-process embedding.
    pub fn from_definitions(defs: Vec<WorkflowDefinition>) -> Self {
        let mut registry = Self::default();
        for def in defs {
            if !def.is_valid() {
                continue;
            }
            registry.index_one(&def);
            registry.definitions.insert(def.name.clone(), def);
        }
        registry
    }

    fn index_one(&mut self, def: &WorkflowDefinition) {
        for event_type in def.triggers.keys() {
            self.trigger_index
                .entry(event_type.clone())
                .or_default()
                .push((def.name.clone(), def.priority));
        }
        if def.declares_steps() {
            self.step_workflows.push(def.name.clone());
        }
        for entries in self.trigger_index.values_mut() {
            entries.sort_by_key(|(_, priority)| *priority);
        }
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.definitions.values()
    }

    /// Candidate workflow names for an event, priority-ascending: those
    /// indexed to this event type plus, for tool events, every workflow
    /// that declares steps.
    pub fn candidates_for(&self, event_type: &str) -> Vec<String> {
        let mut names: Vec<(String, i32)> = self.trigger_index.get(event_type).cloned().unwrap_or_default();
        if event_type == "before_tool" || event_type == "after_tool" {
            for name in &self.step_workflows {
                if !names.iter().any(|(n, _)| n == name) {
                    if let Some(def) = self.definitions.get(name) {
                        names.push((name.clone(), def.priority));
                    }
                }
            }
        }
        names.sort_by_key(|(_, priority)| *priority);
        names.into_iter().map(|(name, _)| name).collect()
    }
}

fn load_dir(dir: &Path) -> Result<Vec<WorkflowDefinition>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "workflow source directory absent, skipping");
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| GobbyError::internal(format!("reading {}: {e}", dir.display())))? {
        let entry = entry.map_err(|e| GobbyError::internal(e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| GobbyError::internal(format!("reading {}: {e}", path.display())))?;
        let def: WorkflowDefinition = toml::from_str(&raw).map_err(|e| GobbyError::internal(format!("parsing {}: {e}", path.display())))?;
        out.push(def);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Step, TriggerRule};
    use std::collections::HashMap as Map;

    fn def(name: &str, priority: i32, event: &str) -> WorkflowDefinition {
        let mut triggers = Map::new();
        triggers.insert(
            event.to_string(),
            vec![TriggerRule { when: None, action: Action::TrackProgress }],
        );
        WorkflowDefinition {
            name: name.into(),
            priority,
            enabled_default: true,
            sources: vec![],
            workflow_variables: Map::new(),
            session_variables: Map::new(),
            triggers,
            steps: vec![],
            observers: vec![],
            exit_condition: None,
            max_agent_depth: None,
        }
    }

    #[test]
    fn candidates_sorted_by_priority_ascending() {
        let registry = WorkflowRegistry::from_definitions(vec![
            def("low-priority-first", 20, "session_start"),
            def("high-priority-first", 10, "session_start"),
        ]);
        let candidates = registry.candidates_for("session_start");
        assert_eq!(candidates, vec!["high-priority-first".to_string(), "low-priority-first".to_string()]);
    }

    #[test]
    fn step_workflows_are_candidates_for_tool_events_even_without_explicit_trigger() {
        let mut d = def("gated", 5, "session_start");
        d.steps.push(Step {
            name: "s1".into(),
            allowed_tools: vec![],
            rules: vec![],
            on_enter: vec![],
            on_exit: vec![],
            transitions: vec![],
        });
        let registry = WorkflowRegistry::from_definitions(vec![d]);
        assert!(registry.candidates_for("before_tool").contains(&"gated".to_string()));
    }

    #[test]
    fn invalid_definition_with_no_triggers_or_steps_is_skipped() {
        let mut d = def("dummy", 0, "session_start");
        d.triggers.clear();
        let registry = WorkflowRegistry::from_definitions(vec![d]);
        assert!(registry.get("dummy").is_none());
    }
}
