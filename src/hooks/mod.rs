//! Hook Ingress (§4.6): normalizes heterogeneous CLI hook payloads into a
//! canonical `HookEvent`, synthesizing session boundaries for providers with
//! no native `session_start`/`session_end`.

use crate::error::Result;
use crate::ids::SessionId;
use crate::persistence::PersistenceManager;
use crate::workflow::eval::HookEvent;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

const SESSION_INITIALIZED_VAR: &str = "_session_initialized";

/// A hook payload as received from a CLI, before event-type normalization.
#[derive(Debug, Clone)]
pub struct RawHookPayload {
    pub event_type: String,
    pub source: String,
    pub data: serde_json::Value,
}

pub struct HookIngress {
    persistence: Arc<PersistenceManager>,
}

impl HookIngress {
    pub fn new(persistence: Arc<PersistenceManager>) -> Self {
        Self { persistence }
    }

    /// Returns one or two events: a synthesized `session_start` ahead of the
    /// first `before_agent` when the provider has none of its own, then the
    /// normalized event itself.
    pub fn ingest(
        &self,
        session_id: SessionId,
        supports_native_session_start: bool,
        raw: RawHookPayload,
    ) -> Result<Vec<HookEvent>> {
        let event_type = canonical_event_type(&raw.event_type);
        let mut events = Vec::new();

        if !supports_native_session_start && event_type == "before_agent" {
            let mut vars = self.persistence.get_session_variables(session_id)?;
            let initialized = vars
                .get(SESSION_INITIALIZED_VAR)
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !initialized {
                debug!(session_id = %session_id, "synthesizing session_start for hookless provider");
                events.push(HookEvent {
                    event_type: "session_start".to_string(),
                    session_id,
                    source: raw.source.clone(),
                    data: json!({}),
                });
                vars.insert(SESSION_INITIALIZED_VAR.to_string(), json!(true));
                self.persistence.set_session_variables(session_id, &vars)?;
            }
        }

        events.push(HookEvent {
            event_type,
            session_id,
            source: raw.source,
            data: raw.data,
        });
        Ok(events)
    }
}

/// Maps provider-specific hook names (PascalCase CLI conventions) onto the
/// canonical snake_case event-type list (§4.6). Already-canonical names pass
/// through unchanged.
fn canonical_event_type(raw: &str) -> String {
    match raw {
        "SessionStart" => "session_start",
        "SessionEnd" => "session_end",
        "PreToolUse" => "before_tool",
        "PostToolUse" => "after_tool",
        "UserPromptSubmit" => "user_prompt_submit",
        "PreCompact" => "pre_compact",
        "Stop" | "SubagentStop" => "stop",
        "AgentStart" | "PreAgent" => "before_agent",
        "AgentEnd" | "PostAgent" => "after_agent",
        other => return pascal_to_snake(other),
    }
    .to_string()
}

fn pascal_to_snake(s: &str) -> String {
    if s.chars().all(|c| c.is_lowercase() || c == '_') {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
