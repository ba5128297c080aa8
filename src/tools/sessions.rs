//! `sessions.*` (§6.1): session lookup, handoff-context bookkeeping, and
//! message history. `get_session_commits` is stubbed — git plumbing is out
//! of scope for this surface, matching `worktrees.sync_worktree_from_main`.

use super::parse;
use crate::error::{GobbyError, Result};
use crate::ids::{ProjectId, SessionId};
use crate::messaging::MessagingBus;
use crate::model::{MessagePriority, MessageType};
use crate::persistence::PersistenceManager;
use crate::workflow::StopSignalRegistry;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub struct SessionsNamespace {
    pub persistence: Arc<PersistenceManager>,
    pub messaging: Arc<MessagingBus>,
    pub stop_signals: Arc<StopSignalRegistry>,
}

#[derive(Deserialize)]
struct SessionIdParams {
    session_id: SessionId,
}

#[derive(Deserialize)]
struct ListSessionsParams {
    #[serde(default)]
    project_id: Option<ProjectId>,
}

#[derive(Deserialize)]
struct CreateHandoffParams {
    session_id: SessionId,
    markdown: String,
}

#[derive(Deserialize)]
struct SearchMessagesParams {
    session_id: SessionId,
    query: String,
}

#[derive(Deserialize)]
struct RequestStopParams {
    #[serde(default)]
    session_id: Option<SessionId>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct PeekStopSignalParams {
    session_id: SessionId,
}

#[async_trait]
impl super::ToolNamespace for SessionsNamespace {
    async fn call(&self, tool: &str, params: Value) -> Result<Value> {
        let p = &self.persistence;
        match tool {
            "get_session" | "get_current_session" => {
                let params: SessionIdParams = parse(params)?;
                Ok(serde_json::to_value(p.get_session(params.session_id)?)?)
            }
            "list_sessions" => {
                let params: ListSessionsParams = parse(params)?;
                Ok(serde_json::to_value(p.list_sessions_by_project(params.project_id)?)?)
            }
            "create_handoff" => {
                let params: CreateHandoffParams = parse(params)?;
                let mut session = p.get_session(params.session_id)?;
                session.compact_markdown = Some(params.markdown.clone());
                session.updated_at = Utc::now();
                p.update_session(&session)?;
                if session.parent_session_id.is_some() {
                    if let Err(e) = self.messaging.send_to_parent(&session, params.markdown, MessagePriority::Normal) {
                        warn!(%e, "create_handoff could not notify parent, context was still saved");
                    }
                }
                let _ = MessageType::HandoffContext;
                Ok(serde_json::to_value(session)?)
            }
            "get_handoff_context" => {
                let params: SessionIdParams = parse(params)?;
                let session = p.get_session(params.session_id)?;
                Ok(serde_json::json!({ "markdown": session.compact_markdown }))
            }
            "get_session_commits" => {
                let params: SessionIdParams = parse(params)?;
                warn!(session_id = %params.session_id, "get_session_commits has no bound git plumbing; returning an empty list");
                Ok(serde_json::json!({ "commits": Vec::<String>::new() }))
            }
            "get_session_messages" => {
                let params: SessionIdParams = parse(params)?;
                Ok(serde_json::to_value(self.messaging.poll_messages(params.session_id, false)?)?)
            }
            "search_messages" => {
                let params: SearchMessagesParams = parse(params)?;
                let needle = params.query.to_lowercase();
                let matches: Vec<_> = self
                    .messaging
                    .poll_messages(params.session_id, false)?
                    .into_iter()
                    .filter(|m| m.body.to_lowercase().contains(&needle))
                    .collect();
                Ok(serde_json::to_value(matches)?)
            }
            "request_stop" => {
                let params: RequestStopParams = parse(params)?;
                self.stop_signals.request(params.session_id, params.reason);
                Ok(serde_json::json!({ "requested": true, "session_id": params.session_id }))
            }
            "peek_stop_signal" => {
                let params: PeekStopSignalParams = parse(params)?;
                Ok(serde_json::to_value(self.stop_signals.peek(params.session_id))?)
            }
            other => Err(GobbyError::NotFound(format!("sessions.{other}"))),
        }
    }
}
