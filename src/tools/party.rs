//! `party.*` (§6.1): role-DAG party lifecycle, delegating to
//! `party::PartyScheduler`. `create_party_definition` is validate-only —
//! spawning members happens through `agents.start_agent` once `ready_roles`
//! names them, not through this namespace. `broadcast_to_party` delegates to
//! `messaging::MessagingBus`, which already implements the fan-out.

use super::parse;
use crate::error::{GobbyError, Result};
use crate::ids::{AgentRunId, PartyId, ProjectId, SessionId};
use crate::messaging::MessagingBus;
use crate::model::{MessagePriority, OnCrash};
use crate::party::{validate_dag, PartyScheduler, RoleSpec};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub struct PartyNamespace {
    pub scheduler: Arc<PartyScheduler>,
    pub messaging: Arc<MessagingBus>,
}

#[derive(Deserialize)]
struct DefineParams {
    roles: Vec<RoleSpec>,
}

#[derive(Deserialize)]
struct LaunchParams {
    project_id: ProjectId,
    founder_session_id: SessionId,
    name: String,
    roles: Vec<RoleSpec>,
}

#[derive(Deserialize)]
struct PartyIdParams {
    party_id: PartyId,
}

#[derive(Deserialize)]
struct SignalRoleParams {
    party_id: PartyId,
    role: String,
    index: usize,
    #[serde(flatten)]
    signal: RoleSignal,
}

#[derive(Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
enum RoleSignal {
    Running { agent_run_id: AgentRunId, session_id: SessionId },
    Completed,
    Crashed { retry_attempts: u32 },
}

#[derive(Deserialize)]
struct OverrideRecoveryParams {
    party_id: PartyId,
    role: String,
    on_crash: OnCrash,
}

#[derive(Deserialize)]
struct BroadcastToPartyParams {
    party_id: PartyId,
    from_session_id: SessionId,
    body: String,
    #[serde(default)]
    priority: MessagePriority,
}

#[async_trait]
impl super::ToolNamespace for PartyNamespace {
    async fn call(&self, tool: &str, params: Value) -> Result<Value> {
        let s = &self.scheduler;
        match tool {
            "create_party_definition" => {
                let p: DefineParams = parse(params)?;
                validate_dag(&p.roles)?;
                Ok(serde_json::to_value(p.roles)?)
            }
            "launch_party" => {
                let p: LaunchParams = parse(params)?;
                let party = s.create_party(p.project_id, p.founder_session_id, p.name, &p.roles)?;
                Ok(serde_json::to_value(party)?)
            }
            "get_party_status" => {
                let p: PartyIdParams = parse(params)?;
                Ok(serde_json::to_value(s.get_party(p.party_id)?)?)
            }
            "signal_role" => {
                let p: SignalRoleParams = parse(params)?;
                let party = s.get_party(p.party_id)?;
                let updated = match p.signal {
                    RoleSignal::Running { agent_run_id, session_id } => {
                        s.mark_member_running(party, &p.role, p.index, agent_run_id, session_id)?
                    }
                    RoleSignal::Completed => s.mark_member_completed(party, &p.role, p.index)?,
                    RoleSignal::Crashed { retry_attempts } => {
                        s.handle_crash(party, &p.role, p.index, retry_attempts).await?.0
                    }
                };
                Ok(serde_json::to_value(updated)?)
            }
            "override_recovery" => {
                let p: OverrideRecoveryParams = parse(params)?;
                let party = s.get_party(p.party_id)?;
                Ok(serde_json::to_value(s.override_recovery(party, &p.role, p.on_crash)?)?)
            }
            "cancel_party" => {
                let p: PartyIdParams = parse(params)?;
                let party = s.get_party(p.party_id)?;
                Ok(serde_json::to_value(s.cancel(party)?)?)
            }
            "broadcast_to_party" => {
                let p: BroadcastToPartyParams = parse(params)?;
                let party = s.get_party(p.party_id)?;
                let sent = self.messaging.broadcast_to_party(p.from_session_id, &party, p.body, p.priority)?;
                Ok(serde_json::to_value(sent)?)
            }
            "list_parties" => {
                #[derive(Deserialize)]
                struct ListPartiesParams {
                    project_id: ProjectId,
                }
                let p: ListPartiesParams = parse(params)?;
                Ok(serde_json::to_value(s.persistence().list_parties_by_project(p.project_id)?)?)
            }
            other => Err(GobbyError::NotFound(format!("party.{other}"))),
        }
    }
}
