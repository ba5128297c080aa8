//! Messaging Bus (§4.5): point-to-point and party-broadcast delivery between
//! sessions. A thin manager over the persistence message CRUD; routing rules
//! live here, storage lives there.

use crate::error::{GobbyError, Result};
use crate::ids::{MessageId, PartyId, SessionId};
use crate::model::{InterSessionMessage, MessagePriority, MessageType, Party, Session};
use crate::persistence::PersistenceManager;
use chrono::Utc;
use std::sync::Arc;

pub struct MessagingBus {
    persistence: Arc<PersistenceManager>,
}

impl MessagingBus {
    pub fn new(persistence: Arc<PersistenceManager>) -> Self {
        Self { persistence }
    }

    fn deliver(
        &self,
        from: SessionId,
        to: Option<SessionId>,
        party_id: Option<PartyId>,
        message_type: MessageType,
        priority: MessagePriority,
        body: String,
    ) -> Result<InterSessionMessage> {
        let message = InterSessionMessage {
            id: MessageId::new(),
            from_session_id: from,
            to_session_id: to,
            party_id,
            message_type,
            priority,
            body,
            read_at: None,
            created_at: Utc::now(),
        };
        self.persistence.insert_message(&message)?;
        Ok(message)
    }

    /// Sends from a child session up to its parent. Fails if the session has
    /// no parent (§4.5: hierarchy-aware, parent must exist).
    pub fn send_to_parent(&self, from: &Session, body: String, priority: MessagePriority) -> Result<InterSessionMessage> {
        let parent = from
            .parent_session_id
            .ok_or_else(|| GobbyError::InvalidState(format!("session {} has no parent", from.id)))?;
        self.deliver(from.id, Some(parent), None, MessageType::Direct, priority, body)
    }

    pub fn send_to_child(&self, from: SessionId, child: SessionId, body: String, priority: MessagePriority) -> Result<InterSessionMessage> {
        self.deliver(from, Some(child), None, MessageType::Direct, priority, body)
    }

    /// Arbitrary peer-to-peer send. Same-project membership is the only
    /// authorization check (§4.5: no hierarchy requirement for this path).
    pub fn send_message(&self, from: &Session, to: &Session, body: String, priority: MessagePriority) -> Result<InterSessionMessage> {
        if from.project_id != to.project_id {
            return Err(GobbyError::InvalidState(format!(
                "sessions {} and {} belong to different projects", from.id, to.id
            )));
        }
        self.deliver(from.id, Some(to.id), None, MessageType::Direct, priority, body)
    }

    /// Fans a single message out to every party member's session
    /// (recorded as one row per recipient, since `messages` is read per
    /// `to_session_id`).
    pub fn broadcast_to_party(&self, from: SessionId, party: &Party, body: String, priority: MessagePriority) -> Result<Vec<InterSessionMessage>> {
        let mut sent = Vec::new();
        for member in &party.members {
            if let Some(session_id) = member.session_id {
                if session_id == from {
                    continue;
                }
                sent.push(self.deliver(from, Some(session_id), Some(party.id), MessageType::Broadcast, priority, body.clone())?);
            }
        }
        Ok(sent)
    }

    /// System-level notification (party crash/pause/abort), routed directly
    /// to one session rather than fanned out (§4.4 `notify ∈ {leader, user}`).
    pub fn notify(&self, from: SessionId, to: SessionId, party_id: PartyId, body: String) -> Result<InterSessionMessage> {
        self.deliver(from, Some(to), Some(party_id), MessageType::StatusUpdate, MessagePriority::High, body)
    }

    pub fn poll_messages(&self, session_id: SessionId, unread_only: bool) -> Result<Vec<InterSessionMessage>> {
        self.persistence.list_messages_for_session(session_id, unread_only)
    }

    pub fn mark_read(&self, message_id: MessageId) -> Result<()> {
        self.persistence.mark_message_read(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NotifyTarget, OnCrash, PartyMember, PartyMemberStatus, PartyStatus, SessionSource};

    fn session(pm: &PersistenceManager, project_id: Option<crate::ids::ProjectId>) -> Session {
        let mut s = Session::new_root(SessionSource::Claude, project_id, "m1".into());
        if project_id.is_none() {
            s.project_id = None;
        }
        pm.insert_session(&s).unwrap();
        s
    }

    #[test]
    fn send_to_parent_fails_without_one() {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let bus = MessagingBus::new(pm.clone());
        let root = session(&pm, None);
        let err = bus.send_to_parent(&root, "hi".into(), MessagePriority::Normal).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
    }

    #[test]
    fn send_message_requires_same_project() {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let bus = MessagingBus::new(pm.clone());
        let project_a = crate::ids::ProjectId::new();
        let project_b = crate::ids::ProjectId::new();
        let a = session(&pm, Some(project_a));
        let b = session(&pm, Some(project_b));
        let err = bus.send_message(&a, &b, "hi".into(), MessagePriority::Normal).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
    }

    #[test]
    fn broadcast_to_party_reaches_every_other_member_exactly_once() {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let bus = MessagingBus::new(pm.clone());
        let founder = session(&pm, None);
        let dev1 = session(&pm, None);
        let dev2 = session(&pm, None);

        let party = Party {
            id: PartyId::new(),
            project_id: crate::ids::ProjectId::new(),
            founder_session_id: founder.id,
            name: "release".into(),
            status: PartyStatus::Active,
            members: vec![
                PartyMember { role: "founder".into(), depends_on: vec![], agent_run_id: None, session_id: Some(founder.id), status: PartyMemberStatus::Running, on_crash: OnCrash::Abort, notify: NotifyTarget::Party, restart_count: 0 },
                PartyMember { role: "dev".into(), depends_on: vec![], agent_run_id: None, session_id: Some(dev1.id), status: PartyMemberStatus::Running, on_crash: OnCrash::Restart, notify: NotifyTarget::Party, restart_count: 0 },
                PartyMember { role: "dev".into(), depends_on: vec![], agent_run_id: None, session_id: Some(dev2.id), status: PartyMemberStatus::Running, on_crash: OnCrash::Restart, notify: NotifyTarget::Party, restart_count: 0 },
            ],
            created_at: Utc::now(),
            completed_at: None,
        };

        let sent = bus.broadcast_to_party(founder.id, &party, "status?".into(), MessagePriority::Normal).unwrap();
        assert_eq!(sent.len(), 2);

        let inbox = bus.poll_messages(dev1.id, true).unwrap();
        assert_eq!(inbox.len(), 1);
        bus.mark_read(inbox[0].id).unwrap();
        assert!(bus.poll_messages(dev1.id, true).unwrap().is_empty());
    }
}
