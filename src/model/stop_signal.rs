use crate::ids::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cooperative stop request a running agent is expected to observe via
/// `check_stop_signal` (§3.1, §4.1 action `CheckStopSignal`). `session_id`
/// is `None` for a global stop (every session observes it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSignal {
    pub session_id: Option<SessionId>,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub handled_at: Option<DateTime<Utc>>,
}

impl StopSignal {
    pub fn new(session_id: Option<SessionId>, reason: Option<String>) -> Self {
        Self {
            session_id,
            reason,
            requested_at: Utc::now(),
            handled_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handled_at.is_none()
    }
}
