//! Stop Signal registry (§3.1, §9 "the stop signal registry is the one
//! acceptable global-scope structure; protect it with a mutex and
//! drain-on-read idioms"). Kept in-memory rather than persisted: a stop
//! request only matters to a process that is still alive to observe it, and
//! surviving a daemon restart would just leave a stale signal nothing ever
//! drains.

use crate::ids::SessionId;
use crate::model::StopSignal;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct StopSignalRegistry {
    signals: Mutex<HashMap<Option<SessionId>, StopSignal>>,
}

impl StopSignalRegistry {
    pub fn new() -> Self {
        Self { signals: Mutex::new(HashMap::new()) }
    }

    /// Records a stop request. `session_id: None` is a global stop, observed
    /// by every session's `check_stop_signal`.
    pub fn request(&self, session_id: Option<SessionId>, reason: Option<String>) {
        let mut signals = self.signals.lock().expect("stop signal registry lock poisoned");
        signals.insert(session_id, StopSignal::new(session_id, reason));
    }

    /// Drain-on-read: removes and returns whichever signal applies to
    /// `session_id`. A global stop takes precedence over a session-scoped
    /// one (§3.1 "global and per-session stops coexist with global taking
    /// precedence"), but only the signal actually returned is drained; the
    /// other survives for the next session to observe it.
    pub fn take(&self, session_id: SessionId) -> Option<StopSignal> {
        let mut signals = self.signals.lock().expect("stop signal registry lock poisoned");
        if let Some(sig) = signals.remove(&None) {
            return Some(sig);
        }
        signals.remove(&Some(session_id))
    }

    /// Non-destructive peek, for a tool-surface status query.
    pub fn peek(&self, session_id: SessionId) -> Option<StopSignal> {
        let signals = self.signals.lock().expect("stop signal registry lock poisoned");
        signals
            .get(&None)
            .or_else(|| signals.get(&Some(session_id)))
            .cloned()
    }
}

impl Default for StopSignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_signal_takes_precedence_over_session_scoped() {
        let registry = StopSignalRegistry::new();
        let session_id = SessionId::new();
        registry.request(None, Some("global".into()));
        registry.request(Some(session_id), Some("targeted".into()));

        let sig = registry.take(session_id).unwrap();
        assert_eq!(sig.reason.as_deref(), Some("global"));
        // The session-scoped signal was left untouched; draining the global
        // signal exposes it on the next take.
        let sig2 = registry.take(session_id).unwrap();
        assert_eq!(sig2.reason.as_deref(), Some("targeted"));
    }

    #[test]
    fn take_drains_the_signal() {
        let registry = StopSignalRegistry::new();
        let session_id = SessionId::new();
        registry.request(Some(session_id), None);
        assert!(registry.take(session_id).is_some());
        assert!(registry.take(session_id).is_none());
    }

    #[test]
    fn peek_does_not_drain() {
        let registry = StopSignalRegistry::new();
        let session_id = SessionId::new();
        registry.request(Some(session_id), None);
        assert!(registry.peek(session_id).is_some());
        assert!(registry.peek(session_id).is_some());
        assert!(registry.take(session_id).is_some());
    }

    #[test]
    fn no_signal_is_none() {
        let registry = StopSignalRegistry::new();
        assert!(registry.take(SessionId::new()).is_none());
    }
}
