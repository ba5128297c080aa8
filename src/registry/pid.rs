//! PID discovery for terminal-mode agents (§4.3 "PID discovery algorithm").

use crate::model::Session;
use crate::registry::process::ProcessHandle;
use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

/// Where the discovered PID came from; surfaced in the kill response
/// (§8 scenario S5: `found_via ∈ {terminal_context, process_enumeration}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoundVia {
    TerminalContext,
    ProcessEnumeration,
    Unreachable,
}

pub fn marker_for(session_id: &str) -> String {
    format!("Your Gobby session_id is: {session_id}")
}

/// 1. Prefer `terminal_context.parent_pid` deposited by the CLI's
///    session-start hook. 2. Else enumerate processes for the spawn marker.
///    3. Else unreachable.
pub fn discover(session: &Session) -> (Option<ProcessHandle>, FoundVia) {
    if let Some(pid) = session
        .terminal_context
        .get("parent_pid")
        .and_then(|v| v.as_u64())
    {
        return (Some(ProcessHandle::new(pid as u32)), FoundVia::TerminalContext);
    }

    let marker = marker_for(&session.id.to_string());
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    for (pid, process) in sys.processes() {
        let cmdline = process
            .cmd()
            .iter()
            .filter_map(|s| s.to_str())
            .collect::<Vec<_>>()
            .join(" ");
        if cmdline.contains(&marker) {
            debug!(pid = pid.as_u32(), "discovered terminal agent pid via process enumeration");
            return (Some(ProcessHandle::new(pid.as_u32())), FoundVia::ProcessEnumeration);
        }
    }
    (None, FoundVia::Unreachable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_format_matches_spawn_preamble_convention() {
        assert_eq!(marker_for("sess-abc12345"), "Your Gobby session_id is: sess-abc12345");
    }
}
