//! Cross-platform "polite stop, then force stop" primitive (§4.3, §9
//! decision 4). Unix targets send `SIGTERM` then `SIGKILL` directly; other
//! targets fall back to `sysinfo`'s coarser single-signal `kill()`. Call
//! sites never branch on platform — they only see `ProcessHandle`.

use crate::error::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn is_alive(&self) -> bool {
        is_alive_impl(self.pid)
    }

    /// Sends the polite signal, waits up to `grace`, escalates to the force
    /// signal if the process is still alive. Returns `already_dead=true`
    /// behavior via the `Ok(false)` branch callers should treat as a no-op
    /// success (§8 boundary: "killing an already-dead agent returns success
    /// with `already_dead=true`").
    pub async fn kill_polite_then_force(&self, grace: Duration) -> Result<bool> {
        if !self.is_alive() {
            return Ok(false);
        }
        send_polite(self.pid);
        let deadline = std::time::Instant::now() + grace;
        while std::time::Instant::now() < deadline {
            if !self.is_alive() {
                return Ok(true);
            }
            sleep(Duration::from_millis(100)).await;
        }
        if self.is_alive() {
            warn!(pid = self.pid, "process survived grace window, escalating to force kill");
            send_force(self.pid);
        }
        Ok(true)
    }
}

#[cfg(unix)]
fn is_alive_impl(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(unix)]
fn send_polite(pid: u32) {
    debug!(pid, "sending SIGTERM");
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(unix)]
fn send_force(pid: u32) {
    debug!(pid, "sending SIGKILL");
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn is_alive_impl(pid: u32) -> bool {
    use sysinfo::{Pid, System};
    let mut sys = System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    sys.process(Pid::from_u32(pid)).is_some()
}

#[cfg(not(unix))]
fn send_polite(pid: u32) {
    send_force(pid);
}

#[cfg(not(unix))]
fn send_force(pid: u32) {
    use sysinfo::{Pid, System};
    let mut sys = System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    if let Some(process) = sys.process(Pid::from_u32(pid)) {
        process.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn killing_an_already_dead_process_reports_already_dead() {
        // A pid vanishingly unlikely to be live in any test environment.
        let handle = ProcessHandle::new(u32::MAX - 1);
        let result = handle.kill_polite_then_force(Duration::from_millis(10)).await.unwrap();
        assert!(!result);
    }
}
