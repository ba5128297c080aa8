//! Four spawn modes dispatched via an enum, not a trait object — the same
//! shape as the teacher's `CommandExecutor` (host vs. container): a closed,
//! small set of variants known at compile time reads better as a match than
//! as dynamic dispatch over a handful of implementations.

use crate::error::{GobbyError, Result};
use crate::model::AgentMode;
use crate::registry::process::ProcessHandle;
use tokio::task::JoinHandle;

/// A live handle to a spawned agent, however it was spawned.
pub enum RunHandle {
    InProcess { task: JoinHandle<Result<serde_json::Value>> },
    Headless { process: ProcessHandle },
    Terminal { session_marker: String, process: Option<ProcessHandle> },
    Embedded { process: ProcessHandle, master_fd: i32 },
}

impl RunHandle {
    pub fn mode(&self) -> AgentMode {
        match self {
            Self::InProcess { .. } => AgentMode::InProcess,
            Self::Headless { .. } => AgentMode::Headless,
            Self::Terminal { .. } => AgentMode::Terminal,
            Self::Embedded { .. } => AgentMode::Embedded,
        }
    }

    /// Graceful-then-forceful termination (§4.3 "Termination").
    pub async fn kill(&mut self, grace: std::time::Duration) -> Result<bool> {
        match self {
            Self::InProcess { task } => {
                task.abort();
                Ok(true)
            }
            Self::Headless { process } => process.kill_polite_then_force(grace).await,
            Self::Terminal { session_marker, process } => match process {
                Some(p) => p.kill_polite_then_force(grace).await,
                None => Err(GobbyError::NotFound(format!(
                    "no discovered process for terminal session marker {session_marker}"
                ))),
            },
            Self::Embedded { process, master_fd } => {
                close_fd(*master_fd);
                process.kill_polite_then_force(grace).await
            }
        }
    }
}

#[cfg(unix)]
fn close_fd(fd: i32) {
    if fd >= 0 {
        unsafe {
            libc::close(fd);
        }
    }
}

#[cfg(not(unix))]
fn close_fd(_fd: i32) {}
