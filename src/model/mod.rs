//! Entity types for the data model (§3). These are plain structs; the
//! managers in `task_graph`, `workflow`, `registry`, `party`, and
//! `messaging` own the invariants that govern how rows of these types are
//! created and transitioned.

pub mod agent_run;
pub mod message;
pub mod party;
pub mod pipeline;
pub mod session;
pub mod stop_signal;
pub mod task;
pub mod workflow;
pub mod worktree;

pub use agent_run::{AgentMode, AgentRun, AgentRunStatus};
pub use message::{InterSessionMessage, MessagePriority, MessageType};
pub use party::{NotifyTarget, OnCrash, Party, PartyMember, PartyMemberStatus, PartyStatus};
pub use pipeline::{PipelineDefinition, PipelineRun, PipelineRunStatus, PipelineStep, PipelineStepSpec};
pub use session::{Session, SessionSource, SessionStatus};
pub use stop_signal::StopSignal;
pub use task::{Task, TaskCategory, TaskStatus};
pub use workflow::{WorkflowDefinition, WorkflowInstance};
pub use worktree::{IsolationMode, Worktree, WorktreeStatus};
