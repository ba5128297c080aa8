//! # Gobby
//!
//! A persistent local daemon that turns single-shot LLM coding CLIs
//! (Claude Code, Gemini, Codex, and hookless SDK-embedded agents) into a
//! coordinated multi-agent system: a shared task graph, a declarative
//! workflow engine evaluated on every CLI hook, an agent registry that
//! spawns and tracks child sessions across several execution modes, a
//! party scheduler for role-DAG orchestration, and a messaging bus tying
//! it all together.
//!
//! ## Modules
//!
//! - [`model`]: the persisted entity types (§3) — sessions, tasks,
//!   workflow definitions/instances, agent runs, worktrees, messages,
//!   parties, stop signals.
//! - [`persistence`]: the pooled sqlite store and its migrations.
//! - [`task_graph`]: task CRUD, readiness, dependency-cycle rejection,
//!   the review-gate status machine, and `wait_for_task*`.
//! - [`workflow`]: the per-event evaluation algorithm, the `when`
//!   mini-language, action execution, and step transitions.
//! - [`registry`]: the agent spawner/killer across in-process, headless,
//!   terminal, and embedded execution modes, plus PID discovery.
//! - [`party`]: role-DAG validation and topological spawn/crash handling.
//! - [`messaging`]: point-to-point and party-broadcast delivery.
//! - [`hooks`]: normalizes heterogeneous CLI hook payloads into the
//!   canonical event shape, synthesizing session boundaries where needed.
//! - [`pipeline`]: deterministic step sequences with approval-gate parking.
//! - [`providers`]: the narrow per-provider capability interface.
//! - [`tools`]: the namespaced in-process tool dispatch table exposed to
//!   agents.
//! - [`config`] / [`env`]: layered configuration discovery and path
//!   conventions.
//! - [`error`]: the component-boundary error type.
//! - [`ids`]: short prefixed entity identifiers.

pub mod config;
pub mod env;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod messaging;
pub mod model;
pub mod party;
pub mod persistence;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod task_graph;
pub mod tools;
pub mod workflow;
