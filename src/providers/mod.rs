//! Provider capability interface (§9 design note): a narrow trait hiding the
//! difference between hook-native CLIs (Claude Code) and hookless
//! SDK-embedded providers (Gemini, Codex, a generic fallback), mirroring the
//! teacher's `LLMProvider` trait and factory (`src/llm/provider.rs`). Which
//! third-party API each provider actually calls is out of scope here; this
//! registry only answers "does this provider need synthesized session
//! boundaries" for the hook ingress and spawner.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("turn timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub prompt: String,
    pub tools: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub output: String,
    pub tool_calls: Vec<serde_json::Value>,
}

/// Capability surface every provider must answer; `run_turn` is the only
/// method that actually drives a turn, the rest are static facts the engine
/// reads once at registration.
pub trait AgentProvider: Send + Sync {
    fn run_turn(&self, request: TurnRequest) -> BoxFuture<'_, Result<TurnResult, ProviderError>>;
    fn supports_hooks(&self) -> bool;
    fn session_start_available(&self) -> bool;
    fn provider_name(&self) -> &'static str;
}

/// Claude Code: native hooks, native `session_start`/`session_end`.
pub struct ClaudeCliProvider;

impl AgentProvider for ClaudeCliProvider {
    fn run_turn(&self, _request: TurnRequest) -> BoxFuture<'_, Result<TurnResult, ProviderError>> {
        Box::pin(async { Err(ProviderError::Unavailable("turn execution delegated to the agent registry's spawn path".into())) })
    }
    fn supports_hooks(&self) -> bool {
        true
    }
    fn session_start_available(&self) -> bool {
        true
    }
    fn provider_name(&self) -> &'static str {
        "claude"
    }
}

/// SDK-embedded providers (Gemini, Codex via their agentic SDKs): no native
/// hooks, no native session boundaries — the hook ingress synthesizes them.
pub struct SdkEmbeddedProvider {
    name: &'static str,
}

impl SdkEmbeddedProvider {
    pub fn gemini() -> Self {
        Self { name: "gemini" }
    }

    pub fn codex() -> Self {
        Self { name: "codex" }
    }

    pub fn generic(name: &'static str) -> Self {
        Self { name }
    }
}

impl AgentProvider for SdkEmbeddedProvider {
    fn run_turn(&self, _request: TurnRequest) -> BoxFuture<'_, Result<TurnResult, ProviderError>> {
        Box::pin(async { Err(ProviderError::Unavailable("turn execution delegated to the agent registry's spawn path".into())) })
    }
    fn supports_hooks(&self) -> bool {
        false
    }
    fn session_start_available(&self) -> bool {
        false
    }
    fn provider_name(&self) -> &'static str {
        self.name
    }
}

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AgentProvider>>,
}

impl ProviderRegistry {
    pub fn with_defaults() -> Self {
        let mut providers: HashMap<String, Arc<dyn AgentProvider>> = HashMap::new();
        providers.insert("claude".into(), Arc::new(ClaudeCliProvider));
        providers.insert("gemini".into(), Arc::new(SdkEmbeddedProvider::gemini()));
        providers.insert("codex".into(), Arc::new(SdkEmbeddedProvider::codex()));
        Self { providers }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn AgentProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentProvider>> {
        self.providers.get(name).cloned()
    }

    /// Falls back to a generic hookless provider for any unregistered name,
    /// so the hook ingress always has a capability answer.
    pub fn get_or_generic(&self, name: &str) -> Arc<dyn AgentProvider> {
        self.get(name)
            .unwrap_or_else(|| Arc::new(SdkEmbeddedProvider::generic("generic")))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_reports_native_hooks_and_session_start() {
        let registry = ProviderRegistry::with_defaults();
        let claude = registry.get("claude").unwrap();
        assert!(claude.supports_hooks());
        assert!(claude.session_start_available());
    }

    #[test]
    fn gemini_and_codex_require_synthesized_boundaries() {
        let registry = ProviderRegistry::with_defaults();
        assert!(!registry.get("gemini").unwrap().session_start_available());
        assert!(!registry.get("codex").unwrap().supports_hooks());
    }

    #[test]
    fn unregistered_provider_falls_back_to_generic() {
        let registry = ProviderRegistry::with_defaults();
        let p = registry.get_or_generic("some-future-cli");
        assert_eq!(p.provider_name(), "generic");
        assert!(!p.supports_hooks());
    }
}
