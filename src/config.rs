//! Daemon configuration: layered discovery plus the CLI argument surface.
//!
//! Precedence, highest first: explicit `--config` path, project-local
//! `.gobby/config.toml`, user-home `~/.gobby/config.toml`, compiled-in
//! defaults.

use crate::env;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GobbyConfig {
    pub workspace_root: PathBuf,
    pub max_agent_depth_default: u32,
    pub hook_eval_timeout_secs: u64,
    pub validation_fail_limit: u32,
    pub kill_grace_secs: u64,
    pub log_filter: String,
}

impl Default for GobbyConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_agent_depth_default: 1,
            hook_eval_timeout_secs: 30,
            validation_fail_limit: 3,
            kill_grace_secs: 5,
            log_filter: "gobby=info".to_string(),
        }
    }
}

impl GobbyConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("failed to read config file")?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse TOML configuration")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration to TOML")
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?).context("failed to write config file")
    }
}

/// Discovers the effective configuration following the precedence order
/// documented on the module.
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    pub fn discover(explicit: Option<&Path>) -> Result<GobbyConfig> {
        if let Some(path) = explicit {
            return GobbyConfig::from_toml_file(path);
        }

        let cwd = std::env::current_dir().context("failed to read current directory")?;
        let local = env::local_config_file_path(&cwd);
        if local.exists() {
            return GobbyConfig::from_toml_file(&local);
        }

        if let Some(home) = dirs_home() {
            let user = env::user_config_file_path(&home);
            if user.exists() {
                return GobbyConfig::from_toml_file(&user);
            }
        }

        Ok(GobbyConfig::default())
    }

    pub fn show_discovery_info() {
        println!("Gobby configuration discovery order:");
        println!("  1. --config <path> (explicit override)");
        println!("  2. ./.gobby/config.toml (project-local)");
        println!("  3. ~/.gobby/config.toml (user default)");
        println!("  4. compiled-in defaults");
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[derive(Debug, Parser)]
#[command(name = "gobbyd", about = "Persistent multi-agent orchestration daemon")]
pub struct Args {
    /// Path to an explicit config.toml, overriding discovery.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Workspace root the daemon manages (defaults to the config value).
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground.
    Serve,
    /// Print the resolved configuration and exit.
    ShowConfig,
    /// List ready tasks for the configured workspace.
    ListReady,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = GobbyConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = GobbyConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(config.max_agent_depth_default, parsed.max_agent_depth_default);
        assert_eq!(config.hook_eval_timeout_secs, parsed.hook_eval_timeout_secs);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = GobbyConfig::default();
        config.to_toml_file(&path).unwrap();
        let loaded = GobbyConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.validation_fail_limit, loaded.validation_fail_limit);
    }
}
