//! Daemon home directory layout.
//!
//! Centralizes the hidden-directory and file naming scheme so the rest of
//! the crate never hardcodes a path fragment.

use std::path::PathBuf;

/// Main daemon home directory name (hidden directory like .git).
pub const GOBBY_DIR_NAME: &str = ".gobby";

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Sqlite database file name within the daemon home.
pub const DB_FILE_NAME: &str = "gobby.db";

/// Worktrees directory name within a project's daemon home.
pub const WORKTREES_DIR_NAME: &str = "worktrees";

/// Logs directory name.
pub const LOGS_DIR_NAME: &str = "logs";

pub fn gobby_dir_path(workspace_root: &std::path::Path) -> PathBuf {
    workspace_root.join(GOBBY_DIR_NAME)
}

pub fn db_file_path(workspace_root: &std::path::Path) -> PathBuf {
    gobby_dir_path(workspace_root).join(DB_FILE_NAME)
}

pub fn worktrees_dir_path(workspace_root: &std::path::Path) -> PathBuf {
    gobby_dir_path(workspace_root).join(WORKTREES_DIR_NAME)
}

pub fn logs_dir_path(workspace_root: &std::path::Path) -> PathBuf {
    gobby_dir_path(workspace_root).join(LOGS_DIR_NAME)
}

pub fn user_config_dir_path(home_dir: &std::path::Path) -> PathBuf {
    home_dir.join(GOBBY_DIR_NAME)
}

pub fn user_config_file_path(home_dir: &std::path::Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

pub fn local_config_file_path(current_dir: &std::path::Path) -> PathBuf {
    current_dir.join(GOBBY_DIR_NAME).join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_path_construction() {
        let workspace = Path::new("/test/workspace");

        assert_eq!(gobby_dir_path(workspace), Path::new("/test/workspace/.gobby"));
        assert_eq!(
            db_file_path(workspace),
            Path::new("/test/workspace/.gobby/gobby.db")
        );
        assert_eq!(
            worktrees_dir_path(workspace),
            Path::new("/test/workspace/.gobby/worktrees")
        );
    }

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.gobby/config.toml")
        );
        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.gobby/config.toml")
        );
    }
}
