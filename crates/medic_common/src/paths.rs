//! Path helpers for medic
//!
//! Priority for the per-user directory:
//! 1. `$MEDIC_CONFIG_DIR` (explicit override)
//! 2. `<user config dir>/medic` (XDG on Linux)
//! 3. none: callers fall back to the working directory

use std::path::PathBuf;

/// Environment variable overriding the per-user directory
pub const CONFIG_DIR_ENV: &str = "MEDIC_CONFIG_DIR";

pub const CONFIG_FILE: &str = "config.toml";
pub const SCOREBOARD_FILE: &str = "scoreboard.json";

/// Per-user directory holding config and scoreboard
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join("medic"))
}

pub fn default_config_path() -> PathBuf {
    config_dir()
        .map(|d| d.join(CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

pub fn default_scoreboard_path() -> PathBuf {
    config_dir()
        .map(|d| d.join(SCOREBOARD_FILE))
        .unwrap_or_else(|| PathBuf::from(SCOREBOARD_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so the env var is never mutated concurrently
    #[test]
    fn test_paths_follow_override() {
        std::env::set_var(CONFIG_DIR_ENV, "/tmp/medic-test");
        assert_eq!(config_dir(), Some(PathBuf::from("/tmp/medic-test")));
        assert_eq!(
            default_scoreboard_path(),
            PathBuf::from("/tmp/medic-test/scoreboard.json")
        );
        assert_eq!(
            default_config_path(),
            PathBuf::from("/tmp/medic-test/config.toml")
        );
        std::env::remove_var(CONFIG_DIR_ENV);

        let path = default_scoreboard_path();
        assert!(path.ends_with(SCOREBOARD_FILE));
    }
}
