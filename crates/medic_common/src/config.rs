//! Configuration for medic.
//!
//! Loaded from `<user config dir>/medic/config.toml` or an explicit path.
//! Every field has a default, so a partial file (or no file) is fine.
//! Command-line flags override file values after loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::MedicError;
use crate::paths;
use crate::transport::{CmdTransport, TransportTimeouts};

/// Per-command timeouts for the command transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// `adb devices` / `fastboot devices`
    #[serde(default = "default_list_timeout")]
    pub list_timeout_secs: u64,

    #[serde(default = "default_adb_timeout")]
    pub adb_timeout_secs: u64,

    #[serde(default = "default_fastboot_timeout")]
    pub fastboot_timeout_secs: u64,
}

fn default_list_timeout() -> u64 {
    6
}

fn default_adb_timeout() -> u64 {
    20
}

fn default_fastboot_timeout() -> u64 {
    30 // flashing-era bootloaders are slow to answer
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            list_timeout_secs: default_list_timeout(),
            adb_timeout_secs: default_adb_timeout(),
            fastboot_timeout_secs: default_fastboot_timeout(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicConfig {
    /// adb binary
    #[serde(default = "default_adb_path")]
    pub adb_path: String,

    /// fastboot binary
    #[serde(default = "default_fastboot_path")]
    pub fastboot_path: String,

    /// Scoreboard file; `None` means the per-user default
    #[serde(default)]
    pub scoreboard_path: Option<PathBuf>,

    /// Weighted selection among candidate actions. When false the first
    /// candidate is always used.
    #[serde(default = "default_auto_pick")]
    pub auto_pick: bool,

    /// Overall deadline for one invocation
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Fixed RNG seed for reproducible selection
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_fastboot_path() -> String {
    "fastboot".to_string()
}

fn default_auto_pick() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

impl Default for MedicConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            fastboot_path: default_fastboot_path(),
            scoreboard_path: None,
            auto_pick: default_auto_pick(),
            timeout_secs: default_timeout(),
            seed: None,
            transport: TransportConfig::default(),
        }
    }
}

impl MedicConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults. A file that exists but cannot be read
    /// or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, MedicError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(paths::default_config_path);
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_path(&path)
    }

    /// Load config from a specific file
    pub fn load_from_path(path: &Path) -> Result<Self, MedicError> {
        let content = fs::read_to_string(path)
            .map_err(|e| MedicError::Config(format!("{}: {}", path.display(), e)))?;
        let config: MedicConfig = toml::from_str(&content)
            .map_err(|e| MedicError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write this config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), MedicError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| MedicError::Config(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| MedicError::Config(format!("{}: {}", parent.display(), e)))?;
        }
        fs::write(path, content)
            .map_err(|e| MedicError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Resolved scoreboard location
    pub fn scoreboard_path(&self) -> PathBuf {
        self.scoreboard_path
            .clone()
            .unwrap_or_else(paths::default_scoreboard_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn transport_timeouts(&self) -> TransportTimeouts {
        TransportTimeouts {
            list: Duration::from_secs(self.transport.list_timeout_secs),
            adb: Duration::from_secs(self.transport.adb_timeout_secs),
            fastboot: Duration::from_secs(self.transport.fastboot_timeout_secs),
        }
    }

    /// Command transport built from the configured binaries and timeouts
    pub fn build_transport(&self) -> CmdTransport {
        CmdTransport::new(self.adb_path.clone(), self.fastboot_path.clone())
            .with_timeouts(self.transport_timeouts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = MedicConfig::default();
        assert_eq!(config.adb_path, "adb");
        assert_eq!(config.fastboot_path, "fastboot");
        assert!(config.auto_pick);
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.transport_timeouts(), TransportTimeouts::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: MedicConfig = toml::from_str(
            r#"
            adb_path = "/opt/platform-tools/adb"
            seed = 7

            [transport]
            fastboot_timeout_secs = 45
            "#,
        )
        .unwrap();
        assert_eq!(config.adb_path, "/opt/platform-tools/adb");
        assert_eq!(config.fastboot_path, "fastboot");
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.transport.fastboot_timeout_secs, 45);
        assert_eq!(config.transport.adb_timeout_secs, 20);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = MedicConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, MedicConfig::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "auto_pick = \"sometimes\"").unwrap();
        let err = MedicConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, MedicError::Config(_)));
        assert_eq!(err.exit_code(), crate::error::EXIT_USAGE);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub/config.toml");
        let config = MedicConfig {
            scoreboard_path: Some(PathBuf::from("/var/tmp/sb.json")),
            auto_pick: false,
            ..MedicConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(MedicConfig::load(Some(&path)).unwrap(), config);
        assert_eq!(config.scoreboard_path(), PathBuf::from("/var/tmp/sb.json"));
    }

    #[test]
    fn test_build_transport_uses_paths() {
        let config = MedicConfig {
            adb_path: "/x/adb".to_string(),
            ..MedicConfig::default()
        };
        let t = config.build_transport();
        assert_eq!(t.adb_path(), "/x/adb");
        assert_eq!(t.timeouts().fastboot, Duration::from_secs(30));
    }
}
