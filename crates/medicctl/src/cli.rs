//! Command-line surface

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use medic_common::MedicConfig;

#[derive(Parser, Debug)]
#[command(name = "medicctl")]
#[command(about = "Diagnose a connected Android device and apply a fix", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Device serial (default: first detected device)
    #[arg(long, global = true)]
    pub serial: Option<String>,

    /// Path to the adb binary
    #[arg(long, global = true, value_name = "PATH")]
    pub adb: Option<String>,

    /// Path to the fastboot binary
    #[arg(long, global = true, value_name = "PATH")]
    pub fastboot: Option<String>,

    /// Always take the first candidate action instead of a weighted pick
    #[arg(long, global = true)]
    pub no_auto: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Overall deadline in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Scoreboard file
    #[arg(long, global = true, value_name = "PATH")]
    pub scoredb: Option<PathBuf>,

    /// Config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Diagnose and apply the best remedy (default)
    Fix,

    /// Show every finding without acting
    Diagnose,

    /// Move the device to another mode (adb, fastboot, recovery, safemode)
    SetMode {
        /// Target mode
        mode: String,
    },

    /// Show learned action scores
    Top {
        /// Number of rows; 0 shows all
        #[arg(default_value_t = 10)]
        n: usize,
    },

    /// List detected devices
    Devices,
}

impl Cli {
    /// Subcommand to run; `fix` when none was given
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Fix)
    }

    /// Apply flag values on top of the file configuration
    pub fn apply_overrides(&self, config: &mut MedicConfig) {
        if let Some(adb) = &self.adb {
            config.adb_path = adb.clone();
        }
        if let Some(fastboot) = &self.fastboot {
            config.fastboot_path = fastboot.clone();
        }
        if self.no_auto {
            config.auto_pick = false;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(path) = &self.scoredb {
            config.scoreboard_path = Some(path.clone());
        }
    }
}
