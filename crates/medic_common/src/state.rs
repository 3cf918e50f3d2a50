//! Device state snapshot.
//!
//! One `DeviceState` is built per diagnosis cycle by `capture` and only read
//! afterwards. Rules and actions take it by shared reference.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::MedicError;

/// Control-plane session the device is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// No adb or fastboot session could be established
    Unknown,
    /// Normal adb session
    Adb,
    /// Bootloader (fastboot) session
    Fastboot,
    /// Recovery session
    Recovery,
    /// Booted with the safe-mode flag set
    SafeMode,
}

impl Mode {
    /// Canonical lowercase name, also used inside action names
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Unknown => "unknown",
            Mode::Adb => "adb",
            Mode::Fastboot => "fastboot",
            Mode::Recovery => "recovery",
            Mode::SafeMode => "safemode",
        }
    }

    /// How specific a determination this is. Capture never replaces a mode
    /// with a less specific one.
    pub fn specificity(&self) -> u8 {
        match self {
            Mode::Unknown => 0,
            Mode::Adb | Mode::Fastboot => 1,
            Mode::Recovery | Mode::SafeMode => 2,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = MedicError;

    /// Parse a user-supplied target mode. `unknown` is not a valid target.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "adb" => Ok(Mode::Adb),
            "fastboot" => Ok(Mode::Fastboot),
            "recovery" => Ok(Mode::Recovery),
            "safemode" | "safe" | "safe-mode" => Ok(Mode::SafeMode),
            _ => Err(MedicError::UnknownMode(s.to_string())),
        }
    }
}

/// Everything observed about one device during one capture pass
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Device serial as reported by adb/fastboot
    pub serial: String,
    /// Best mode determination of the capture pass
    pub mode: Mode,
    /// Battery percentage 0..=100, `None` when unavailable
    pub battery: Option<u8>,
    /// Raw device-reported facts (e.g. `ro.bootmode`)
    pub properties: HashMap<String, String>,
    /// Probe failures collected during capture, in order
    pub errors: Vec<String>,
    /// Capture instant
    pub timestamp: DateTime<Utc>,
}

impl DeviceState {
    /// Fresh state: unknown mode, unknown battery, nothing observed yet
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            mode: Mode::Unknown,
            battery: None,
            properties: HashMap::new(),
            errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the battery level. Values above 100 are treated as unavailable.
    pub fn with_battery(mut self, level: u8) -> Self {
        self.battery = (level <= 100).then_some(level);
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}
