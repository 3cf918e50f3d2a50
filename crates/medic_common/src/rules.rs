//! Diagnosis rules.
//!
//! A rule looks at one `DeviceState` and either reports a finding or stays
//! quiet. Rules never fail and never depend on each other; presentation order
//! is the engine's job.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::actions::Action;
use crate::state::{DeviceState, Mode};

/// Battery percentage below which a warning is raised
pub const LOW_BATTERY_THRESHOLD: u8 = 10;

/// How bad a finding is; `Error` ranks highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A rule's finding. Candidate actions may be empty: observed, not actionable.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    /// Name of the rule that produced it
    pub name: String,
    pub severity: Severity,
    pub message: String,
    /// Candidate remediations, in the rule's preferred order
    pub actions: Vec<Action>,
    pub when: DateTime<Utc>,
}

impl Diagnosis {
    pub fn new(name: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            severity,
            message: message.into(),
            actions: Vec::new(),
            when: Utc::now(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    /// Synthetic finding used when no rule fires
    pub fn ok() -> Self {
        Self::new("ok", Severity::Info, "No issues detected")
    }

    pub fn is_actionable(&self) -> bool {
        !self.actions.is_empty()
    }
}

/// A single diagnosis rule
pub trait Rule: Send + Sync {
    /// Stable identifier, reused as the diagnosis name
    fn name(&self) -> &'static str;

    /// Inspect `state`; `None` when the rule's condition does not hold
    fn evaluate(&self, state: &DeviceState) -> Option<Diagnosis>;
}

/// The built-in rule set, in registration order
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(FastbootNudgeRule),
        Box::new(LowBatteryRule),
        Box::new(UnknownModeRule),
    ]
}

/// No adb or fastboot session at all
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownModeRule;

impl Rule for UnknownModeRule {
    fn name(&self) -> &'static str {
        "unknown_mode"
    }

    fn evaluate(&self, state: &DeviceState) -> Option<Diagnosis> {
        (state.mode == Mode::Unknown).then(|| {
            Diagnosis::new(
                self.name(),
                Severity::Error,
                "Device mode is unknown: neither adb nor fastboot answered. \
                 Check the cable, USB drivers and that the device is powered on.",
            )
        })
    }
}

/// Device is sitting in the bootloader; offer a way out
#[derive(Debug, Clone, Copy, Default)]
pub struct FastbootNudgeRule;

impl Rule for FastbootNudgeRule {
    fn name(&self) -> &'static str {
        "fastboot_detected"
    }

    fn evaluate(&self, state: &DeviceState) -> Option<Diagnosis> {
        (state.mode == Mode::Fastboot).then(|| {
            Diagnosis::new(
                self.name(),
                Severity::Warn,
                "Device is in fastboot mode. It can be rebooted to the system or into recovery.",
            )
            .with_actions(vec![
                Action::set_mode(Mode::Adb),
                Action::set_mode(Mode::Recovery),
            ])
        })
    }
}

/// Known battery level under the threshold
#[derive(Debug, Clone, Copy, Default)]
pub struct LowBatteryRule;

impl Rule for LowBatteryRule {
    fn name(&self) -> &'static str {
        "low_battery"
    }

    fn evaluate(&self, state: &DeviceState) -> Option<Diagnosis> {
        let level = state.battery.filter(|l| *l < LOW_BATTERY_THRESHOLD)?;
        Some(Diagnosis::new(
            self.name(),
            Severity::Warn,
            format!(
                "Battery is low ({}%). Charge the device before long operations.",
                level
            ),
        ))
    }
}
