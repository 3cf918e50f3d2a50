//! Medic Common - device diagnosis and adaptive remediation
//!
//! Captures the state of one Android device over adb/fastboot, runs a fixed
//! rule set over it, and picks a remedy weighted by what worked before.
//! Learned weights live in a small JSON scoreboard that survives restarts.

pub mod actions;
pub mod capture;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod paths;
pub mod rules;
pub mod scoreboard;
pub mod state;
pub mod transport;

pub use actions::Action;
pub use config::MedicConfig;
pub use context::CallContext;
pub use engine::{AutoFixOutcome, Engine, SetModeOutcome};
pub use error::{MedicError, ScoreboardError, TransportError};
pub use rules::{Diagnosis, Rule, Severity};
pub use scoreboard::Scoreboard;
pub use state::{DeviceState, Mode};
pub use transport::{CmdTransport, Transport};
