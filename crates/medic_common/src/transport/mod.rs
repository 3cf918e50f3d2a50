//! Transport abstraction over the adb and fastboot command-line tools.
//!
//! The engine and the action catalog only ever talk to a device through this
//! trait, which makes the whole diagnosis/remediation loop testable without
//! hardware:
//! - `CmdTransport` spawns the real binaries
//! - `FakeTransport` answers from a script and records every call
//!
//! Every call takes a `CallContext`; implementations must stop when it is
//! cancelled or its deadline passes, and return captured output inside the
//! error when a command fails or times out.

mod cmd;
mod fake;

pub use cmd::{CmdTransport, TransportTimeouts};
pub use fake::{FakeResponse, FakeTransport, RecordedCall};

use std::fmt;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::TransportError;

// ============================================================================
// Transport Trait
// ============================================================================

/// Device command execution, one method per command-line protocol
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serials visible to either tool, sorted and deduplicated.
    /// Returns `TransportError::NoDevices` when nothing is attached.
    async fn list_devices(&self, ctx: &CallContext) -> Result<Vec<String>, TransportError>;

    /// Run an adb command against `serial` and return its combined output
    async fn adb(
        &self,
        ctx: &CallContext,
        serial: &str,
        args: &[&str],
    ) -> Result<String, TransportError>;

    /// Run a fastboot command against `serial` and return its combined output
    async fn fastboot(
        &self,
        ctx: &CallContext,
        serial: &str,
        args: &[&str],
    ) -> Result<String, TransportError>;
}

/// Which command-line tool a call goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Adb,
    Fastboot,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Adb => write!(f, "adb"),
            Tool::Fastboot => write!(f, "fastboot"),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Prefix `-s <serial>` when a serial is given
pub(crate) fn with_serial(serial: &str, args: &[&str]) -> Vec<String> {
    let mut full = Vec::with_capacity(args.len() + 2);
    if !serial.is_empty() {
        full.push("-s".to_string());
        full.push(serial.to_string());
    }
    full.extend(args.iter().map(|a| a.to_string()));
    full
}

/// Render a command line for logs and error messages
pub(crate) fn render_command(bin: &str, args: &[String]) -> String {
    if args.is_empty() {
        bin.to_string()
    } else {
        format!("{} {}", bin, args.join(" "))
    }
}

/// Parse `adb devices` / `fastboot devices` output into serials.
///
/// The first token of each line is the serial for both tools. Header lines and
/// stray `device` tokens are skipped.
pub fn parse_device_list(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices"))
        .filter_map(|line| line.split_whitespace().next())
        .filter(|serial| !serial.eq_ignore_ascii_case("device"))
        .map(str::to_string)
        .collect()
}
