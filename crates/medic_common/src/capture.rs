//! Device state capture.
//!
//! Probes the device through the transport and folds the answers into one
//! `DeviceState`. Capture never fails: probe errors are kept in
//! `DeviceState::errors` and the mode stays at the best determination made.
//!
//! Probe order:
//! 1. `adb get-state` (then `getprop ro.bootmode` and `dumpsys battery`)
//! 2. `fastboot getvar product`, only when adb did not answer

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::context::CallContext;
use crate::error::TransportError;
use crate::state::{DeviceState, Mode};
use crate::transport::Transport;

/// Property key for the adb boot mode
pub const PROP_BOOTMODE: &str = "ro.bootmode";

/// Property key for the fastboot product name
pub const PROP_FASTBOOT_PRODUCT: &str = "fastboot_product";

static BATTERY_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*level\s*:\s*(\d+)\s*$").expect("battery level regex is valid")
});

/// Parse `dumpsys battery` output. `None` when no level line is present or
/// the value is outside 0..=100.
pub fn parse_battery(out: &str) -> Option<u8> {
    let caps = BATTERY_LEVEL.captures(out)?;
    let level: u32 = caps.get(1)?.as_str().parse().ok()?;
    u8::try_from(level).ok().filter(|l| *l <= 100)
}

/// State under construction during one capture pass
struct Capture {
    state: DeviceState,
}

impl Capture {
    fn new(serial: &str) -> Self {
        Self {
            state: DeviceState::new(serial),
        }
    }

    /// Take `mode` unless a more specific mode is already confirmed
    fn observe_mode(&mut self, mode: Mode) {
        if mode.specificity() >= self.state.mode.specificity() {
            self.state.mode = mode;
        }
    }

    fn record_error(&mut self, err: &TransportError) {
        debug!(serial = %self.state.serial, "probe failed: {}", err);
        self.state.errors.push(err.to_string());
    }

    fn finish(self) -> DeviceState {
        debug!(
            serial = %self.state.serial,
            mode = %self.state.mode,
            battery = ?self.state.battery,
            errors = self.state.errors.len(),
            "state captured"
        );
        self.state
    }
}

/// Capture the current state of `serial`
pub async fn collect_state(
    ctx: &CallContext,
    transport: &dyn Transport,
    serial: &str,
) -> DeviceState {
    let mut capture = Capture::new(serial);

    match transport.adb(ctx, serial, &["get-state"]).await {
        Ok(out) => {
            capture.observe_mode(Mode::Adb);
            if out.to_lowercase().contains("recovery") {
                capture.observe_mode(Mode::Recovery);
            }
            probe_adb_details(ctx, transport, serial, &mut capture).await;
            return capture.finish();
        }
        Err(e) => capture.record_error(&e),
    }

    match transport.fastboot(ctx, serial, &["getvar", "product"]).await {
        Ok(out) => {
            capture.observe_mode(Mode::Fastboot);
            let product = out.trim();
            if !product.is_empty() {
                capture
                    .state
                    .properties
                    .insert(PROP_FASTBOOT_PRODUCT.to_string(), product.to_string());
            }
        }
        Err(e) => capture.record_error(&e),
    }

    capture.finish()
}

/// Boot mode and battery, once an adb session is confirmed. Failures here are
/// not recorded: the session itself is already established.
async fn probe_adb_details(
    ctx: &CallContext,
    transport: &dyn Transport,
    serial: &str,
    capture: &mut Capture,
) {
    if let Ok(prop) = transport
        .adb(ctx, serial, &["shell", "getprop", PROP_BOOTMODE])
        .await
    {
        let bootmode = prop.trim().to_lowercase();
        if bootmode.contains("recovery") {
            capture.observe_mode(Mode::Recovery);
        }
        if bootmode.contains("safe") {
            capture.observe_mode(Mode::SafeMode);
        }
        capture
            .state
            .properties
            .insert(PROP_BOOTMODE.to_string(), bootmode);
    }

    if let Ok(out) = transport.adb(ctx, serial, &["shell", "dumpsys", "battery"]).await {
        capture.state.battery = parse_battery(&out);
    }
}
