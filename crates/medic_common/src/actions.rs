//! Remediation actions.
//!
//! Actions are small value types with no state of their own. Their learned
//! weight lives in the scoreboard under `name()`, so two separately built
//! actions with the same parameters share one history.

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::{MedicError, TransportError};
use crate::state::{DeviceState, Mode};
use crate::transport::Transport;

/// Persistent property that makes the next boot come up in safe mode
pub const SAFEMODE_PROPERTY: &str = "persist.sys.safemode";

/// Closed set of remediation actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SetMode(SetMode),
}

impl Action {
    /// Transition to `target`
    pub fn set_mode(target: Mode) -> Self {
        Action::SetMode(SetMode { target })
    }

    /// Scoreboard key; a pure function of the parameters
    pub fn name(&self) -> String {
        match self {
            Action::SetMode(a) => a.name(),
        }
    }

    /// Rough time estimate, used only to weight selection
    pub fn cost(&self) -> Duration {
        match self {
            Action::SetMode(a) => a.cost(),
        }
    }

    pub fn can_apply(&self, state: &DeviceState) -> bool {
        match self {
            Action::SetMode(a) => a.can_apply(state),
        }
    }

    /// Reject parameters no device state could ever satisfy
    pub fn check_target(&self) -> Result<(), MedicError> {
        match self {
            Action::SetMode(a) => a.check_target(),
        }
    }

    /// Run the action against the device. Does not touch any `DeviceState`;
    /// capture again to observe the result.
    pub async fn apply(
        &self,
        ctx: &CallContext,
        transport: &dyn Transport,
        serial: &str,
    ) -> Result<(), MedicError> {
        match self {
            Action::SetMode(a) => a.apply(ctx, transport, serial).await,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Move the device into another control-plane session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetMode {
    pub target: Mode,
}

impl SetMode {
    pub fn name(&self) -> String {
        format!("set_mode_{}", self.target)
    }

    pub fn cost(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Safe mode needs a live adb session (normal or recovery); everything
    /// else only needs some session.
    pub fn can_apply(&self, state: &DeviceState) -> bool {
        match self.target {
            Mode::SafeMode => matches!(state.mode, Mode::Adb | Mode::Recovery),
            _ => state.mode != Mode::Unknown,
        }
    }

    /// `unknown` is not a mode a device can be sent to
    pub fn check_target(&self) -> Result<(), MedicError> {
        match self.target {
            Mode::Unknown => Err(MedicError::UnknownTarget { action: self.name() }),
            _ => Ok(()),
        }
    }

    pub async fn apply(
        &self,
        ctx: &CallContext,
        transport: &dyn Transport,
        serial: &str,
    ) -> Result<(), MedicError> {
        debug!(action = %self.name(), serial, "applying transition");
        match self.target {
            Mode::Adb => {
                let primary = transport.fastboot(ctx, serial, &["reboot"]).await;
                self.or_fallback(ctx, primary, || transport.adb(ctx, serial, &["reboot"]))
                    .await
            }
            Mode::Fastboot => {
                transport.adb(ctx, serial, &["reboot", "bootloader"]).await?;
                Ok(())
            }
            Mode::Recovery => {
                let primary = transport.adb(ctx, serial, &["reboot", "recovery"]).await;
                self.or_fallback(ctx, primary, || {
                    transport.fastboot(ctx, serial, &["reboot", "recovery"])
                })
                .await
            }
            Mode::SafeMode => {
                transport
                    .adb(ctx, serial, &["shell", "setprop", SAFEMODE_PROPERTY, "1"])
                    .await?;
                transport.adb(ctx, serial, &["reboot"]).await?;
                Ok(())
            }
            Mode::Unknown => self.check_target(),
        }
    }

    /// Keep the primary result, or run the fallback when the primary failed
    /// and the caller has neither cancelled nor run out of time.
    async fn or_fallback<F, Fut>(
        &self,
        ctx: &CallContext,
        primary: Result<String, TransportError>,
        fallback: F,
    ) -> Result<(), MedicError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<String, TransportError>>,
    {
        match primary {
            Ok(_) => Ok(()),
            Err(e) if e.is_cancelled() || ctx.is_done() => Err(e.into()),
            Err(e) => {
                warn!(action = %self.name(), "primary strategy failed, trying fallback: {}", e);
                fallback().await?;
                Ok(())
            }
        }
    }
}
