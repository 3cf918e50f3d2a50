//! Command execution for medicctl
//!
//! Everything printed to stdout is built by the `render_*` functions so the
//! wording can be tested without a device.

use std::path::Path;
use std::sync::Arc;

use medic_common::error::{EXIT_FAILURE, EXIT_SUCCESS};
use medic_common::scoreboard::ScoreEntry;
use medic_common::{
    AutoFixOutcome, CallContext, DeviceState, Diagnosis, Engine, MedicConfig, MedicError, Mode,
    Scoreboard, SetModeOutcome, Transport,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cli::{Cli, Commands};

/// Run the parsed command line and return the process exit code
pub async fn run(cli: &Cli, cancel: CancellationToken) -> i32 {
    match execute(cli, cancel).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            e.exit_code()
        }
    }
}

async fn execute(cli: &Cli, cancel: CancellationToken) -> Result<i32, MedicError> {
    let command = cli.command();

    // Reject a bad target before any config or device access
    let target = match &command {
        Commands::SetMode { mode } => Some(mode.parse::<Mode>()?),
        _ => None,
    };

    let mut config = MedicConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    if let Commands::Top { n } = command {
        let scoreboard = Scoreboard::new();
        load_scoreboard(&scoreboard, &config.scoreboard_path());
        for line in render_top(&scoreboard.top(n)) {
            println!("{}", line);
        }
        return Ok(EXIT_SUCCESS);
    }

    let transport: Arc<dyn Transport> = Arc::new(config.build_transport());
    let session = Session::open(&config, transport, cancel);
    let result = session.dispatch(&command, cli.serial.as_deref(), target).await;
    session.close();
    result
}

/// Best-effort load; a missing file is the normal first run
pub fn load_scoreboard(scoreboard: &Scoreboard, path: &Path) {
    match scoreboard.load(path) {
        Ok(count) => debug!("Loaded {} scores from {}", count, path.display()),
        Err(e) if e.is_missing() => debug!("No scoreboard at {} yet", path.display()),
        Err(e) => warn!("Ignoring unreadable scoreboard: {}", e),
    }
}

/// One invocation against one device
pub struct Session {
    engine: Engine,
    ctx: CallContext,
}

impl Session {
    /// Load the scoreboard and build the engine from `config`
    pub fn open(
        config: &MedicConfig,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Self {
        let scoreboard = Arc::new(Scoreboard::new());
        load_scoreboard(&scoreboard, &config.scoreboard_path());
        let engine = Engine::from_config(config, transport, scoreboard);
        let ctx = CallContext::with_timeout(config.timeout()).with_token(cancel);
        Self::new(engine, ctx)
    }

    pub fn new(engine: Engine, ctx: CallContext) -> Self {
        Self { engine, ctx }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run a device command. `target` must be set for `set-mode`.
    pub async fn dispatch(
        &self,
        command: &Commands,
        serial: Option<&str>,
        target: Option<Mode>,
    ) -> Result<i32, MedicError> {
        if let Commands::Devices = command {
            let devices = self.engine.list_devices(&self.ctx).await?;
            for serial in devices {
                println!("{}", serial);
            }
            return Ok(EXIT_SUCCESS);
        }

        let serial = self.engine.resolve_serial(&self.ctx, serial).await?;
        match command {
            Commands::Diagnose => {
                let state = self.engine.collect_state(&self.ctx, &serial).await;
                let found = self.engine.diagnose(&state);
                for line in render_diagnose(&state, &found) {
                    println!("{}", line);
                }
                Ok(EXIT_SUCCESS)
            }
            Commands::SetMode { mode } => {
                let target = target.map_or_else(|| mode.parse::<Mode>(), Ok)?;
                let outcome = self.engine.set_mode(&self.ctx, &serial, target).await;
                report_set_mode(&outcome)
            }
            // fix; `top` and `devices` never get here
            _ => {
                let state = self.engine.collect_state(&self.ctx, &serial).await;
                let outcome = self.engine.auto_fix(&self.ctx, &serial, &state).await;
                report_fix(&outcome)
            }
        }
    }

    /// Save unsaved score changes on the way out. A session that learned
    /// nothing leaves the file alone, even one that failed to load.
    pub fn close(&self) {
        if !self.engine.scoreboard().is_dirty() {
            return;
        }
        if let Err(e) = self.engine.persist() {
            warn!("Failed to save scoreboard: {}", e);
        }
    }
}

fn report_fix(outcome: &AutoFixOutcome) -> Result<i32, MedicError> {
    for line in render_fix(outcome) {
        println!("{}", line);
    }
    Ok(report_error(outcome.error.as_ref()))
}

fn report_set_mode(outcome: &SetModeOutcome) -> Result<i32, MedicError> {
    if outcome.is_success() {
        println!("[+] {} done (was {})", outcome.action, outcome.from);
    }
    Ok(report_error(outcome.error.as_ref()))
}

fn report_error(error: Option<&MedicError>) -> i32 {
    match error {
        None => EXIT_SUCCESS,
        Some(MedicError::UnsupportedTransition { action, mode }) => {
            eprintln!("cannot apply {} in mode {}", action, mode);
            EXIT_FAILURE
        }
        Some(e) => {
            eprintln!("error: {}", e);
            e.exit_code()
        }
    }
}

/// Summary of an auto-fix pass
pub fn render_fix(outcome: &AutoFixOutcome) -> Vec<String> {
    let mut lines = vec![
        format!(
            "diagnosis: {} ({})",
            outcome.diagnosis.name, outcome.diagnosis.severity
        ),
        format!("message: {}", outcome.diagnosis.message),
        format!(
            "action: {}",
            outcome
                .action
                .map(|a| a.name())
                .unwrap_or_else(|| "(none)".to_string())
        ),
    ];
    if outcome.action.is_some() && outcome.error.is_none() {
        lines.push("[+] done".to_string());
    }
    lines
}

/// Device header followed by every finding in ranked order
pub fn render_diagnose(state: &DeviceState, found: &[Diagnosis]) -> Vec<String> {
    let battery = state
        .battery
        .map(|b| format!("{}%", b))
        .unwrap_or_else(|| "unknown".to_string());
    let mut lines = vec![format!(
        "device: {} ({}, battery {})",
        state.serial, state.mode, battery
    )];

    if found.is_empty() {
        let ok = Diagnosis::ok();
        lines.push(format!("[{}] {}: {}", ok.severity, ok.name, ok.message));
        return lines;
    }
    for d in found {
        lines.push(format!("[{}] {}: {}", d.severity, d.name, d.message));
        for action in &d.actions {
            lines.push(format!("    -> {}", action));
        }
    }
    lines
}

/// `action<TAB>score` rows
pub fn render_top(entries: &[ScoreEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| format!("{}\t{:.2}", e.action, e.score))
        .collect()
}
