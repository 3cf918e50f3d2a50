//! Diagnosis engine.
//!
//! Runs the rule set over a captured `DeviceState`, ranks the findings and
//! drives one remediation: choose an action from the top finding, check its
//! guard, apply it through the transport, then feed the outcome back into the
//! scoreboard.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::actions::Action;
use crate::capture;
use crate::config::MedicConfig;
use crate::context::CallContext;
use crate::error::{MedicError, ScoreboardError, TransportError};
use crate::rules::{default_rules, Diagnosis, Rule};
use crate::scoreboard::Scoreboard;
use crate::state::{DeviceState, Mode};
use crate::transport::Transport;

/// Selection weight before learning: `1 / (1 + cost in seconds)`
pub fn base_weight(action: &Action) -> f64 {
    1.0 / (1.0 + action.cost().as_secs_f64())
}

/// Result of one auto-fix pass
#[derive(Debug)]
pub struct AutoFixOutcome {
    /// Top-ranked finding, or the synthetic "ok" finding
    pub diagnosis: Diagnosis,
    /// Action chosen (applied, or rejected by its guard)
    pub action: Option<Action>,
    pub error: Option<MedicError>,
}

impl AutoFixOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of an explicit mode transition
#[derive(Debug)]
pub struct SetModeOutcome {
    /// Mode observed before the transition
    pub from: Mode,
    pub action: Action,
    pub error: Option<MedicError>,
}

impl SetModeOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Engine {
    transport: Arc<dyn Transport>,
    rules: Vec<Box<dyn Rule>>,
    scoreboard: Arc<Scoreboard>,
    auto_pick: bool,
    scoreboard_path: Option<PathBuf>,
    rng: Mutex<StdRng>,
}

impl Engine {
    /// Engine with the built-in rules, weighted selection and no persistence
    pub fn new(transport: Arc<dyn Transport>, scoreboard: Arc<Scoreboard>) -> Self {
        Self {
            transport,
            rules: default_rules(),
            scoreboard,
            auto_pick: true,
            scoreboard_path: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Engine wired from a resolved configuration
    pub fn from_config(
        config: &MedicConfig,
        transport: Arc<dyn Transport>,
        scoreboard: Arc<Scoreboard>,
    ) -> Self {
        let engine = Self::new(transport, scoreboard)
            .with_auto_pick(config.auto_pick)
            .with_scoreboard_path(config.scoreboard_path());
        match config.seed {
            Some(seed) => engine.with_seed(seed),
            None => engine,
        }
    }

    /// Replace the rule set; registration order breaks ranking ties
    pub fn with_rules(mut self, rules: Vec<Box<dyn Rule>>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_auto_pick(mut self, auto_pick: bool) -> Self {
        self.auto_pick = auto_pick;
        self
    }

    /// Persist the scoreboard here after every applied action
    pub fn with_scoreboard_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.scoreboard_path = Some(path.into());
        self
    }

    /// Fix the selection RNG
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn scoreboard(&self) -> &Arc<Scoreboard> {
        &self.scoreboard
    }

    pub async fn list_devices(&self, ctx: &CallContext) -> Result<Vec<String>, TransportError> {
        self.transport.list_devices(ctx).await
    }

    /// `serial` if given, otherwise the first detected device
    pub async fn resolve_serial(
        &self,
        ctx: &CallContext,
        serial: Option<&str>,
    ) -> Result<String, MedicError> {
        if let Some(serial) = serial.filter(|s| !s.is_empty()) {
            return Ok(serial.to_string());
        }
        let devices = self.transport.list_devices(ctx).await?;
        let first = devices
            .into_iter()
            .next()
            .ok_or(MedicError::Transport(TransportError::NoDevices))?;
        debug!(serial = %first, "using first detected device");
        Ok(first)
    }

    pub async fn collect_state(&self, ctx: &CallContext, serial: &str) -> DeviceState {
        capture::collect_state(ctx, self.transport.as_ref(), serial).await
    }

    /// Every finding for `state`, ranked by severity (highest first), then by
    /// number of candidate actions (most first). The sort is stable, so rule
    /// registration order decides remaining ties.
    pub fn diagnose(&self, state: &DeviceState) -> Vec<Diagnosis> {
        let mut found: Vec<Diagnosis> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let diagnosis = rule.evaluate(state)?;
                debug!(rule = rule.name(), severity = %diagnosis.severity, "rule fired");
                Some(diagnosis)
            })
            .collect();
        found.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.actions.len().cmp(&a.actions.len()))
        });
        found
    }

    /// Diagnose `state` and try the top finding's remedy.
    pub async fn auto_fix(
        &self,
        ctx: &CallContext,
        serial: &str,
        state: &DeviceState,
    ) -> AutoFixOutcome {
        let Some(diagnosis) = self.diagnose(state).into_iter().next() else {
            return AutoFixOutcome {
                diagnosis: Diagnosis::ok(),
                action: None,
                error: None,
            };
        };
        if !diagnosis.is_actionable() {
            debug!(diagnosis = %diagnosis.name, "top finding has no remedy");
            return AutoFixOutcome {
                diagnosis,
                action: None,
                error: None,
            };
        }

        let action = diagnosis.actions[self.select(&diagnosis.actions)];
        info!(diagnosis = %diagnosis.name, action = %action, "selected action");

        let error = if action.can_apply(state) {
            self.run(ctx, serial, action).await.err()
        } else {
            Some(MedicError::UnsupportedTransition {
                action: action.name(),
                mode: state.mode,
            })
        };
        AutoFixOutcome {
            diagnosis,
            action: Some(action),
            error,
        }
    }

    /// Capture `serial` and move it to `target`. An impossible target fails
    /// before any device call, with `from` left at `unknown`.
    pub async fn set_mode(&self, ctx: &CallContext, serial: &str, target: Mode) -> SetModeOutcome {
        let action = Action::set_mode(target);
        if let Err(e) = action.check_target() {
            return SetModeOutcome {
                from: Mode::Unknown,
                action,
                error: Some(e),
            };
        }
        let state = self.collect_state(ctx, serial).await;
        let error = if action.can_apply(&state) {
            self.run(ctx, serial, action).await.err()
        } else {
            Some(MedicError::UnsupportedTransition {
                action: action.name(),
                mode: state.mode,
            })
        };
        SetModeOutcome {
            from: state.mode,
            action,
            error,
        }
    }

    /// Save the scoreboard to the configured path. No path means nothing to do.
    pub fn persist(&self) -> Result<(), ScoreboardError> {
        match &self.scoreboard_path {
            Some(path) => self.scoreboard.save(path),
            None => Ok(()),
        }
    }

    /// Index of the candidate to try
    fn select(&self, candidates: &[Action]) -> usize {
        if !self.auto_pick {
            return 0;
        }
        let names: Vec<String> = candidates.iter().map(Action::name).collect();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.scoreboard
            .pick_with_rng(&names, |i| base_weight(&candidates[i]), &mut *rng)
    }

    /// Apply, record the outcome and persist. Persistence failures are logged
    /// and never replace the action's own result.
    async fn run(&self, ctx: &CallContext, serial: &str, action: Action) -> Result<(), MedicError> {
        let result = action.apply(ctx, self.transport.as_ref(), serial).await;

        // Never reached the device: nothing to learn from
        if let Err(MedicError::UnknownTarget { .. }) = &result {
            return result;
        }

        let score = self.scoreboard.update(&action.name(), result.is_ok());
        match &result {
            Ok(()) => info!(action = %action, score, "action succeeded"),
            Err(e) => info!(action = %action, score, "action failed: {}", e),
        }
        if let Err(e) = self.persist() {
            warn!("Failed to save scoreboard: {}", e);
        }
        result
    }
}
