//! Learned action weights.
//!
//! Maps action names to a score in `[SCORE_MIN, SCORE_MAX]`. Successes add
//! `SUCCESS_REWARD`, failures subtract `FAILURE_PENALTY`. Scores bias the
//! weighted roulette in `pick` through a bounded multiplier.
//!
//! On disk the scoreboard is one JSON object, `{"scores": {name: number}}`.
//! Loading merges into the in-memory map; any other top-level field in the
//! file is ignored and therefore dropped by the next save. Each process keeps
//! its own copy, so concurrent processes overwrite each other (last save wins).

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScoreboardError;

pub const SCORE_MIN: f64 = -20.0;
pub const SCORE_MAX: f64 = 50.0;
pub const SUCCESS_REWARD: f64 = 1.0;
pub const FAILURE_PENALTY: f64 = 0.25;

/// Bounds of the selection multiplier `1 + score / 10`
pub const MULTIPLIER_MIN: f64 = 0.3;
pub const MULTIPLIER_MAX: f64 = 3.0;

/// On-disk layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct ScoreFile {
    #[serde(default)]
    scores: BTreeMap<String, f64>,
}

/// One row of `Scoreboard::top`
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEntry {
    pub action: String,
    pub score: f64,
}

/// Thread-safe score store. One lock around the whole map.
#[derive(Debug, Default)]
pub struct Scoreboard {
    scores: Mutex<HashMap<String, f64>>,
    /// Updated since the last successful save; only written under the lock
    dirty: AtomicBool,
}

fn clamp_score(v: f64) -> f64 {
    v.clamp(SCORE_MIN, SCORE_MAX)
}

/// Selection multiplier for a learned score
pub fn multiplier(score: f64) -> f64 {
    (1.0 + score / 10.0).clamp(MULTIPLIER_MIN, MULTIPLIER_MAX)
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from existing scores, clamping each into range
    pub fn from_scores<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let map = scores
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| (k.into(), clamp_score(v)))
            .collect();
        Self {
            scores: Mutex::new(map),
            dirty: AtomicBool::new(false),
        }
    }

    // A panic while holding the lock cannot leave the map half-written, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, f64>> {
        self.scores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current score; 0 for names never seen
    pub fn score(&self, action: &str) -> f64 {
        self.lock().get(action).copied().unwrap_or(0.0)
    }

    /// Copy of every score
    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record an outcome and return the new score
    pub fn update(&self, action: &str, success: bool) -> f64 {
        let mut scores = self.lock();
        let current = scores.get(action).copied().unwrap_or(0.0);
        let delta = if success {
            SUCCESS_REWARD
        } else {
            -FAILURE_PENALTY
        };
        let next = clamp_score(current + delta);
        scores.insert(action.to_string(), next);
        self.dirty.store(true, Ordering::Release);
        debug!(action, success, score = next, "scoreboard updated");
        next
    }

    /// Selection weight per candidate: `base(i) * multiplier(score)`, with
    /// negative or non-finite results floored to 0.
    pub fn weights<F>(&self, names: &[String], base: F) -> Vec<f64>
    where
        F: Fn(usize) -> f64,
    {
        let scores: Vec<f64> = {
            let map = self.lock();
            names
                .iter()
                .map(|n| map.get(n).copied().unwrap_or(0.0))
                .collect()
        };
        scores
            .into_iter()
            .enumerate()
            .map(|(i, score)| {
                let w = base(i) * multiplier(score);
                if w.is_finite() && w > 0.0 {
                    w
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Weighted roulette with a caller-supplied draw in `[0, 1)`.
    ///
    /// Returns the first index whose cumulative weight reaches
    /// `draw * total`. A zero total, or an empty candidate list, yields 0.
    pub fn pick_with_draw<F>(&self, names: &[String], base: F, draw: f64) -> usize
    where
        F: Fn(usize) -> f64,
    {
        if names.is_empty() {
            return 0;
        }
        let weights = self.weights(names, base);
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return 0;
        }
        let draw = if draw.is_finite() {
            draw.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let target = draw * total;
        let mut acc = 0.0;
        for (i, w) in weights.iter().enumerate() {
            acc += w;
            if acc >= target {
                return i;
            }
        }
        names.len() - 1
    }

    /// Weighted roulette drawing from `rng`
    pub fn pick_with_rng<F, R>(&self, names: &[String], base: F, rng: &mut R) -> usize
    where
        F: Fn(usize) -> f64,
        R: Rng + ?Sized,
    {
        let draw: f64 = rng.gen();
        self.pick_with_draw(names, base, draw)
    }

    /// Weighted roulette drawing from the thread-local RNG
    pub fn pick<F>(&self, names: &[String], base: F) -> usize
    where
        F: Fn(usize) -> f64,
    {
        self.pick_with_rng(names, base, &mut rand::thread_rng())
    }

    /// Up to `n` entries by descending score; `n == 0` returns all.
    /// Ties are ordered by name.
    pub fn top(&self, n: usize) -> Vec<ScoreEntry> {
        let mut rows: Vec<ScoreEntry> = self
            .lock()
            .iter()
            .map(|(action, score)| ScoreEntry {
                action: action.clone(),
                score: *score,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.action.cmp(&b.action))
        });
        if n > 0 {
            rows.truncate(n);
        }
        rows
    }

    /// Merge scores from `path`. On any error the in-memory map is untouched.
    /// Returns the number of entries read.
    pub fn load(&self, path: &Path) -> Result<usize, ScoreboardError> {
        let content = fs::read_to_string(path).map_err(|source| ScoreboardError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ScoreFile =
            serde_json::from_str(&content).map_err(|source| ScoreboardError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let count = file.scores.len();
        let mut scores = self.lock();
        for (action, score) in file.scores {
            scores.insert(action, clamp_score(score));
        }
        debug!(path = %path.display(), entries = count, "scoreboard loaded");
        Ok(count)
    }

    /// Whether any score changed since the last successful save
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write all scores to `path`, creating parent directories. The file is
    /// written beside the target and renamed into place.
    pub fn save(&self, path: &Path) -> Result<(), ScoreboardError> {
        let file = {
            let scores = self.lock();
            self.dirty.store(false, Ordering::Release);
            ScoreFile {
                scores: scores.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            }
        };
        let result = write_file(path, &file);
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }
}

fn write_file(path: &Path, file: &ScoreFile) -> Result<(), ScoreboardError> {
    let io_err = |source| ScoreboardError::Io {
        path: path.to_path_buf(),
        source,
    };
    let content = serde_json::to_string_pretty(file).map_err(|source| ScoreboardError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = temp_path(path);
    fs::write(&tmp, content).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    debug!(path = %path.display(), entries = file.scores.len(), "scoreboard saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_update_asymmetry() {
        let sb = Scoreboard::new();
        assert_eq!(sb.update("a", true), 1.0);
        assert_eq!(sb.update("a", true), 2.0);
        assert_eq!(sb.update("a", false), 1.75);
        assert_eq!(sb.update("b", false), -0.25);
    }

    #[test]
    fn test_clamp_upper() {
        let sb = Scoreboard::new();
        for _ in 0..200 {
            assert!(sb.update("a", true) <= SCORE_MAX);
        }
        assert_eq!(sb.score("a"), SCORE_MAX);
    }

    #[test]
    fn test_clamp_lower() {
        let sb = Scoreboard::new();
        for _ in 0..200 {
            assert!(sb.update("a", false) >= SCORE_MIN);
        }
        assert_eq!(sb.score("a"), SCORE_MIN);
    }

    #[test]
    fn test_multiplier_bounds() {
        assert_eq!(multiplier(0.0), 1.0);
        assert_eq!(multiplier(SCORE_MAX), MULTIPLIER_MAX);
        assert_eq!(multiplier(SCORE_MIN), MULTIPLIER_MIN);
        assert!((multiplier(5.0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_pick_with_draw_follows_cumulative_weights() {
        let sb = Scoreboard::new();
        let n = names(&["a", "b"]);
        assert_eq!(sb.pick_with_draw(&n, |_| 1.0, 0.0), 0);
        assert_eq!(sb.pick_with_draw(&n, |_| 1.0, 0.49), 0);
        assert_eq!(sb.pick_with_draw(&n, |_| 1.0, 0.5), 0);
        assert_eq!(sb.pick_with_draw(&n, |_| 1.0, 0.51), 1);
        assert_eq!(sb.pick_with_draw(&n, |_| 1.0, 0.999), 1);
    }

    #[test]
    fn test_pick_prefers_learned_success() {
        let sb = Scoreboard::from_scores([("b", 20.0)]);
        let n = names(&["a", "b"]);
        // weights 1.0 and 3.0: only the first quarter of draws selects "a"
        assert_eq!(sb.pick_with_draw(&n, |_| 1.0, 0.2), 0);
        assert_eq!(sb.pick_with_draw(&n, |_| 1.0, 0.3), 1);
    }

    #[test]
    fn test_pick_degenerate_weights() {
        let sb = Scoreboard::new();
        let n = names(&["a", "b", "c"]);
        for draw in [0.0, 0.5, 0.99] {
            assert_eq!(sb.pick_with_draw(&n, |_| 0.0, draw), 0);
            assert_eq!(sb.pick_with_draw(&n, |_| -3.0, draw), 0);
            assert_eq!(sb.pick_with_draw(&n, |_| f64::NAN, draw), 0);
        }
        assert_eq!(sb.pick_with_draw(&[], |_| 1.0, 0.5), 0);
    }

    #[test]
    fn test_pick_never_out_of_range() {
        let sb = Scoreboard::from_scores([("a", -20.0), ("b", 50.0)]);
        let n = names(&["a", "b"]);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            assert!(sb.pick_with_rng(&n, |_| 1.0, &mut rng) < n.len());
        }
        assert_eq!(sb.pick_with_draw(&n, |_| 1.0, 7.0), 1);
        assert_eq!(sb.pick_with_draw(&n, |_| 1.0, f64::NAN), 0);
    }

    #[test]
    fn test_pick_equal_weights_is_roughly_even() {
        let sb = Scoreboard::new();
        let n = names(&["a", "b"]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[sb.pick_with_rng(&n, |_| 1.0 / 11.0, &mut rng)] += 1;
        }
        assert!((4_500..=5_500).contains(&counts[0]), "counts: {counts:?}");
    }

    #[test]
    fn test_top_orders_and_limits() {
        let sb = Scoreboard::from_scores([("low", -1.0), ("high", 9.0), ("mid", 3.0)]);
        let top2 = sb.top(2);
        assert_eq!(top2.len(), 2);
        assert_eq!(top2[0].action, "high");
        assert_eq!(top2[1].action, "mid");
        assert_eq!(sb.top(0).len(), 3);
        assert_eq!(sb.top(10).len(), 3);
    }

    #[test]
    fn test_from_scores_clamps() {
        let sb = Scoreboard::from_scores([("a", 500.0), ("b", -500.0), ("c", f64::NAN)]);
        assert_eq!(sb.score("a"), SCORE_MAX);
        assert_eq!(sb.score("b"), SCORE_MIN);
        assert_eq!(sb.len(), 2);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/scoreboard.json");
        let sb = Scoreboard::from_scores([
            ("set_mode_adb", 1.0),
            ("set_mode_recovery", -0.25),
            ("weird key ✓", 0.1 + 0.2),
            ("edge", SCORE_MIN),
        ]);
        sb.save(&path).unwrap();

        let fresh = Scoreboard::new();
        assert_eq!(fresh.load(&path).unwrap(), 4);
        assert_eq!(fresh.snapshot(), sb.snapshot());
    }

    #[test]
    fn test_on_disk_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scoreboard.json");
        Scoreboard::from_scores([("set_mode_adb", 2.0)]).save(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"scores": {"set_mode_adb": 2.0}}));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_dirty_tracks_unsaved_updates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scoreboard.json");
        fs::write(&path, r#"{"scores": {"a": 2.0}}"#).unwrap();

        let sb = Scoreboard::new();
        sb.load(&path).unwrap();
        assert!(!sb.is_dirty());

        sb.update("a", true);
        assert!(sb.is_dirty());
        sb.save(&path).unwrap();
        assert!(!sb.is_dirty());

        // Parent is a regular file, so the save fails and the flag stays set
        sb.update("a", false);
        assert!(sb.save(&path.join("nested.json")).is_err());
        assert!(sb.is_dirty());
    }

    #[test]
    fn test_load_missing_file_keeps_state() {
        let dir = tempdir().unwrap();
        let sb = Scoreboard::from_scores([("a", 1.0)]);
        let err = sb.load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ScoreboardError::Io { .. }));
        assert_eq!(sb.score("a"), 1.0);
    }

    #[test]
    fn test_load_corrupt_file_keeps_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scoreboard.json");
        fs::write(&path, "{not json").unwrap();
        let sb = Scoreboard::from_scores([("a", 1.0)]);
        assert!(matches!(sb.load(&path), Err(ScoreboardError::Json { .. })));
        assert_eq!(sb.snapshot().len(), 1);
    }

    #[test]
    fn test_load_drops_unknown_fields_and_clamps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scoreboard.json");
        fs::write(
            &path,
            r#"{"version": 3, "scores": {"a": 99.0, "b": 2.5}, "extra": [1, 2]}"#,
        )
        .unwrap();
        let sb = Scoreboard::new();
        sb.load(&path).unwrap();
        assert_eq!(sb.score("a"), SCORE_MAX);
        assert_eq!(sb.score("b"), 2.5);

        sb.save(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value.get("version").is_none());
        assert!(value.get("extra").is_none());
    }

    #[test]
    fn test_load_merges_into_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scoreboard.json");
        Scoreboard::from_scores([("b", 4.0)]).save(&path).unwrap();
        let sb = Scoreboard::from_scores([("a", 1.0), ("b", 1.0)]);
        sb.load(&path).unwrap();
        assert_eq!(sb.score("a"), 1.0);
        assert_eq!(sb.score("b"), 4.0);
    }

    #[test]
    fn test_concurrent_updates() {
        let sb = Arc::new(Scoreboard::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sb = Arc::clone(&sb);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        sb.update("shared", true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sb.score("shared"), 40.0);
    }
}
