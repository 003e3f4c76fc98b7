//! Per-miner variable difficulty controller
//!
//! Targets a fixed share cadence per miner: the window counts accepted
//! shares, and once the retarget interval has elapsed the difficulty is
//! rescaled toward the configured share period. All timing flows through
//! explicit `Instant`s so the controller is testable without sleeping.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Bounds on a single retarget step.
const RATIO_FLOOR: f64 = 0.25;
const RATIO_CEIL: f64 = 4.0;

/// Vardiff tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VardiffConfig {
    /// Desired seconds between shares per miner
    pub target_share_sec: f64,
    /// Minimum seconds between difficulty adjustments
    pub retarget_sec: f64,
    /// Tolerated deviation (percent) before adjusting
    pub variance_percent: f64,
    /// Difficulty floor
    pub min_diff: f64,
    /// Difficulty ceiling
    pub max_diff: f64,
    /// Difficulty assigned to a fresh session
    pub initial_diff: f64,
}

impl Default for VardiffConfig {
    fn default() -> Self {
        Self {
            target_share_sec: 30.0,
            retarget_sec: 60.0,
            variance_percent: 30.0,
            min_diff: 0.001,
            max_diff: 1e9,
            initial_diff: 1.0,
        }
    }
}

/// Sliding-window difficulty state for one miner
#[derive(Debug, Clone)]
pub struct Vardiff {
    current_diff: f64,
    window_start: Instant,
    shares_in_window: u64,
    last_retarget: Instant,
}

impl Vardiff {
    /// Start a controller at the configured initial difficulty.
    pub fn new(config: &VardiffConfig, now: Instant) -> Self {
        Self {
            current_diff: config.initial_diff.clamp(config.min_diff, config.max_diff),
            window_start: now,
            shares_in_window: 0,
            last_retarget: now,
        }
    }

    /// The difficulty currently assigned to the miner.
    pub fn current_diff(&self) -> f64 {
        self.current_diff
    }

    /// Count an accepted share into the window.
    pub fn record_share(&mut self) {
        self.shares_in_window += 1;
    }

    /// Evaluate a retarget. Called on every submission; does nothing until
    /// `retarget_sec` has elapsed since the last evaluation. Returns the new
    /// difficulty when it changed.
    pub fn maybe_retarget(&mut self, config: &VardiffConfig, now: Instant) -> Option<f64> {
        let since_retarget = now.duration_since(self.last_retarget).as_secs_f64();
        if since_retarget < config.retarget_sec {
            return None;
        }

        let window_secs = now.duration_since(self.window_start).as_secs_f64();
        let actual = window_secs / self.shares_in_window.max(1) as f64;
        let ratio = (config.target_share_sec / actual).clamp(RATIO_FLOOR, RATIO_CEIL);

        self.window_start = now;
        self.shares_in_window = 0;
        self.last_retarget = now;

        let deviation = (actual - config.target_share_sec).abs() / config.target_share_sec;
        if deviation <= config.variance_percent / 100.0 {
            return None;
        }

        let new_diff = (self.current_diff * ratio).clamp(config.min_diff, config.max_diff);
        if new_diff == self.current_diff {
            return None;
        }
        self.current_diff = new_diff;
        Some(new_diff)
    }
}
