// Threshold evaluation for countdown alerts.
//
// A threshold is due when the remaining minutes sit on it or less than one
// tick above it, so a countdown meets each threshold on exactly one tick
// whatever the tick length.
// Thresholds are the multiples of the step at or below the window maximum,
// plus the unconditional spawn alert at zero minutes.

use serde::{Deserialize, Serialize};

use super::model::SPAWN_THRESHOLD;

/// Float drift tolerated at the edges of a tick window
const DRIFT_EPSILON: f64 = 1e-6;

/// Alert window policy - persisted in settings.json
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Largest remaining-minutes value that can alert (default: 30)
    #[serde(default = "default_window_max")]
    pub window_max_minutes: u32,
    /// Spacing between upcoming alerts (default: 10). Zero disables them.
    #[serde(default = "default_step")]
    pub step_minutes: u32,
}

fn default_window_max() -> u32 {
    30
}

fn default_step() -> u32 {
    10
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            window_max_minutes: default_window_max(),
            step_minutes: default_step(),
        }
    }
}

impl AlertPolicy {
    /// All thresholds this policy can emit, largest first, always ending in 0.
    pub fn thresholds(&self) -> Vec<u32> {
        let mut thresholds = Vec::new();
        if self.step_minutes > 0 {
            let mut value = self.window_max_minutes - self.window_max_minutes % self.step_minutes;
            while value > 0 {
                thresholds.push(value);
                value -= self.step_minutes;
            }
        }
        thresholds.push(SPAWN_THRESHOLD);
        thresholds
    }

    /// Thresholds due at `remaining` for a tick of `tick_minutes`, largest first.
    ///
    /// `threshold` is due when `threshold <= remaining < threshold + tick_minutes`.
    pub fn thresholds_due(&self, remaining: f64, tick_minutes: f64) -> Vec<u32> {
        if !remaining.is_finite() || remaining < -DRIFT_EPSILON {
            return Vec::new();
        }
        let span = if tick_minutes.is_finite() && tick_minutes > 0.0 {
            tick_minutes
        } else {
            DRIFT_EPSILON * 2.0
        };

        self.thresholds()
            .into_iter()
            .filter(|threshold| {
                let lower = f64::from(*threshold) - DRIFT_EPSILON;
                let upper = f64::from(*threshold) + span - DRIFT_EPSILON;
                remaining >= lower && remaining < upper
            })
            .collect()
    }
}
