use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use super::alerts::model::ChannelId;
use super::alerts::triggers::AlertPolicy;
use super::error::{EngineError, EngineResult};
use super::model::Entity;

/// Engine settings. Read once at startup and never changed afterwards.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Entities to track, in display order
    #[serde(default = "default_entities")]
    pub entities: Vec<Entity>,
    /// Channels every alert and status broadcast goes to
    #[serde(default)]
    pub channels: Vec<ChannelId>,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
    #[serde(default)]
    pub alert_policy: AlertPolicy,
    /// Minimum spacing between repeats of one entity/threshold alert
    #[serde(default = "default_dedup_window")]
    pub dedup_window_seconds: u64,
    /// Wait after a spawn before the countdown re-arms
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,
    /// Periodic status broadcast; `null` disables it
    #[serde(default = "default_status_interval")]
    pub status_interval_seconds: Option<u64>,
    /// Relative paths are resolved against the config directory
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

fn default_entities() -> Vec<Entity> {
    vec![
        Entity::new("Rotura", 12.5),
        Entity::new("Stomid", 18.0),
        Entity::new("Tigdal", 12.25),
        Entity::new("Hakir", 18.5),
        Entity::new("Damiros", 19.0 + 20.0 / 60.0),
    ]
}

fn default_tick_interval() -> u64 {
    30
}

fn default_dedup_window() -> u64 {
    300
}

fn default_grace_period() -> u64 {
    600
}

fn default_status_interval() -> Option<u64> {
    Some(3600)
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("boss_data.json")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            entities: default_entities(),
            channels: Vec::new(),
            tick_interval_seconds: default_tick_interval(),
            alert_policy: AlertPolicy::default(),
            dedup_window_seconds: default_dedup_window(),
            grace_period_seconds: default_grace_period(),
            status_interval_seconds: default_status_interval(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> EngineResult<()> {
        if self.tick_interval_seconds == 0 {
            return Err(EngineError::InvalidConfig(
                "tick_interval_seconds must be positive".to_string(),
            ));
        }
        if self.status_interval_seconds == Some(0) {
            return Err(EngineError::InvalidConfig(
                "status_interval_seconds must be positive or null".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    /// Countdown minutes consumed by one tick (0.5 for 30s).
    pub fn tick_minutes(&self) -> f64 {
        self.tick_interval_seconds as f64 / 60.0
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }

    pub fn status_interval(&self) -> Option<Duration> {
        self.status_interval_seconds.map(Duration::from_secs)
    }
}

pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            config_path: config_dir.join("settings.json"),
            config_dir,
        }
    }

    /// Load settings, falling back to defaults when the file is missing or unreadable.
    /// The snapshot path comes back resolved against the config directory.
    pub fn load(&self) -> Settings {
        let mut settings = self.read().unwrap_or_default();
        if settings.snapshot_path.is_relative() {
            settings.snapshot_path = self.config_dir.join(&settings.snapshot_path);
        }
        settings
    }

    fn read(&self) -> Option<Settings> {
        if !self.config_path.exists() {
            return None;
        }
        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| warn!("Could not read {:?}: {}", self.config_path, e))
            .ok()?;
        serde_json::from_str(&content)
            .map_err(|e| warn!("Ignoring invalid {:?}: {}", self.config_path, e))
            .ok()
    }

    pub fn save(&self, settings: &Settings) -> io::Result<()> {
        // Ensure directory exists
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.config_path, content)
    }
}
