//! Structured status report handed to the command layer and broadcasts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{EntityName, Phase, TimerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityStatus {
    NoData,
    Spawned,
    Remaining { hours: u32, minutes: u32 },
}

impl EntityStatus {
    pub fn from_remaining(remaining: Option<f64>) -> Self {
        match remaining {
            None => Self::NoData,
            Some(minutes) if minutes <= 0.0 => Self::Spawned,
            Some(minutes) => {
                let whole = minutes.floor() as u32;
                Self::Remaining {
                    hours: whole / 60,
                    minutes: whole % 60,
                }
            }
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "No data"),
            Self::Spawned => write!(f, "Spawned"),
            Self::Remaining { hours, minutes } => write!(f, "{:02}h{:02}m", hours, minutes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub entity: EntityName,
    pub status: EntityStatus,
    pub phase: Phase,
}

impl StatusEntry {
    pub fn from_state(entity: impl Into<EntityName>, state: &TimerState) -> Self {
        Self {
            entity: entity.into(),
            status: EntityStatus::from_remaining(state.remaining),
            phase: state.phase,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn get(&self, entity: &str) -> Option<&StatusEntry> {
        self.entries.iter().find(|entry| entry.entity == entity)
    }
}
