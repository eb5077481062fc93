// Alert model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::model::EntityName;

/// Identifier of an outbound channel (a chat channel id in practice)
pub type ChannelId = u64;

/// Threshold value reserved for the "has spawned" alert
pub const SPAWN_THRESHOLD: u32 = 0;

/// Alert event fired when a countdown crosses a threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub entity: EntityName,
    /// Remaining minutes at which the alert fired (0 = spawned)
    pub threshold: u32,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(entity: impl Into<EntityName>, threshold: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity: entity.into(),
            threshold,
            timestamp,
        }
    }

    pub fn is_spawn(&self) -> bool {
        self.threshold == SPAWN_THRESHOLD
    }
}
