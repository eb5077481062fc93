use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alerts::ledger::AlertLedger;
use super::error::{EngineError, EngineResult};

pub type EntityName = String;

/// A tracked respawning entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: EntityName,
    /// Respawn duration in hours (12.5 = 12h30m)
    pub respawn_hours: f64,
}

impl Entity {
    pub fn new(name: impl Into<EntityName>, respawn_hours: f64) -> Self {
        Self {
            name: name.into(),
            respawn_hours,
        }
    }

    /// Minutes a countdown is armed with after a death report or a spawn.
    pub fn respawn_minutes(&self) -> f64 {
        self.respawn_hours * 60.0
    }
}

/// Static lookup table of entities, in configuration order.
#[derive(Clone, Debug)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
}

impl EntityRegistry {
    pub fn new(entities: Vec<Entity>) -> EngineResult<Self> {
        validate_entities(&entities)?;
        Ok(Self { entities })
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    pub fn lookup(&self, name: &str) -> EngineResult<&Entity> {
        self.get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    pub fn respawn_minutes(&self, name: &str) -> EngineResult<f64> {
        self.lookup(name).map(Entity::respawn_minutes)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn validate_entities(entities: &[Entity]) -> EngineResult<()> {
    let mut seen = HashSet::new();
    for entity in entities {
        if entity.name.trim().is_empty() {
            return Err(EngineError::InvalidConfig("entity with empty name".to_string()));
        }
        if !seen.insert(entity.name.as_str()) {
            return Err(EngineError::InvalidConfig(format!(
                "duplicate entity {}",
                entity.name
            )));
        }
        if !entity.respawn_hours.is_finite() || entity.respawn_hours <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "{} has a non-positive respawn duration",
                entity.name
            )));
        }
    }
    Ok(())
}

/// Where an entity is in its respawn cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No active countdown
    #[default]
    Idle,
    /// Decrementing toward zero
    Counting,
    /// Just spawned; countdown frozen until the grace window elapses
    GracePeriod,
}

/// Countdown state for one entity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimerState {
    /// Minutes until spawn. `None` means never tracked.
    pub remaining: Option<f64>,
    pub last_spawn_at: Option<DateTime<Utc>>,
    pub fired_alerts: AlertLedger,
    pub phase: Phase,
    /// Bumped on every manual mutation and grace entry; not persisted
    pub generation: u64,
}

impl TimerState {
    /// Manual (re)arm from a death report or override.
    pub fn arm(&mut self, minutes: f64) {
        self.remaining = Some(minutes.max(0.0));
        self.phase = Phase::Counting;
        self.fired_alerts.clear();
        self.last_spawn_at = None;
        self.generation += 1;
    }

    /// Enter the grace period at `now`. Returns the generation the grace
    /// completion must still observe to apply.
    pub fn begin_grace(&mut self, now: DateTime<Utc>) -> u64 {
        self.remaining = Some(0.0);
        self.last_spawn_at = Some(now);
        self.phase = Phase::GracePeriod;
        self.generation += 1;
        self.generation
    }

    /// Grace completion: re-arm to the full duration. Keeps `last_spawn_at`.
    pub fn rearm_after_grace(&mut self, minutes: f64) {
        self.remaining = Some(minutes.max(0.0));
        self.fired_alerts.clear();
        self.phase = Phase::Counting;
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Counting
    }
}
