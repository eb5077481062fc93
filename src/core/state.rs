use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;

use super::alerts::model::{AlertEvent, SPAWN_THRESHOLD};
use super::alerts::triggers::AlertPolicy;
use super::error::{EngineError, EngineResult};
use super::model::{EntityName, EntityRegistry, Phase, TimerState};
use super::snapshot::{EntitySnapshot, Snapshot};
use super::status::{StatusEntry, StatusReport};

/// Countdowns closer to zero than this are treated as zero
const ZERO_EPSILON: f64 = 1e-9;

/// Everything one tick pass needs besides the store itself
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub policy: AlertPolicy,
    /// Minutes removed from each active countdown per tick
    pub tick_minutes: f64,
    pub dedup_window: Duration,
    pub now: DateTime<Utc>,
}

/// Result of advancing a single entity
#[derive(Debug, Default, PartialEq)]
pub struct TickOutcome {
    pub alerts: Vec<AlertEvent>,
    /// Generation to hand to the grace completion, when the entity just spawned
    pub grace_started: Option<u64>,
    pub changed: bool,
}

/// Result of a full tick pass
#[derive(Debug, Default)]
pub struct StoreTick {
    pub alerts: Vec<AlertEvent>,
    pub graces: Vec<(EntityName, u64)>,
    pub changed: bool,
}

/// All countdown state. Owned by the coordinator behind a single lock.
pub struct TimerStore {
    timers: HashMap<EntityName, TimerState>,
}

impl TimerStore {
    /// Fresh store with every entity idle.
    pub fn new(registry: &EntityRegistry) -> Self {
        Self {
            timers: registry
                .iter()
                .map(|entity| (entity.name.clone(), TimerState::default()))
                .collect(),
        }
    }

    /// Rebuild from a snapshot. Entities missing from the snapshot start idle,
    /// unknown ones are dropped and invalid records are reset.
    pub fn from_snapshot(registry: &EntityRegistry, snapshot: &Snapshot) -> Self {
        for name in snapshot.entities.keys() {
            if !registry.contains(name) {
                warn!("Dropping snapshot entry for unknown entity {}", name);
            }
        }

        let timers = registry
            .iter()
            .map(|entity| {
                let state = match snapshot.get(&entity.name) {
                    Some(record) => restore(&entity.name, record).unwrap_or_else(|err| {
                        warn!("{}; starting {} idle", err, entity.name);
                        TimerState::default()
                    }),
                    None => TimerState::default(),
                };
                (entity.name.clone(), state)
            })
            .collect();

        Self { timers }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entities: self
                .timers
                .iter()
                .map(|(name, state)| (name.clone(), EntitySnapshot::from(state)))
                .collect(),
        }
    }

    pub fn get(&self, entity: &str) -> Option<&TimerState> {
        self.timers.get(entity)
    }

    pub fn get_mut(&mut self, entity: &str) -> Option<&mut TimerState> {
        self.timers.get_mut(entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityName, &TimerState)> {
        self.timers.iter()
    }

    /// Advance every entity by one tick, in registry order. A faulty entity is
    /// logged and left as is; the rest are still processed.
    pub fn tick(&mut self, registry: &EntityRegistry, ctx: &TickContext) -> StoreTick {
        let mut result = StoreTick::default();

        for entity in registry.iter() {
            match self.tick_entity(&entity.name, ctx) {
                Ok(outcome) => {
                    if let Some(generation) = outcome.grace_started {
                        result.graces.push((entity.name.clone(), generation));
                    }
                    result.alerts.extend(outcome.alerts);
                    result.changed |= outcome.changed;
                }
                Err(err) => warn!("Skipping {} this tick: {}", entity.name, err),
            }
        }

        result
    }

    pub fn tick_entity(&mut self, entity: &str, ctx: &TickContext) -> EngineResult<TickOutcome> {
        let state = self
            .timers
            .get_mut(entity)
            .ok_or_else(|| EngineError::NotFound(entity.to_string()))?;
        advance(entity, state, ctx)
    }

    pub fn status(&self, registry: &EntityRegistry, now: DateTime<Utc>) -> StatusReport {
        let entries = registry
            .iter()
            .map(|entity| match self.timers.get(&entity.name) {
                Some(state) => StatusEntry::from_state(entity.name.as_str(), state),
                None => StatusEntry::from_state(entity.name.as_str(), &TimerState::default()),
            })
            .collect();

        StatusReport {
            generated_at: now,
            entries,
        }
    }
}

fn malformed(entity: &str, reason: impl Into<String>) -> EngineError {
    EngineError::MalformedState {
        entity: entity.to_string(),
        reason: reason.into(),
    }
}

fn restore(entity: &str, record: &EntitySnapshot) -> EngineResult<TimerState> {
    if let Some(remaining) = record.remaining {
        if !remaining.is_finite() || remaining < 0.0 {
            return Err(malformed(entity, format!("remaining {} is negative", remaining)));
        }
    }

    let phase = record.resolved_phase();
    match phase {
        Phase::Counting if record.remaining.is_none() => {
            return Err(malformed(entity, "counting without a remaining value"));
        }
        Phase::GracePeriod if record.last_spawn_at.is_none() => {
            return Err(malformed(entity, "grace period without a spawn time"));
        }
        _ => {}
    }

    // An idle entity has no countdown to show
    let remaining = match phase {
        Phase::Idle if record.remaining.is_some() => {
            warn!("{} is idle but carries a countdown; discarding it", entity);
            None
        }
        _ => record.remaining,
    };

    Ok(TimerState {
        remaining,
        last_spawn_at: record.last_spawn_at,
        fired_alerts: record.fired_alerts.clone(),
        phase,
        generation: 0,
    })
}

fn advance(entity: &str, state: &mut TimerState, ctx: &TickContext) -> EngineResult<TickOutcome> {
    if !state.is_active() {
        return Ok(TickOutcome::default());
    }

    let mut remaining = match state.remaining {
        Some(value) if value.is_finite() && value >= 0.0 => value,
        Some(value) => {
            return Err(malformed(entity, format!("remaining {} is not a valid countdown", value)))
        }
        None => return Err(malformed(entity, "counting without a remaining value")),
    };

    let mut outcome = TickOutcome::default();

    if remaining > 0.0 {
        for threshold in ctx
            .policy
            .thresholds_due(remaining, ctx.tick_minutes)
            .into_iter()
            .filter(|threshold| *threshold != SPAWN_THRESHOLD)
        {
            if state.fired_alerts.try_fire(threshold, ctx.now, ctx.dedup_window) {
                outcome.alerts.push(AlertEvent::new(entity, threshold, ctx.now));
            }
        }

        let next = remaining - ctx.tick_minutes;
        remaining = if next <= ZERO_EPSILON { 0.0 } else { next };
        state.remaining = Some(remaining);
        outcome.changed = true;
    }

    if remaining <= 0.0
        && state
            .fired_alerts
            .try_fire(SPAWN_THRESHOLD, ctx.now, ctx.dedup_window)
    {
        outcome
            .alerts
            .push(AlertEvent::new(entity, SPAWN_THRESHOLD, ctx.now));
        outcome.grace_started = Some(state.begin_grace(ctx.now));
        outcome.changed = true;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Entity;
    use crate::core::snapshot::SnapshotStore;
    use chrono::TimeZone;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(vec![
            Entity::new("Rotura", 12.5),
            Entity::new("Hakir", 18.5),
            Entity::new("Stomid", 18.0),
        ])
        .unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_800_000_000 + secs, 0).unwrap()
    }

    fn ctx(now: DateTime<Utc>) -> TickContext {
        TickContext {
            policy: AlertPolicy::default(),
            tick_minutes: 0.5,
            dedup_window: Duration::from_secs(300),
            now,
        }
    }

    fn counting(store: &mut TimerStore, entity: &str, remaining: f64) {
        store.get_mut(entity).unwrap().arm(remaining);
    }

    #[test]
    fn test_new_store_is_all_idle() {
        let store = TimerStore::new(&registry());
        assert_eq!(store.iter().count(), 3);
        assert!(store.iter().all(|(_, s)| s.phase == Phase::Idle && s.remaining.is_none()));
    }

    #[test]
    fn test_idle_entities_are_skipped() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        let tick = store.tick(&registry, &ctx(at(0)));
        assert!(tick.alerts.is_empty());
        assert!(!tick.changed);
    }

    #[test]
    fn test_countdown_to_spawn() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Rotura", 1.0);

        let first = store.tick(&registry, &ctx(at(0)));
        assert!(first.alerts.is_empty());
        assert_eq!(store.get("Rotura").unwrap().remaining, Some(0.5));

        let second = store.tick(&registry, &ctx(at(30)));
        assert_eq!(second.alerts, vec![AlertEvent::new("Rotura", 0, at(30))]);
        assert_eq!(second.graces.len(), 1);

        let state = store.get("Rotura").unwrap();
        assert_eq!(state.remaining, Some(0.0));
        assert_eq!(state.phase, Phase::GracePeriod);
        assert_eq!(state.last_spawn_at, Some(at(30)));
        assert_eq!(second.graces[0], ("Rotura".to_string(), state.generation));
    }

    #[test]
    fn test_grace_period_is_frozen() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Rotura", 0.5);
        store.tick(&registry, &ctx(at(0)));

        let tick = store.tick(&registry, &ctx(at(30)));
        assert!(tick.alerts.is_empty());
        assert!(!tick.changed);
        assert_eq!(store.get("Rotura").unwrap().remaining, Some(0.0));
    }

    #[test]
    fn test_threshold_alerts_fire_on_step() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Hakir", 30.0);

        let mut fired = Vec::new();
        for i in 0..21 {
            let tick = store.tick(&registry, &ctx(at(i * 30)));
            fired.extend(tick.alerts.into_iter().map(|a| a.threshold));
        }

        assert_eq!(fired, vec![30, 20]);
        assert_eq!(store.get("Hakir").unwrap().remaining, Some(19.5));
    }

    #[test]
    fn test_no_alert_outside_window() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Hakir", 40.0);
        let tick = store.tick(&registry, &ctx(at(0)));
        assert!(tick.alerts.is_empty());
        assert_eq!(store.get("Hakir").unwrap().remaining, Some(39.5));
    }

    #[test]
    fn test_dedup_window_between_ticks() {
        let registry = registry();

        // Two ticks 60s apart on the same threshold: one alert
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Stomid", 10.0);
        let first = store.tick_entity("Stomid", &ctx(at(0))).unwrap();
        store.get_mut("Stomid").unwrap().remaining = Some(10.0);
        let second = store.tick_entity("Stomid", &ctx(at(60))).unwrap();
        assert_eq!(first.alerts.len() + second.alerts.len(), 1);

        // Two ticks 400s apart: two alerts
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Stomid", 10.0);
        let first = store.tick_entity("Stomid", &ctx(at(0))).unwrap();
        store.get_mut("Stomid").unwrap().remaining = Some(10.0);
        let second = store.tick_entity("Stomid", &ctx(at(400))).unwrap();
        assert_eq!(first.alerts.len() + second.alerts.len(), 2);
    }

    #[test]
    fn test_zero_remaining_counting_spawns_immediately() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Stomid", 0.0);

        let outcome = store.tick_entity("Stomid", &ctx(at(0))).unwrap();
        assert_eq!(outcome.alerts, vec![AlertEvent::new("Stomid", 0, at(0))]);
        assert!(outcome.grace_started.is_some());
    }

    #[test]
    fn test_deduped_spawn_stays_counting() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Stomid", 0.0);
        store.get_mut("Stomid").unwrap().fired_alerts.stamp(0, at(0));

        let outcome = store.tick_entity("Stomid", &ctx(at(30))).unwrap();
        assert!(outcome.alerts.is_empty());
        assert_eq!(store.get("Stomid").unwrap().phase, Phase::Counting);

        let outcome = store.tick_entity("Stomid", &ctx(at(330))).unwrap();
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(store.get("Stomid").unwrap().phase, Phase::GracePeriod);
    }

    #[test]
    fn test_remaining_never_negative() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Rotura", 0.2);
        let ctx = TickContext {
            tick_minutes: 1.0,
            ..ctx(at(0))
        };
        store.tick(&registry, &ctx);
        for (_, state) in store.iter() {
            assert!(state.remaining.map_or(true, |r| r >= 0.0));
        }
    }

    #[test]
    fn test_fractional_ticks_still_hit_thresholds() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Rotura", 11.0);
        let ctx = TickContext {
            tick_minutes: 1.0 / 3.0,
            ..ctx(at(0))
        };

        let mut fired = Vec::new();
        // 11 -> 10.67 -> 10.33 -> ~10.0 (fires) -> 9.67
        for _ in 0..4 {
            fired.extend(store.tick(&registry, &ctx).alerts.into_iter().map(|a| a.threshold));
        }
        assert_eq!(fired, vec![10]);
    }

    #[test]
    fn test_uneven_tick_fires_every_threshold() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Hakir", 31.0);

        let mut fired = Vec::new();
        for i in 0..400 {
            let ctx = TickContext {
                tick_minutes: 7.0 / 60.0,
                ..ctx(at(i * 7))
            };
            fired.extend(store.tick(&registry, &ctx).alerts.into_iter().map(|a| a.threshold));
        }

        assert_eq!(fired, vec![30, 20, 10, 0]);
        assert_eq!(store.get("Hakir").unwrap().phase, Phase::GracePeriod);
    }

    #[test]
    fn test_faulty_entity_does_not_stop_others() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Hakir", 5.0);
        {
            let broken = store.get_mut("Rotura").unwrap();
            broken.phase = Phase::Counting;
            broken.remaining = None;
        }
        counting(&mut store, "Stomid", -3.0);
        store.get_mut("Stomid").unwrap().remaining = Some(-3.0);

        let tick = store.tick(&registry, &ctx(at(0)));
        assert!(tick.changed);
        assert_eq!(store.get("Hakir").unwrap().remaining, Some(4.5));
        assert_eq!(store.get("Rotura").unwrap().remaining, None);
        assert_eq!(store.get("Stomid").unwrap().remaining, Some(-3.0));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Hakir", 20.0);
        counting(&mut store, "Rotura", 0.5);
        store.tick(&registry, &ctx(at(0)));

        let snapshot = store.snapshot();
        let restored = TimerStore::from_snapshot(&registry, &snapshot);
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.get("Rotura").unwrap().phase, Phase::GracePeriod);
        assert_eq!(restored.get("Hakir").unwrap().fired_alerts.last_fired(20), Some(at(0)));
    }

    #[test]
    fn test_snapshot_survives_disk_with_uneven_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotStore::new(dir.path().join("boss_data.json"));
        let registry = registry();

        for seconds in [7_i64, 13, 20, 45] {
            let mut store = TimerStore::new(&registry);
            counting(&mut store, "Hakir", 1110.0);
            counting(&mut store, "Stomid", 12.0);

            for i in 0..300 {
                let ctx = TickContext {
                    tick_minutes: seconds as f64 / 60.0,
                    ..ctx(at(i * seconds))
                };
                store.tick(&registry, &ctx);

                let snapshot = store.snapshot();
                files.save(&snapshot).unwrap();
                let loaded = files.load().unwrap();
                assert_eq!(loaded, snapshot, "tick of {}s, pass {}", seconds, i);
                assert_eq!(TimerStore::from_snapshot(&registry, &loaded).snapshot(), snapshot);
            }
        }
    }

    #[test]
    fn test_idle_record_drops_its_countdown() {
        let registry = registry();
        let mut snapshot = Snapshot::default();
        snapshot.entities.insert(
            "Hakir".to_string(),
            EntitySnapshot {
                remaining: Some(42.0),
                phase: Some(Phase::Idle),
                ..EntitySnapshot::default()
            },
        );

        let store = TimerStore::from_snapshot(&registry, &snapshot);
        let hakir = store.get("Hakir").unwrap();
        assert_eq!(hakir.phase, Phase::Idle);
        assert_eq!(hakir.remaining, None);
        assert_eq!(store.status(&registry, at(0)).get("Hakir").unwrap().status.to_string(), "No data");
    }

    #[test]
    fn test_from_snapshot_fills_missing_and_drops_unknown() {
        let registry = registry();
        let mut snapshot = Snapshot::default();
        snapshot.entities.insert(
            "Ghost".to_string(),
            EntitySnapshot {
                remaining: Some(10.0),
                ..EntitySnapshot::default()
            },
        );
        snapshot.entities.insert(
            "Hakir".to_string(),
            EntitySnapshot {
                remaining: Some(-1.0),
                phase: Some(Phase::Counting),
                ..EntitySnapshot::default()
            },
        );

        let store = TimerStore::from_snapshot(&registry, &snapshot);
        assert!(store.get("Ghost").is_none());
        assert_eq!(store.get("Hakir").unwrap(), &TimerState::default());
        assert_eq!(store.get("Rotura").unwrap(), &TimerState::default());
        assert_eq!(store.iter().count(), 3);
    }

    #[test]
    fn test_status_report_in_registry_order() {
        let registry = registry();
        let mut store = TimerStore::new(&registry);
        counting(&mut store, "Hakir", 90.0);
        let report = store.status(&registry, at(0));

        let names: Vec<_> = report.entries.iter().map(|e| e.entity.as_str()).collect();
        assert_eq!(names, vec!["Rotura", "Hakir", "Stomid"]);
        assert_eq!(report.get("Hakir").unwrap().status.to_string(), "01h30m");
    }
}
