use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};

use super::alerts::dispatcher::{AlertDispatcher, ChannelSender};
use super::alerts::model::AlertEvent;
use super::config::Settings;
use super::error::{EngineError, EngineResult, SnapshotError};
use super::model::{EntityName, EntityRegistry, Phase};
use super::parser::parse_time_input;
use super::snapshot::{Snapshot, SnapshotStore};
use super::state::{StoreTick, TickContext, TimerStore};
use super::status::StatusReport;

/// Overrides at or below this many minutes get an immediate extra tick
const NEAR_TERM_MINUTES: f64 = 60.0;

/// Structured result of a state-mutating command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub report: StatusReport,
    /// Alerts raised by the extra tick of a near-term override
    pub alerts: Vec<AlertEvent>,
}

struct GraceTask {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct Coordinator {
    settings: Settings,
    registry: EntityRegistry,
    store: Mutex<TimerStore>,
    snapshots: SnapshotStore,
    dispatcher: Arc<AlertDispatcher>,
    grace_tasks: Mutex<HashMap<EntityName, GraceTask>>,
}

impl Coordinator {
    /// Build the engine, restoring state from the snapshot when one is usable.
    pub fn new(settings: Settings, sender: Arc<dyn ChannelSender>) -> EngineResult<Self> {
        settings.validate()?;
        let registry = EntityRegistry::new(settings.entities.clone())?;
        let snapshots = SnapshotStore::new(settings.snapshot_path.clone());
        let store = load_store(&registry, &snapshots);
        let dispatcher = Arc::new(AlertDispatcher::new(sender, settings.channels.clone()));

        Ok(Self {
            settings,
            registry,
            store: Mutex::new(store),
            snapshots,
            dispatcher,
            grace_tasks: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.lock().snapshot()
    }

    pub fn status(&self) -> StatusReport {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> StatusReport {
        self.store.lock().status(&self.registry, now)
    }

    pub async fn report_death(self: &Arc<Self>, entity: &str) -> EngineResult<CommandOutcome> {
        self.report_death_at(entity, Utc::now()).await
    }

    pub async fn report_death_at(
        self: &Arc<Self>,
        entity: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<CommandOutcome> {
        let minutes = self.registry.respawn_minutes(entity)?;
        let outcome = self.apply_manual(entity, minutes, now, false)?;
        info!("{} reported dead, countdown set to {} minutes", entity, minutes);

        self.announce(&outcome);
        Ok(outcome)
    }

    pub async fn override_timer(
        self: &Arc<Self>,
        entity: &str,
        input: &str,
    ) -> EngineResult<CommandOutcome> {
        self.override_timer_at(entity, input, Utc::now()).await
    }

    pub async fn override_timer_at(
        self: &Arc<Self>,
        entity: &str,
        input: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<CommandOutcome> {
        self.registry.lookup(entity)?;
        let minutes = parse_time_input(input)?;
        let outcome = self.apply_manual(entity, minutes, now, minutes <= NEAR_TERM_MINUTES)?;
        info!("{} countdown overridden to {} minutes", entity, minutes);

        self.announce(&outcome);
        Ok(outcome)
    }

    /// One tick pass over every entity at `now`. Alerts are returned, not sent.
    pub fn tick_at(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let ctx = self.tick_context(now);
        let StoreTick {
            alerts,
            graces,
            changed,
        } = {
            let mut store = self.store.lock();
            let tick = store.tick(&self.registry, &ctx);
            if tick.changed {
                self.persist(&store);
            }
            tick
        };

        if changed {
            debug!("Tick at {} raised {} alert(s)", now, alerts.len());
        }
        for alert in &alerts {
            info!("Alert: {} at {} minutes", alert.entity, alert.threshold);
        }
        for (entity, generation) in graces {
            info!(
                "{} spawned, waiting {:?} before restarting its countdown",
                entity,
                self.settings.grace_period()
            );
            self.schedule_grace(entity, generation, self.settings.grace_period());
        }

        alerts
    }

    /// Reschedule grace completions for entities restored mid-grace.
    pub fn resume_grace_periods(self: &Arc<Self>, now: DateTime<Utc>) {
        let grace = self.settings.grace_period();
        let pending: Vec<(EntityName, u64, Duration)> = {
            let store = self.store.lock();
            store
                .iter()
                .filter(|(_, state)| state.phase == Phase::GracePeriod)
                .filter_map(|(entity, state)| {
                    let spawned = state.last_spawn_at?;
                    let elapsed = now
                        .signed_duration_since(spawned)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    Some((entity.clone(), state.generation, grace.saturating_sub(elapsed)))
                })
                .collect()
        };

        for (entity, generation, delay) in pending {
            info!("Resuming grace period for {} ({:?} left)", entity, delay);
            self.schedule_grace(entity, generation, delay);
        }
    }

    /// Drive ticks and status broadcasts until `shutdown` resolves, then stop
    /// pending grace completions and write a final snapshot.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.resume_grace_periods(Utc::now());

        let mut ticker = time::interval(self.settings.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_ticker = self.settings.status_interval().map(|period| {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        info!(
            "Tracking {} entities, ticking every {:?}",
            self.registry.len(),
            self.settings.tick_interval()
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let alerts = self.tick_at(Utc::now());
                    if !alerts.is_empty() {
                        // Sends never hold up the next tick
                        let dispatcher = Arc::clone(&self.dispatcher);
                        tokio::spawn(async move {
                            dispatcher.dispatch_all(&alerts).await;
                        });
                    }
                }
                _ = next_tick(&mut status_ticker) => {
                    info!("Sending periodic status update");
                    let report = self.status();
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        dispatcher.broadcast_status(&report).await;
                    });
                }
            }
        }

        self.shutdown();
    }

    /// Abort pending grace completions and force a final snapshot.
    pub fn shutdown(&self) {
        let tasks: Vec<GraceTask> = self.grace_tasks.lock().drain().map(|(_, task)| task).collect();
        for task in &tasks {
            task.handle.abort();
        }

        let store = self.store.lock();
        self.persist(&store);
        info!(
            "Shut down: {} grace task(s) cancelled, snapshot saved to {:?}",
            tasks.len(),
            self.snapshots.path()
        );
    }

    /// Send a command's alerts and status in the background; the caller gets
    /// its outcome without waiting on any channel.
    fn announce(&self, outcome: &CommandOutcome) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let alerts = outcome.alerts.clone();
        let report = outcome.report.clone();
        tokio::spawn(async move {
            dispatcher.dispatch_with_status(&alerts, &report).await;
        });
    }

    fn tick_context(&self, now: DateTime<Utc>) -> TickContext {
        TickContext {
            policy: self.settings.alert_policy,
            tick_minutes: self.settings.tick_minutes(),
            dedup_window: self.settings.dedup_window(),
            now,
        }
    }

    /// Shared update behind `report_death` and `override_timer`.
    fn apply_manual(
        self: &Arc<Self>,
        entity: &str,
        minutes: f64,
        now: DateTime<Utc>,
        extra_tick: bool,
    ) -> EngineResult<CommandOutcome> {
        self.cancel_grace(entity);
        let ctx = self.tick_context(now);

        let (report, alerts, grace) = {
            let mut store = self.store.lock();
            let state = store
                .get_mut(entity)
                .ok_or_else(|| EngineError::NotFound(entity.to_string()))?;
            state.arm(minutes);

            let (alerts, grace) = if extra_tick {
                match store.tick_entity(entity, &ctx) {
                    Ok(outcome) => (outcome.alerts, outcome.grace_started),
                    Err(err) => {
                        warn!("Extra tick for {} failed: {}", entity, err);
                        (Vec::new(), None)
                    }
                }
            } else {
                (Vec::new(), None)
            };

            self.persist(&store);
            (store.status(&self.registry, now), alerts, grace)
        };

        if let Some(generation) = grace {
            self.schedule_grace(entity.to_string(), generation, self.settings.grace_period());
        }

        Ok(CommandOutcome { report, alerts })
    }

    fn schedule_grace(self: &Arc<Self>, entity: EntityName, generation: u64, delay: Duration) {
        let mut tasks = self.grace_tasks.lock();
        if let Some(existing) = tasks.get(&entity) {
            if existing.generation > generation {
                debug!("Ignoring stale grace schedule for {}", entity);
                return;
            }
        }

        let engine = Arc::clone(self);
        let name = entity.clone();
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            engine.complete_grace(&name, generation);
            let mut tasks = engine.grace_tasks.lock();
            if tasks.get(&name).is_some_and(|task| task.generation == generation) {
                tasks.remove(&name);
            }
        });

        if let Some(previous) = tasks.insert(entity, GraceTask { generation, handle }) {
            previous.handle.abort();
        }
    }

    fn cancel_grace(&self, entity: &str) {
        if let Some(task) = self.grace_tasks.lock().remove(entity) {
            debug!("Cancelling pending grace completion for {}", entity);
            task.handle.abort();
        }
    }

    fn complete_grace(&self, entity: &str, generation: u64) {
        let Ok(minutes) = self.registry.respawn_minutes(entity) else {
            return;
        };

        let mut store = self.store.lock();
        let Some(state) = store.get_mut(entity) else {
            return;
        };
        if state.generation != generation || state.phase != Phase::GracePeriod {
            debug!("Grace completion for {} superseded, skipping", entity);
            return;
        }

        state.rearm_after_grace(minutes);
        info!("{} countdown restarted at {} minutes", entity, minutes);
        self.persist(&store);
    }

    /// Save while the caller holds the store lock so files land in mutation order.
    fn persist(&self, store: &TimerStore) {
        if let Err(err) = self.snapshots.save(&store.snapshot()) {
            error!("{}", EngineError::Persistence(err));
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn load_store(registry: &EntityRegistry, snapshots: &SnapshotStore) -> TimerStore {
    match snapshots.load() {
        Ok(snapshot) => {
            info!("Restored timers from {:?}", snapshots.path());
            TimerStore::from_snapshot(registry, &snapshot)
        }
        Err(SnapshotError::NotFound(path)) => {
            info!("No snapshot at {:?}, starting with empty timers", path);
            TimerStore::new(registry)
        }
        Err(err) => {
            warn!("{}; starting with empty timers", err);
            TimerStore::new(registry)
        }
    }
}
