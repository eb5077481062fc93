//! Durable snapshot of every entity's countdown.
//!
//! The snapshot is one JSON object keyed by entity name. Saves go through a
//! temp file in the target directory followed by a rename, so a crash
//! mid-write leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::alerts::ledger::AlertLedger;
use super::error::SnapshotError;
use super::model::{EntityName, Phase, TimerState};

/// One persisted record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub remaining: Option<f64>,
    pub last_spawn_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fired_alerts: AlertLedger,
    /// Absent in older files; see `resolved_phase`
    #[serde(default)]
    pub phase: Option<Phase>,
}

impl EntitySnapshot {
    /// Stored phase, or the one implied by the other fields.
    pub fn resolved_phase(&self) -> Phase {
        if let Some(phase) = self.phase {
            return phase;
        }
        match (self.remaining, self.last_spawn_at) {
            (None, _) => Phase::Idle,
            (Some(remaining), Some(_)) if remaining <= 0.0 => Phase::GracePeriod,
            (Some(_), _) => Phase::Counting,
        }
    }
}

impl From<&TimerState> for EntitySnapshot {
    fn from(state: &TimerState) -> Self {
        Self {
            remaining: state.remaining,
            last_spawn_at: state.last_spawn_at,
            fired_alerts: state.fired_alerts.clone(),
            phase: Some(state.phase),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub entities: BTreeMap<EntityName, EntitySnapshot>,
}

impl Snapshot {
    pub fn get(&self, entity: &str) -> Option<&EntitySnapshot> {
        self.entities.get(entity)
    }
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Snapshot, SnapshotError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound(self.path.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let content = serde_json::to_vec_pretty(snapshot)?;
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&content)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_snapshot() -> Snapshot {
        let spawned = Utc.with_ymd_and_hms(2026, 3, 1, 18, 45, 12).unwrap();
        let mut ledger = AlertLedger::new();
        ledger.stamp(30, spawned);
        ledger.stamp(0, spawned);

        let mut entities = BTreeMap::new();
        entities.insert(
            "Rotura".to_string(),
            EntitySnapshot {
                remaining: Some(0.0),
                last_spawn_at: Some(spawned),
                fired_alerts: ledger,
                phase: Some(Phase::GracePeriod),
            },
        );
        entities.insert(
            "Hakir".to_string(),
            EntitySnapshot {
                remaining: Some(89.5),
                last_spawn_at: None,
                fired_alerts: AlertLedger::new(),
                phase: Some(Phase::Counting),
            },
        );
        entities.insert(
            "Stomid".to_string(),
            EntitySnapshot {
                phase: Some(Phase::Idle),
                ..EntitySnapshot::default()
            },
        );
        Snapshot { entities }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("boss_data.json"));
        let snapshot = sample_snapshot();

        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), snapshot);
    }

    #[test]
    fn test_save_overwrites_without_leftovers() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("boss_data.json"));

        store.save(&Snapshot::default()).unwrap();
        store.save(&sample_snapshot()).unwrap();

        assert_eq!(store.load().unwrap(), sample_snapshot());
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1, "temp file should have been renamed away");
    }

    #[test]
    fn test_save_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state/nested/boss_data.json"));
        store.save(&sample_snapshot()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.load(), Err(SnapshotError::NotFound(_))));
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boss_data.json");
        fs::write(&path, "{ \"Rotura\": { \"remaining\": ").unwrap();
        let store = SnapshotStore::new(path);
        assert!(matches!(store.load(), Err(SnapshotError::Corrupt(_))));
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(sample_snapshot()).unwrap();
        let rotura = &json["Rotura"];
        assert_eq!(rotura["remaining"], 0.0);
        assert!(rotura["lastSpawnAt"].as_str().unwrap().starts_with("2026-03-01T18:45:12"));
        assert!(rotura["firedAlerts"]["30"].is_string());
        assert_eq!(json["Stomid"]["remaining"], serde_json::Value::Null);
        assert_eq!(json["Stomid"]["lastSpawnAt"], serde_json::Value::Null);
    }

    #[test]
    fn test_phase_derived_when_missing() {
        let json = r#"{
            "A": {"remaining": null, "lastSpawnAt": null, "firedAlerts": {}},
            "B": {"remaining": 42.0, "lastSpawnAt": null, "firedAlerts": {}},
            "C": {"remaining": 0, "lastSpawnAt": "2026-03-01T18:45:12Z", "firedAlerts": {"0": "2026-03-01T18:45:12Z"}}
        }"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.get("A").unwrap().resolved_phase(), Phase::Idle);
        assert_eq!(snapshot.get("B").unwrap().resolved_phase(), Phase::Counting);
        assert_eq!(snapshot.get("C").unwrap().resolved_phase(), Phase::GracePeriod);
    }
}
