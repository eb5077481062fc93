// Dedup ledger - the last time each threshold fired for one entity.
//
// Entries are never expired lazily. A stale entry simply stops blocking
// once it is older than the dedup window, and the whole ledger is cleared
// when the countdown is re-armed.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertLedger {
    fired: BTreeMap<u32, DateTime<Utc>>,
}

impl AlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `threshold` has never fired or last fired more than `window` before `now`.
    pub fn should_fire(&self, threshold: u32, now: DateTime<Utc>, window: Duration) -> bool {
        match self.fired.get(&threshold) {
            None => true,
            // A timestamp in the future (clock stepped back) keeps blocking
            Some(last) => now
                .signed_duration_since(*last)
                .to_std()
                .map(|elapsed| elapsed > window)
                .unwrap_or(false),
        }
    }

    pub fn stamp(&mut self, threshold: u32, now: DateTime<Utc>) {
        self.fired.insert(threshold, now);
    }

    /// Check and stamp in one step. Returns whether the alert should be emitted.
    pub fn try_fire(&mut self, threshold: u32, now: DateTime<Utc>, window: Duration) -> bool {
        if self.should_fire(threshold, now, window) {
            self.stamp(threshold, now);
            true
        } else {
            false
        }
    }

    pub fn last_fired(&self, threshold: u32) -> Option<DateTime<Utc>> {
        self.fired.get(&threshold).copied()
    }

    pub fn clear(&mut self) {
        self.fired.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, DateTime<Utc>)> + '_ {
        self.fired.iter().map(|(threshold, at)| (*threshold, *at))
    }
}
