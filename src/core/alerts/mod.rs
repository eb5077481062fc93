// Alert system module for respawn threshold notifications.
//
// Architecture:
// - model.rs: Alert event and channel types
// - triggers.rs: Threshold policy (which remaining-minute values alert)
// - ledger.rs: Per-entity dedup ledger of fired thresholds
// - dispatcher.rs: Message rendering and best-effort channel fan-out

pub mod dispatcher;
pub mod ledger;
pub mod model;
pub mod triggers;
