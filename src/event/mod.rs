//! The lifecycle event log: wire types and the append-only store.

pub mod log;
pub mod types;

pub use log::{EventLog, RepairReport, RemovedLine};
pub use types::{EventPayload, WuEvent};
