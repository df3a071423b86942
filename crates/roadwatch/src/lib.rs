//! `roadwatch` - In-vehicle sensor fusion and alert engine
//!
//! This library ingests readings from edge sensors over HTTP, keeps the
//! latest value of every channel for dashboards, throttles drowsiness alerts
//! and escalates emergencies to an external contact while keeping a
//! best-effort history in `SQLite`.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod alert;
pub mod channels;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod incident;
pub mod ingest;
pub mod logging;
pub mod notify;
pub mod poll;
pub mod radar;
pub mod reading;
pub mod server;
pub mod sidecar;
pub mod storage;

pub use alert::{AlertEngine, AlertPolicy, Severity};
pub use channels::ChannelStore;
pub use config::Config;
pub use engine::{AlertEvent, Engine};
pub use error::{Error, Result};
pub use escalation::{Escalator, Trigger};
pub use incident::{IncidentKind, IncidentRecord};
pub use logging::init_logging;
pub use notify::Notifier;
pub use radar::RadarHistory;
pub use reading::{Channel, SensorReading};
pub use sidecar::{LogEntry, Sidecar};
pub use storage::{Storage, StorageStats};
