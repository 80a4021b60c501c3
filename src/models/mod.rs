// src/models/mod.rs

//! Data structures shared across the monitor.

pub mod check;
pub mod config;
pub mod event;
pub mod item;
pub mod user;

pub use check::{CheckRecord, DetectorRecord, DetectorResult, Verdict};
pub use config::{
    CatalogConfig, Config, DetectorConfig, DetectorWeights, FetcherConfig, LoggingConfig,
    NotifierConfig, SchedulerConfig, StorageConfig,
};
pub use event::{LedgerEntry, NotificationKind, PendingEvent};
pub use item::{Item, ItemStatus, NewItem};
pub use user::{QuietHours, User, UserPrefs};
