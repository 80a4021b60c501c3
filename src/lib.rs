//! stockwatch Library
//!
//! A multi-signal stock monitor for VPS sale pages.
//!
//! # Architecture
//!
//! - `models`: Data structures (Config, Item, CheckRecord, User, events)
//! - `store`: SQLite persistence with numbered migrations
//! - `catalog`: Admission-time checks (canonical URLs, quotas, vendor tags)
//! - `fetch`: HTTP fetching with anti-bot workarounds and optional rendering
//! - `detect`: Stock detectors and the fusion layer
//! - `scheduler`: Due-item polling under concurrency and host limits
//! - `notify`: Transition events, aggregation and delivery
//! - `service`: Bot-facing programmatic surface
//! - `utils`: Shared utilities (text cleaning, URL helpers)
//! - `error`: Unified error handling

pub mod catalog;
pub mod config;
pub mod detect;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod utils;

// Re-export commonly used items
pub use error::{AppError, Result};
