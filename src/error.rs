// src/error.rs

//! Unified error handling for the stock monitor.

use std::fmt;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// SQLite engine error
    #[error("Store error: {0}")]
    Store(String),

    /// Schema migration failed or is missing
    #[error("Migration error: {0}")]
    Migration(String),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Canonical URL already present in the catalog
    #[error("Duplicate URL: {0}")]
    DuplicateUrl(String),

    /// Daily add quota reached for the owner
    #[error("Quota exceeded for user {user_id}, resets at {resets_at}")]
    QuotaExceeded { user_id: String, resets_at: String },

    /// Caller is banned
    #[error("User {0} is banned")]
    Banned(String),

    /// Caller lacks administrator rights
    #[error("User {0} is not an administrator")]
    NotAdmin(String),

    /// Item lookup failed
    #[error("Item not found: {0}")]
    NotFound(i64),

    /// Caller does not own the item
    #[error("User {user_id} does not own item {item_id}")]
    NotOwner { user_id: String, item_id: i64 },

    /// Delivery sink failed after retries
    #[error("Delivery failed for recipient {recipient}: {message}")]
    Delivery { recipient: String, message: String },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a store engine error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a migration error.
    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration(message.into())
    }

    /// Create a delivery error with recipient context.
    pub fn delivery(recipient: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Delivery {
            recipient: recipient.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error should terminate the process (exit code 2).
    pub fn is_migration_failure(&self) -> bool {
        matches!(self, Self::Migration(_))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<tokio_rusqlite::Error> for AppError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}
