// src/store/mod.rs

//! SQLite-backed persistent state.
//!
//! The store exclusively owns all persisted rows; other components read
//! through typed accessors and mutate through named operations. One async
//! connection serializes writes while the call queue permits interleaved
//! reads.

mod history;
mod items;
mod ledger;
mod migrations;
mod users;

use std::path::Path;

use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};

pub use history::DailyStats;
pub use items::ItemFilter;

/// Handle to the single logical store.
///
/// Cheap to clone; clones share the underlying connection.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file and apply pending migrations.
    ///
    /// Refuses to start when the file was written by a newer schema than
    /// this binary knows about.
    pub async fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .await
            .map_err(|e| AppError::store(format!("open {}: {e}", path.display())))?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    /// In-memory store for tests and one-shot diagnostics.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| AppError::store(format!("open in-memory: {e}")))?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;
                Ok(())
            })
            .await?;
        migrations::apply(&self.conn).await
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}
