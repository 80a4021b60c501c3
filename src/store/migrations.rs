// src/store/migrations.rs

//! Numbered schema migrations, applied in order on startup.
//!
//! `PRAGMA user_version` tracks how many migrations have run. A database
//! ahead of this binary refuses to open so a rollback cannot corrupt rows.

use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};

/// Ordered migration scripts. Append only; never edit a shipped entry.
const MIGRATIONS: &[&str] = &[
    // 1: initial schema
    r#"
    CREATE TABLE items (
        item_id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        is_global INTEGER NOT NULL DEFAULT 0,
        name TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        vendor_tag TEXT,
        config_text TEXT NOT NULL DEFAULT '',
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        last_checked_at TEXT,
        last_status TEXT NOT NULL DEFAULT 'unknown',
        last_confidence REAL NOT NULL DEFAULT 0,
        consecutive_error_count INTEGER NOT NULL DEFAULT 0,
        fingerprint_hash TEXT
    );
    CREATE INDEX idx_items_enabled ON items(enabled);
    CREATE INDEX idx_items_owner ON items(owner_id);

    CREATE TABLE check_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id INTEGER NOT NULL REFERENCES items(item_id) ON DELETE CASCADE,
        check_time TEXT NOT NULL,
        status TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 0,
        detectors TEXT NOT NULL DEFAULT '[]',
        http_status INTEGER,
        latency_ms INTEGER NOT NULL DEFAULT 0,
        error_kind TEXT,
        error_message TEXT,
        fingerprint_hash TEXT
    );
    CREATE INDEX idx_check_history_item ON check_history(item_id, check_time);
    CREATE INDEX idx_check_history_time ON check_history(check_time);

    CREATE TABLE users (
        user_id TEXT PRIMARY KEY,
        is_admin INTEGER NOT NULL DEFAULT 0,
        is_banned INTEGER NOT NULL DEFAULT 0,
        daily_added_count INTEGER NOT NULL DEFAULT 0,
        daily_window_start TEXT,
        cooldown_seconds INTEGER NOT NULL,
        daily_notify_limit INTEGER NOT NULL,
        quiet_start INTEGER,
        quiet_end INTEGER,
        notifications_enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    );

    CREATE TABLE notification_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id INTEGER NOT NULL,
        recipient_id TEXT NOT NULL,
        sent_at TEXT NOT NULL,
        kind TEXT NOT NULL
    );
    CREATE INDEX idx_notification_pair ON notification_history(item_id, recipient_id, sent_at);
    CREATE INDEX idx_notification_recipient ON notification_history(recipient_id, sent_at);
    "#,
    // 2: memoised API endpoint for the probe detector
    r#"
    ALTER TABLE items ADD COLUMN api_endpoint TEXT;
    "#,
];

/// Apply all pending migrations.
pub async fn apply(conn: &Connection) -> Result<()> {
    let version: i64 = conn
        .call(|conn| {
            let v: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
            Ok(v)
        })
        .await
        .map_err(|e| AppError::migration(format!("reading schema version: {e}")))?;

    let known = MIGRATIONS.len() as i64;
    if version > known {
        return Err(AppError::migration(format!(
            "database schema version {version} is newer than this binary ({known}); \
             refusing to start"
        )));
    }

    for (idx, script) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        let number = idx + 1;
        let script = script.to_string();
        conn.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(&script)?;
            tx.pragma_update(None, "user_version", number as i64)?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::migration(format!("migration {number} failed: {e}")))?;
        tracing::info!(migration = number, "applied schema migration");
    }

    Ok(())
}
