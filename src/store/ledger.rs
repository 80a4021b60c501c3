// src/store/ledger.rs

//! Notification ledger: append-only delivery log backing cooldown and
//! daily-limit enforcement. No row is ever mutated.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::models::{LedgerEntry, NotificationKind};

use super::items::parse_time;
use super::Store;

impl Store {
    /// Append one delivery (or skip) record.
    pub async fn append_ledger(&self, entry: LedgerEntry) -> Result<()> {
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO notification_history (item_id, recipient_id, sent_at, kind) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        entry.item_id,
                        entry.recipient_id,
                        entry.sent_at.to_rfc3339(),
                        entry.kind.as_str(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Timestamp of the most recent delivery for an `(item, recipient)`
    /// pair, skip records excluded. Drives the cooldown check.
    pub async fn last_delivery(
        &self,
        item_id: i64,
        recipient_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let recipient_id = recipient_id.to_string();
        let sent_at = self
            .conn()
            .call(move |conn| {
                let sent: Option<String> = conn
                    .query_row(
                        "SELECT sent_at FROM notification_history \
                         WHERE item_id = ?1 AND recipient_id = ?2 AND kind != 'skipped_stale' \
                         ORDER BY sent_at DESC LIMIT 1",
                        params![item_id, recipient_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(sent)
            })
            .await?;
        Ok(sent_at.as_deref().and_then(parse_time))
    }

    /// Successful deliveries to a recipient inside the trailing 24 h.
    pub async fn deliveries_in_window(
        &self,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let recipient_id = recipient_id.to_string();
        let since = now - Duration::hours(24);
        let count = self
            .conn()
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM notification_history \
                     WHERE recipient_id = ?1 AND sent_at >= ?2 AND kind != 'skipped_stale'",
                    params![recipient_id, since.to_rfc3339()],
                    |row| row.get(0),
                )?;
                Ok(n as u32)
            })
            .await?;
        Ok(count)
    }

    /// Full ledger for an item, oldest first. Diagnostics only.
    pub async fn ledger_for_item(&self, item_id: i64) -> Result<Vec<LedgerEntry>> {
        let entries = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT item_id, recipient_id, sent_at, kind FROM notification_history \
                     WHERE item_id = ?1 ORDER BY sent_at ASC, id ASC",
                )?;
                let entries = stmt
                    .query_map(params![item_id], |row| {
                        let sent_at: String = row.get(2)?;
                        let kind: String = row.get(3)?;
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, sent_at, kind))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|(item_id, recipient_id, sent_at, kind)| {
                Some(LedgerEntry {
                    item_id,
                    recipient_id,
                    sent_at: parse_time(&sent_at)?,
                    kind: NotificationKind::parse(&kind)?,
                })
            })
            .collect())
    }

    /// Delete ledger rows older than `before`. Bounded retention; the
    /// cooldown window is far shorter than any sane cutoff.
    pub async fn prune_ledger(&self, before: DateTime<Utc>) -> Result<usize> {
        let deleted = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM notification_history WHERE sent_at < ?1",
                    params![before.to_rfc3339()],
                )?;
                Ok(n)
            })
            .await?;
        Ok(deleted)
    }
}
