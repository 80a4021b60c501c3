// src/store/items.rs

//! Item operations: admission, due-set selection, lifecycle.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::{AppError, Result};
use crate::models::{Item, ItemStatus, NewItem};

use super::Store;

/// Filter for the admin listing.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub owner_id: Option<String>,
    pub enabled_only: bool,
    pub vendor_tag: Option<String>,
}

/// Outcome of an admission attempt, resolved inside one store call.
enum InsertOutcome {
    Inserted(i64),
    DuplicateUrl(String),
    QuotaExceeded { resets_at: DateTime<Utc> },
}

impl Store {
    /// Insert a new item, enforcing the owner's daily-add quota and URL
    /// uniqueness in a single transaction.
    ///
    /// The URL must already be canonical; the catalog guarantees that.
    pub async fn insert_item(&self, new: NewItem, daily_add_limit: u32) -> Result<i64> {
        let now = Utc::now();
        let owner_id = new.owner_id.clone();
        let outcome = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT item_id FROM items WHERE url = ?1",
                        params![new.url],
                        |row| row.get(0),
                    )
                    .optional()?;
                if existing.is_some() {
                    return Ok(InsertOutcome::DuplicateUrl(new.url));
                }

                // System/global additions bypass the quota.
                if !new.is_global {
                    let window: Option<(u32, Option<String>)> = tx
                        .query_row(
                            "SELECT daily_added_count, daily_window_start FROM users WHERE user_id = ?1",
                            params![new.owner_id],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?;

                    if let Some((count, start)) = window {
                        let start = start.and_then(|s| parse_time(&s));
                        let expired = match start {
                            Some(s) => now - s >= Duration::hours(24),
                            None => true,
                        };
                        if !expired && count >= daily_add_limit {
                            let resets_at = start.map(|s| s + Duration::hours(24)).unwrap_or(now);
                            return Ok(InsertOutcome::QuotaExceeded { resets_at });
                        }
                        if expired {
                            tx.execute(
                                "UPDATE users SET daily_added_count = 1, daily_window_start = ?2 \
                                 WHERE user_id = ?1",
                                params![new.owner_id, now.to_rfc3339()],
                            )?;
                        } else {
                            tx.execute(
                                "UPDATE users SET daily_added_count = daily_added_count + 1 \
                                 WHERE user_id = ?1",
                                params![new.owner_id],
                            )?;
                        }
                    }
                }

                tx.execute(
                    "INSERT INTO items (owner_id, is_global, name, url, vendor_tag, config_text, \
                                        enabled, created_at, last_status) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, 'unknown')",
                    params![
                        new.owner_id,
                        new.is_global as i64,
                        new.name,
                        new.url,
                        new.vendor_tag,
                        new.config_text,
                        now.to_rfc3339(),
                    ],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(InsertOutcome::Inserted(id))
            })
            .await?;

        match outcome {
            InsertOutcome::Inserted(id) => Ok(id),
            InsertOutcome::DuplicateUrl(url) => Err(AppError::DuplicateUrl(url)),
            InsertOutcome::QuotaExceeded { resets_at } => Err(AppError::QuotaExceeded {
                user_id: owner_id,
                resets_at: resets_at.to_rfc3339(),
            }),
        }
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Option<Item>> {
        let item = self
            .conn()
            .call(move |conn| {
                let item = conn
                    .query_row(
                        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE item_id = ?1"),
                        params![item_id],
                        item_from_row,
                    )
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    pub async fn get_item_by_url(&self, url: &str) -> Result<Option<Item>> {
        let url = url.to_string();
        let item = self
            .conn()
            .call(move |conn| {
                let item = conn
                    .query_row(
                        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE url = ?1"),
                        params![url],
                        item_from_row,
                    )
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    /// Enabled items due for a poll: `now − last_checked_at ≥ min_interval`,
    /// oldest first, never-checked items leading, ties broken by id.
    pub async fn list_due_items(
        &self,
        now: DateTime<Utc>,
        min_interval: std::time::Duration,
    ) -> Result<Vec<Item>> {
        let cutoff = now - Duration::seconds(min_interval.as_secs() as i64);
        let items = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items \
                     WHERE enabled = 1 AND (last_checked_at IS NULL OR last_checked_at <= ?1) \
                     ORDER BY last_checked_at ASC NULLS FIRST, item_id ASC"
                ))?;
                let items = stmt
                    .query_map(params![cutoff.to_rfc3339()], item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// Items visible to one user: their own plus global entries.
    pub async fn list_items_for_user(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Item>> {
        let user_id = user_id.to_string();
        let offset = page as i64 * page_size as i64;
        let items = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items \
                     WHERE owner_id = ?1 OR is_global = 1 \
                     ORDER BY item_id ASC LIMIT ?2 OFFSET ?3"
                ))?;
                let items = stmt
                    .query_map(params![user_id, page_size as i64, offset], item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// Admin listing with optional filters.
    pub async fn list_items(&self, filter: ItemFilter) -> Result<Vec<Item>> {
        let items = self
            .conn()
            .call(move |conn| {
                let mut sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE 1=1");
                let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(owner) = &filter.owner_id {
                    sql.push_str(&format!(" AND owner_id = ?{}", args.len() + 1));
                    args.push(Box::new(owner.clone()));
                }
                if filter.enabled_only {
                    sql.push_str(" AND enabled = 1");
                }
                if let Some(tag) = &filter.vendor_tag {
                    sql.push_str(&format!(" AND vendor_tag = ?{}", args.len() + 1));
                    args.push(Box::new(tag.clone()));
                }
                sql.push_str(" ORDER BY item_id ASC");
                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
                let items = stmt
                    .query_map(params.as_slice(), item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// Delete an item; history and pending ledger rows cascade.
    pub async fn delete_item(&self, item_id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM notification_history WHERE item_id = ?1",
                    params![item_id],
                )?;
                let n = tx.execute("DELETE FROM items WHERE item_id = ?1", params![item_id])?;
                tx.commit()?;
                Ok(n > 0)
            })
            .await?;
        Ok(deleted)
    }

    /// Freeze or resume scheduling; history is preserved either way.
    pub async fn set_item_enabled(&self, item_id: i64, enabled: bool) -> Result<bool> {
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE items SET enabled = ?2 WHERE item_id = ?1",
                    params![item_id, enabled as i64],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    /// Memoise the discovered API endpoint for the probe detector.
    pub async fn set_item_api_endpoint(&self, item_id: i64, endpoint: Option<String>) -> Result<()> {
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE items SET api_endpoint = ?2 WHERE item_id = ?1",
                    params![item_id, endpoint],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

const ITEM_COLUMNS: &str = "item_id, owner_id, is_global, name, url, vendor_tag, config_text, \
                            enabled, created_at, last_checked_at, last_status, last_confidence, \
                            consecutive_error_count, fingerprint_hash, api_endpoint";

pub(crate) fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let created_at: String = row.get(8)?;
    let last_checked_at: Option<String> = row.get(9)?;
    let status: String = row.get(10)?;
    Ok(Item {
        item_id: row.get(0)?,
        owner_id: row.get(1)?,
        is_global: row.get::<_, i64>(2)? != 0,
        name: row.get(3)?,
        url: row.get(4)?,
        vendor_tag: row.get(5)?,
        config_text: row.get(6)?,
        enabled: row.get::<_, i64>(7)? != 0,
        created_at: parse_time(&created_at).unwrap_or_else(Utc::now),
        last_checked_at: last_checked_at.as_deref().and_then(parse_time),
        last_status: ItemStatus::parse(&status),
        last_confidence: row.get(11)?,
        consecutive_error_count: row.get::<_, i64>(12)? as u32,
        fingerprint_hash: row.get(13)?,
        api_endpoint: row.get(14)?,
    })
}

pub(crate) fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
