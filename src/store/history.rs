// src/store/history.rs

//! Check history: atomic recording, time-bounded queries, pruning.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use crate::error::Result;
use crate::models::{CheckRecord, ItemStatus};

use super::items::parse_time;
use super::Store;

/// Per-day aggregate used by the diagnostics surface.
#[derive(Debug, Clone, Serialize)]
pub struct DailyStats {
    pub date: String,
    pub checks: u64,
    pub errors: u64,
}

impl Store {
    /// Record one poll result: append to history, stamp `last_checked_at`,
    /// maintain the error streak and optionally apply a stored-status
    /// change, all in one transaction.
    ///
    /// The record carries the *observed* verdict; `apply_status` is what
    /// the transition evaluator decided after hysteresis, which may lag
    /// the observation. Returns the consecutive error count after the
    /// update so the scheduler can apply the auto-disable threshold
    /// without a second read.
    pub async fn record_check(
        &self,
        record: CheckRecord,
        apply_status: Option<(ItemStatus, f64)>,
    ) -> Result<u32> {
        let detectors = serde_json::to_string(&record.detectors)?;
        let count = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;

                tx.execute(
                    "INSERT INTO check_history (item_id, check_time, status, confidence, detectors, \
                                                http_status, latency_ms, error_kind, error_message, \
                                                fingerprint_hash) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.item_id,
                        record.check_time.to_rfc3339(),
                        record.status.as_str(),
                        record.confidence,
                        detectors,
                        record.http_status.map(|s| s as i64),
                        record.latency_ms as i64,
                        record.error_kind,
                        record.error_message,
                        record.fingerprint_hash,
                    ],
                )?;

                // Streak: errors extend it, blocked polls freeze it, real
                // verdicts (and plain inconclusives) clear it.
                let streak_sql = if record.status == ItemStatus::Error {
                    "consecutive_error_count + 1"
                } else if record.error_kind.is_some() {
                    "consecutive_error_count"
                } else {
                    "0"
                };
                tx.execute(
                    &format!(
                        "UPDATE items SET last_checked_at = ?2, \
                                          consecutive_error_count = {streak_sql}, \
                                          fingerprint_hash = COALESCE(?3, fingerprint_hash) \
                         WHERE item_id = ?1"
                    ),
                    params![
                        record.item_id,
                        record.check_time.to_rfc3339(),
                        record.fingerprint_hash,
                    ],
                )?;

                if let Some((status, confidence)) = apply_status {
                    tx.execute(
                        "UPDATE items SET last_status = ?2, last_confidence = ?3 \
                         WHERE item_id = ?1",
                        params![record.item_id, status.as_str(), confidence],
                    )?;
                }

                let count: i64 = tx.query_row(
                    "SELECT consecutive_error_count FROM items WHERE item_id = ?1",
                    params![record.item_id],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Ok(count as u32)
            })
            .await?;
        Ok(count)
    }

    /// Last `limit` records for an item, newest first.
    pub async fn recent_history(&self, item_id: i64, limit: u32) -> Result<Vec<CheckRecord>> {
        let records = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT item_id, check_time, status, confidence, detectors, http_status, \
                            latency_ms, error_kind, error_message, fingerprint_hash \
                     FROM check_history WHERE item_id = ?1 \
                     ORDER BY check_time DESC, id DESC LIMIT ?2",
                )?;
                let records = stmt
                    .query_map(params![item_id, limit as i64], check_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// Delete history older than `before`, keeping the newest
    /// `keep_per_item` records of every item regardless of age.
    ///
    /// At most `batch` rows go per call so the write lock stays short;
    /// callers loop until the return value is zero.
    pub async fn prune_history(
        &self,
        before: DateTime<Utc>,
        keep_per_item: u32,
        batch: u32,
    ) -> Result<usize> {
        let deleted = self
            .conn()
            .call(move |conn| {
                // Rank every record within its item so the newest K survive
                // even when all of them are older than the cutoff.
                let n = conn.execute(
                    "DELETE FROM check_history WHERE id IN ( \
                         SELECT id FROM ( \
                             SELECT id, check_time, ROW_NUMBER() OVER ( \
                                 PARTITION BY item_id ORDER BY check_time DESC, id DESC \
                             ) AS rank \
                             FROM check_history \
                         ) WHERE rank > ?2 AND check_time < ?1 LIMIT ?3 \
                     )",
                    params![before.to_rfc3339(), keep_per_item as i64, batch as i64],
                )?;
                Ok(n)
            })
            .await?;
        Ok(deleted)
    }

    /// Checks and error counts per day over the trailing window.
    pub async fn daily_stats(&self, days: u32) -> Result<Vec<DailyStats>> {
        let since = Utc::now() - Duration::days(days as i64);
        let stats = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT substr(check_time, 1, 10) AS day, \
                            COUNT(*), \
                            SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) \
                     FROM check_history WHERE check_time >= ?1 \
                     GROUP BY day ORDER BY day DESC",
                )?;
                let stats = stmt
                    .query_map(params![since.to_rfc3339()], |row| {
                        Ok(DailyStats {
                            date: row.get(0)?,
                            checks: row.get::<_, i64>(1)? as u64,
                            errors: row.get::<_, i64>(2)? as u64,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(stats)
            })
            .await?;
        Ok(stats)
    }
}

fn check_from_row(row: &Row<'_>) -> rusqlite::Result<CheckRecord> {
    let check_time: String = row.get(1)?;
    let status: String = row.get(2)?;
    let detectors: String = row.get(4)?;
    Ok(CheckRecord {
        item_id: row.get(0)?,
        check_time: parse_time(&check_time).unwrap_or_else(Utc::now),
        status: ItemStatus::parse(&status),
        confidence: row.get(3)?,
        detectors: serde_json::from_str(&detectors).unwrap_or_default(),
        http_status: row.get::<_, Option<i64>>(5)?.map(|s| s as u16),
        latency_ms: row.get::<_, i64>(6)? as u64,
        error_kind: row.get(7)?,
        error_message: row.get(8)?,
        fingerprint_hash: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use crate::models::{DetectorRecord, DetectorResult, Verdict};

    fn make_record(item_id: i64, status: ItemStatus, at: DateTime<Utc>) -> CheckRecord {
        CheckRecord {
            item_id,
            check_time: at,
            status,
            confidence: 0.8,
            detectors: vec![DetectorRecord::new(
                "keyword",
                &DetectorResult::new(Verdict::Available, 0.8, "matched 'add to cart'"),
            )],
            http_status: Some(200),
            latency_ms: 120,
            error_kind: None,
            error_message: None,
            fingerprint_hash: Some("abc123".into()),
        }
    }

    async fn seeded_item(store: &Store) -> i64 {
        test_support::seed_user(store, "u1").await;
        store
            .insert_item(test_support::new_item("u1", "https://example.com/hist"), 50)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_check_updates_item() {
        let store = test_support::store().await;
        let id = seeded_item(&store).await;
        let now = Utc::now();

        store
            .record_check(
                make_record(id, ItemStatus::Available, now),
                Some((ItemStatus::Available, 0.8)),
            )
            .await
            .unwrap();

        let item = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.last_status, ItemStatus::Available);
        assert_eq!(item.last_confidence, 0.8);
        assert_eq!(item.consecutive_error_count, 0);
        assert_eq!(item.fingerprint_hash.as_deref(), Some("abc123"));
        assert!(item.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_error_increments_streak_and_preserves_status() {
        let store = test_support::store().await;
        let id = seeded_item(&store).await;
        let now = Utc::now();

        store
            .record_check(
                make_record(id, ItemStatus::Unavailable, now),
                Some((ItemStatus::Unavailable, 0.8)),
            )
            .await
            .unwrap();
        let mut error = make_record(id, ItemStatus::Error, now);
        error.error_kind = Some("timeout".into());
        let count = store.record_check(error.clone(), None).await.unwrap();
        assert_eq!(count, 1);
        let count = store.record_check(error, None).await.unwrap();
        assert_eq!(count, 2);

        let item = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.last_status, ItemStatus::Unavailable);
        assert_eq!(item.consecutive_error_count, 2);
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let store = test_support::store().await;
        let id = seeded_item(&store).await;
        let now = Utc::now();

        store
            .record_check(make_record(id, ItemStatus::Error, now), None)
            .await
            .unwrap();
        let count = store
            .record_check(
                make_record(id, ItemStatus::Available, now),
                Some((ItemStatus::Available, 0.8)),
            )
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_blocked_poll_freezes_streak() {
        let store = test_support::store().await;
        let id = seeded_item(&store).await;
        let now = Utc::now();

        store
            .record_check(make_record(id, ItemStatus::Error, now), None)
            .await
            .unwrap();
        let mut blocked = make_record(id, ItemStatus::Unknown, now);
        blocked.error_kind = Some("blocked".into());
        let count = store.record_check(blocked, None).await.unwrap();
        assert_eq!(count, 1, "blocked must neither extend nor clear the streak");
    }

    #[tokio::test]
    async fn test_inconclusive_keeps_previous_status() {
        let store = test_support::store().await;
        let id = seeded_item(&store).await;
        let now = Utc::now();

        store
            .record_check(
                make_record(id, ItemStatus::Unavailable, now),
                Some((ItemStatus::Unavailable, 0.8)),
            )
            .await
            .unwrap();
        store
            .record_check(make_record(id, ItemStatus::Unknown, now), None)
            .await
            .unwrap();

        let item = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.last_status, ItemStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_recent_history_newest_first() {
        let store = test_support::store().await;
        let id = seeded_item(&store).await;
        let base = Utc::now();

        for i in 0..5 {
            store
                .record_check(
                    make_record(id, ItemStatus::Unavailable, base + Duration::seconds(i)),
                    None,
                )
                .await
                .unwrap();
        }

        let history = store.recent_history(id, 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].check_time > history[1].check_time);
        assert!(history[1].check_time > history[2].check_time);
    }

    #[tokio::test]
    async fn test_prune_keeps_recent_per_item() {
        let store = test_support::store().await;
        let id = seeded_item(&store).await;
        let old = Utc::now() - Duration::days(120);

        for i in 0..10 {
            store
                .record_check(
                    make_record(id, ItemStatus::Unavailable, old + Duration::seconds(i)),
                    None,
                )
                .await
                .unwrap();
        }

        let cutoff = Utc::now() - Duration::days(90);
        let deleted = store.prune_history(cutoff, 4, 512).await.unwrap();
        assert_eq!(deleted, 6);
        let remaining = store.recent_history(id, 100).await.unwrap();
        assert_eq!(remaining.len(), 4);
    }

    #[tokio::test]
    async fn test_prune_respects_batch_cap() {
        let store = test_support::store().await;
        let id = seeded_item(&store).await;
        let old = Utc::now() - Duration::days(120);

        for i in 0..10 {
            store
                .record_check(
                    make_record(id, ItemStatus::Unavailable, old + Duration::seconds(i)),
                    None,
                )
                .await
                .unwrap();
        }

        let cutoff = Utc::now() - Duration::days(90);
        let deleted = store.prune_history(cutoff, 0, 3).await.unwrap();
        assert_eq!(deleted, 3);
    }

    #[tokio::test]
    async fn test_daily_stats_counts_errors() {
        let store = test_support::store().await;
        let id = seeded_item(&store).await;
        let now = Utc::now();

        store
            .record_check(make_record(id, ItemStatus::Available, now), None)
            .await
            .unwrap();
        store
            .record_check(make_record(id, ItemStatus::Error, now), None)
            .await
            .unwrap();

        let stats = store.daily_stats(7).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].checks, 2);
        assert_eq!(stats[0].errors, 1);
    }
}
