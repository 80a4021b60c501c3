// src/notify/mod.rs

//! Notification aggregation and delivery.
//!
//! A single background loop owns the pending-event queue. Every
//! aggregation tick it flushes ripe events: admins get a compact restock
//! digest, item owners get individual messages gated by cooldown, daily
//! cap, quiet hours and their notification toggle. Deliveries are
//! at-most-once per cooldown window; events deferred past 24 hours are
//! dropped with a ledger record.

pub mod sink;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::models::{LedgerEntry, NotificationKind, NotifierConfig, PendingEvent, User};
use crate::store::Store;

pub use sink::{LogSink, Sink};

/// Base delay between delivery retries; doubles per attempt.
const DELIVERY_RETRY_BASE: Duration = Duration::from_secs(2);

/// Delivery attempts before an event is dropped.
const DELIVERY_ATTEMPTS: u32 = 3;

/// Events older than this are dropped instead of delivered late.
const MAX_EVENT_AGE_HOURS: i64 = 24;

/// Counters from one flush, for logs and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushStats {
    pub delivered: u32,
    pub skipped_cooldown: u32,
    pub skipped_daily_cap: u32,
    pub deferred_quiet_hours: u32,
    pub dropped_stale: u32,
    pub delivery_failed: u32,
}

pub struct NotificationAggregator {
    store: Store,
    sink: Arc<dyn Sink>,
    config: NotifierConfig,
    pending: Vec<PendingEvent>,
}

impl NotificationAggregator {
    pub fn new(store: Store, sink: Arc<dyn Sink>, config: NotifierConfig) -> Self {
        Self {
            store,
            sink,
            config,
            pending: Vec::new(),
        }
    }

    /// Queue a detected transition for the next flush.
    pub fn enqueue(&mut self, event: PendingEvent) {
        self.pending.push(event);
    }

    /// Background loop: drain the event channel, flush on the tick.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<PendingEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = Duration::from_secs(self.config.aggregation_interval);
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.enqueue(event),
                    None => break,
                },
                _ = tick.tick() => {
                    match self.flush(Utc::now()).await {
                        Ok(stats) if stats != FlushStats::default() => {
                            tracing::info!(
                                delivered = stats.delivered,
                                skipped_cooldown = stats.skipped_cooldown,
                                skipped_daily_cap = stats.skipped_daily_cap,
                                deferred = stats.deferred_quiet_hours,
                                dropped_stale = stats.dropped_stale,
                                failed = stats.delivery_failed,
                                "notification flush"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "notification flush failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("notification aggregator stopped");
    }

    /// Flush events old enough to have had one batching window.
    pub async fn flush(&mut self, now: DateTime<Utc>) -> Result<FlushStats> {
        let mut stats = FlushStats::default();
        let ripe_before = now
            - chrono::Duration::seconds((self.config.aggregation_interval / 2).max(1) as i64);

        let (ripe, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|e| e.detected_at <= ripe_before);
        self.pending = rest;

        if ripe.is_empty() {
            return Ok(stats);
        }

        let restocks: Vec<&PendingEvent> = ripe
            .iter()
            .filter(|e| e.kind == NotificationKind::Restock)
            .collect();
        let outages: Vec<&PendingEvent> = ripe
            .iter()
            .filter(|e| e.kind == NotificationKind::Outage)
            .collect();
        let health: Vec<&PendingEvent> = ripe
            .iter()
            .filter(|e| e.kind == NotificationKind::AdminSummary)
            .collect();

        if !restocks.is_empty() {
            self.send_admin_digest(&restocks, now, &mut stats).await?;
            for event in &restocks {
                self.send_owner_message(event, now, &mut stats).await?;
            }
        }
        if !outages.is_empty() && self.config.notify_outages {
            for event in &outages {
                self.send_to_admins(
                    event,
                    &format_outage(event),
                    NotificationKind::Outage,
                    now,
                    &mut stats,
                )
                .await?;
            }
        }
        for event in &health {
            self.send_to_admins(
                event,
                &format_health(event),
                NotificationKind::AdminSummary,
                now,
                &mut stats,
            )
            .await?;
        }

        Ok(stats)
    }

    /// One compact digest per administrator.
    async fn send_admin_digest(
        &mut self,
        restocks: &[&PendingEvent],
        now: DateTime<Utc>,
        stats: &mut FlushStats,
    ) -> Result<()> {
        if self.config.admin_ids.is_empty() {
            return Ok(());
        }
        let body = format_digest(restocks, self.config.digest_max_items);

        for admin in self.config.admin_ids.clone() {
            // The digest covers many items; it goes out when at least one
            // of them clears the per-(item, admin) cooldown.
            let mut fresh_items = Vec::new();
            for event in restocks {
                if self.cooled_down(event.item_id, &admin, self.config.cooldown_seconds, now).await? {
                    fresh_items.push(event.item_id);
                } else {
                    stats.skipped_cooldown += 1;
                }
            }
            if fresh_items.is_empty() {
                continue;
            }
            if self.deliver(&admin, &body).await {
                stats.delivered += 1;
                for item_id in fresh_items {
                    self.store
                        .append_ledger(LedgerEntry {
                            item_id,
                            recipient_id: admin.clone(),
                            sent_at: now,
                            kind: NotificationKind::Restock,
                        })
                        .await?;
                }
            } else {
                stats.delivery_failed += 1;
            }
        }
        Ok(())
    }

    /// Individual message to the item owner, subject to their prefs.
    async fn send_owner_message(
        &mut self,
        event: &PendingEvent,
        now: DateTime<Utc>,
        stats: &mut FlushStats,
    ) -> Result<()> {
        if event.owner_id == crate::models::item::SYSTEM_OWNER {
            return Ok(());
        }
        // Admins already got the digest.
        if self.config.admin_ids.contains(&event.owner_id) {
            return Ok(());
        }
        let user = match self.store.get_user(&event.owner_id).await? {
            Some(user) => user,
            None => return Ok(()),
        };
        if user.is_banned || !user.notifications_enabled {
            return Ok(());
        }

        if self.in_quiet_hours(&user, now) {
            if now - event.detected_at >= chrono::Duration::hours(MAX_EVENT_AGE_HOURS) {
                self.store
                    .append_ledger(LedgerEntry {
                        item_id: event.item_id,
                        recipient_id: user.user_id.clone(),
                        sent_at: now,
                        kind: NotificationKind::SkippedStale,
                    })
                    .await?;
                stats.dropped_stale += 1;
            } else {
                // Defer to the next in-window tick.
                self.pending.push(event.clone());
                stats.deferred_quiet_hours += 1;
            }
            return Ok(());
        }

        if !self
            .cooled_down(event.item_id, &user.user_id, user.cooldown_seconds, now)
            .await?
        {
            stats.skipped_cooldown += 1;
            return Ok(());
        }
        let delivered_today = self.store.deliveries_in_window(&user.user_id, now).await?;
        if delivered_today >= user.daily_notify_limit {
            stats.skipped_daily_cap += 1;
            return Ok(());
        }

        if self.deliver(&user.user_id, &format_restock(event)).await {
            stats.delivered += 1;
            self.store
                .append_ledger(LedgerEntry {
                    item_id: event.item_id,
                    recipient_id: user.user_id.clone(),
                    sent_at: now,
                    kind: NotificationKind::Restock,
                })
                .await?;
        } else {
            stats.delivery_failed += 1;
        }
        Ok(())
    }

    /// Deliver one event to every admin, with cooldown per (item, admin).
    async fn send_to_admins(
        &mut self,
        event: &PendingEvent,
        body: &str,
        kind: NotificationKind,
        now: DateTime<Utc>,
        stats: &mut FlushStats,
    ) -> Result<()> {
        for admin in self.config.admin_ids.clone() {
            if !self
                .cooled_down(event.item_id, &admin, self.config.cooldown_seconds, now)
                .await?
            {
                stats.skipped_cooldown += 1;
                continue;
            }
            if self.deliver(&admin, body).await {
                stats.delivered += 1;
                self.store
                    .append_ledger(LedgerEntry {
                        item_id: event.item_id,
                        recipient_id: admin.clone(),
                        sent_at: now,
                        kind,
                    })
                    .await?;
            } else {
                stats.delivery_failed += 1;
            }
        }
        Ok(())
    }

    async fn cooled_down(
        &self,
        item_id: i64,
        recipient: &str,
        cooldown_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self.store.last_delivery(item_id, recipient).await? {
            Some(last) => {
                Ok(now - last >= chrono::Duration::seconds(cooldown_seconds as i64))
            }
            None => Ok(true),
        }
    }

    fn in_quiet_hours(&self, user: &User, now: DateTime<Utc>) -> bool {
        user.quiet_hours
            .map(|q| q.contains(now.hour() as u8))
            .unwrap_or(false)
    }

    /// Send with bounded retries; true on success.
    async fn deliver(&self, recipient: &str, body: &str) -> bool {
        for attempt in 0..DELIVERY_ATTEMPTS {
            match self.sink.send_text(recipient, body).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(recipient, attempt, error = %e, "delivery attempt failed");
                    if attempt + 1 < DELIVERY_ATTEMPTS {
                        tokio::time::sleep(DELIVERY_RETRY_BASE * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        tracing::error!(recipient, "delivery dropped after retries");
        false
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn format_restock(event: &PendingEvent) -> String {
    format!(
        "Restocked: {}\n{}\nconfidence {:.2}, detected {}",
        event.item_name,
        event.item_url,
        event.confidence,
        event.detected_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

fn format_outage(event: &PendingEvent) -> String {
    format!(
        "Out of stock again: {}\n{}\nconfidence {:.2}",
        event.item_name, event.item_url, event.confidence,
    )
}

fn format_health(event: &PendingEvent) -> String {
    format!(
        "Monitor disabled after repeated errors: {}\n{}\nlast status {}",
        event.item_name,
        event.item_url,
        event.from_status.as_str(),
    )
}

fn format_digest(restocks: &[&PendingEvent], max_items: usize) -> String {
    let mut body = format!("Restock digest ({} item(s)):\n", restocks.len());
    for (i, event) in restocks.iter().take(max_items).enumerate() {
        body.push_str(&format!(
            "{}. {} — {} (confidence {:.2})\n",
            i + 1,
            event.item_name,
            event.item_url,
            event.confidence,
        ));
    }
    if restocks.len() > max_items {
        body.push_str(&format!("…and {} more\n", restocks.len() - max_items));
    }
    body
}
