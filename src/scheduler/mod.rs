// src/scheduler/mod.rs

//! Due-item polling under concurrency and per-host limits.
//!
//! One dispatcher task refreshes the due-set every tick and feeds a
//! bounded channel; a pool of workers drains it, each handling one item
//! end-to-end: fetch → detectors → fusion → transition → record. At most
//! one poll is in flight per item, and per host, at any time.

pub mod transition;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::detect::{DetectionInput, DetectorSet};
use crate::error::Result;
use crate::fetch::{FetchErrorKind, FetchResult, PageSource};
use crate::models::{CheckRecord, Config, Item, ItemStatus, NotificationKind, PendingEvent};
use crate::store::Store;

pub use transition::{TransitionDecision, TransitionEvaluator, HISTORY_DEPTH};

/// Everything a worker needs to poll one item.
pub struct PollContext {
    pub store: Store,
    pub source: Arc<dyn PageSource>,
    pub detectors: DetectorSet,
    pub evaluator: TransitionEvaluator,
    pub config: Config,
}

/// What one poll produced, for logging and diagnostics.
#[derive(Debug, Clone)]
pub struct PollSummary {
    pub item_id: i64,
    pub status: ItemStatus,
    pub confidence: f64,
    pub evidence: String,
    pub detectors: Vec<crate::models::DetectorRecord>,
    pub emitted: Option<NotificationKind>,
    pub error_kind: Option<FetchErrorKind>,
    /// Item auto-disabled by the error threshold during this poll.
    pub auto_disabled: bool,
    pub recheck_soon: bool,
}

impl PollContext {
    /// Poll one item end-to-end and record the result.
    ///
    /// Store failures propagate; fetch and detector failures do not.
    pub async fn poll_item(
        &self,
        item: &Item,
        fetch: FetchResult,
        events: Option<&mpsc::Sender<PendingEvent>>,
    ) -> Result<PollSummary> {
        let now = Utc::now();

        if let Some(kind) = fetch.error_kind {
            return self.record_failed_poll(item, &fetch, kind, now, events).await;
        }

        let input = DetectionInput::new(
            &fetch,
            item.vendor_tag.as_deref(),
            item.fingerprint_hash.as_deref(),
            item.api_endpoint.as_deref(),
        );
        let outcome = self.detectors.run(&input).await;

        if let Some(endpoint) = &outcome.discovered_endpoint {
            tracing::debug!(item_id = item.item_id, endpoint, "memoising discovered api endpoint");
            self.store
                .set_item_api_endpoint(item.item_id, Some(endpoint.clone()))
                .await?;
        }

        let history = self
            .store
            .recent_history(item.item_id, HISTORY_DEPTH)
            .await?;
        let decision = self.evaluator.evaluate(item, &outcome.fused, &history);

        let record = CheckRecord {
            item_id: item.item_id,
            check_time: now,
            status: outcome.fused.verdict.to_status(),
            confidence: outcome.fused.confidence,
            detectors: outcome.records.clone(),
            http_status: fetch.http_status,
            latency_ms: fetch.latency_ms,
            error_kind: None,
            error_message: None,
            fingerprint_hash: outcome.new_fingerprint.clone(),
        };
        self.store.record_check(record, decision.apply_status).await?;

        let mut emitted = None;
        if let Some(kind) = decision.emit {
            let to_status = decision
                .apply_status
                .map(|(s, _)| s)
                .unwrap_or(ItemStatus::Unknown);
            let event = PendingEvent {
                item_id: item.item_id,
                item_name: item.name.clone(),
                item_url: item.url.clone(),
                owner_id: item.owner_id.clone(),
                detected_at: now,
                from_status: item.last_status,
                to_status,
                confidence: outcome.fused.confidence,
                kind,
            };
            if let Some(events) = events {
                if events.send(event).await.is_err() {
                    tracing::warn!(item_id = item.item_id, "event queue closed, notification dropped");
                } else {
                    emitted = Some(kind);
                }
            } else {
                emitted = Some(kind);
            }
        }

        tracing::info!(
            item_id = item.item_id,
            http_status = fetch.http_status,
            status = outcome.fused.verdict.as_str(),
            confidence = outcome.fused.confidence,
            evidence = %truncate(&outcome.fused.evidence, 160),
            "poll complete"
        );

        Ok(PollSummary {
            item_id: item.item_id,
            status: outcome.fused.verdict.to_status(),
            confidence: outcome.fused.confidence,
            evidence: outcome.fused.evidence,
            detectors: outcome.records,
            emitted,
            error_kind: None,
            auto_disabled: false,
            recheck_soon: decision.recheck_soon,
        })
    }

    /// Record a poll whose fetch failed outright; applies the error
    /// threshold and queues an admin health event when it trips.
    async fn record_failed_poll(
        &self,
        item: &Item,
        fetch: &FetchResult,
        kind: FetchErrorKind,
        now: DateTime<Utc>,
        events: Option<&mpsc::Sender<PendingEvent>>,
    ) -> Result<PollSummary> {
        // Blocked is data, not an error: it freezes the streak and defers.
        let status = if kind == FetchErrorKind::Blocked {
            ItemStatus::Unknown
        } else {
            ItemStatus::Error
        };
        let record = CheckRecord {
            item_id: item.item_id,
            check_time: now,
            status,
            confidence: 0.0,
            detectors: Vec::new(),
            http_status: fetch.http_status,
            latency_ms: fetch.latency_ms,
            error_kind: Some(kind.as_str().to_string()),
            error_message: fetch.error_message.clone(),
            fingerprint_hash: None,
        };
        let streak = self.store.record_check(record, None).await?;

        tracing::warn!(
            item_id = item.item_id,
            http_status = fetch.http_status,
            error_kind = kind.as_str(),
            streak,
            "poll failed"
        );

        let mut auto_disabled = false;
        let mut emitted = None;
        if streak >= self.config.scheduler.error_threshold {
            self.store.set_item_enabled(item.item_id, false).await?;
            auto_disabled = true;
            tracing::warn!(item_id = item.item_id, streak, "item auto-disabled");

            let event = PendingEvent {
                item_id: item.item_id,
                item_name: item.name.clone(),
                item_url: item.url.clone(),
                owner_id: item.owner_id.clone(),
                detected_at: now,
                from_status: item.last_status,
                to_status: ItemStatus::Error,
                confidence: 0.0,
                kind: NotificationKind::AdminSummary,
            };
            if let Some(events) = events {
                let _ = events.send(event).await;
            }
            emitted = Some(NotificationKind::AdminSummary);
        }

        Ok(PollSummary {
            item_id: item.item_id,
            status,
            confidence: 0.0,
            evidence: fetch
                .error_message
                .clone()
                .unwrap_or_else(|| kind.as_str().to_string()),
            detectors: Vec::new(),
            emitted,
            error_kind: Some(kind),
            auto_disabled,
            recheck_soon: false,
        })
    }
}

/// Exponential backoff with ±25% jitter.
fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    let raw = base_secs.saturating_mul(1u64 << attempt.min(16)) as f64;
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_secs_f64(raw * jitter)
}

/// The scheduler proper.
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: PollContext,
    events: mpsc::Sender<PendingEvent>,
    in_flight: Mutex<HashSet<i64>>,
    busy_hosts: Mutex<HashSet<String>>,
    /// Per-item override of the next eligible poll time: retry backoff,
    /// blocked deferral, and expedited re-checks all land here.
    next_eligible: Mutex<HashMap<i64, DateTime<Utc>>>,
    retries: Mutex<HashMap<i64, u32>>,
}

impl Scheduler {
    pub fn new(ctx: PollContext, events: mpsc::Sender<PendingEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                events,
                in_flight: Mutex::new(HashSet::new()),
                busy_hosts: Mutex::new(HashSet::new()),
                next_eligible: Mutex::new(HashMap::new()),
                retries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Run until the shutdown signal fires. In-flight polls finish within
    /// the configured grace period; no new work starts after the signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let config = &self.inner.ctx.config.scheduler;
        let tick = Duration::from_secs(config.tick_interval);
        let (tx, rx) = mpsc::channel::<Item>(config.max_workers * 2);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..config.max_workers {
            let inner = Arc::clone(&self.inner);
            let rx = Arc::clone(&rx);
            workers.spawn(async move {
                loop {
                    let item = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(item) = item else { break };
                    inner.process(item).await;
                }
                tracing::debug!(worker_id, "worker exited");
            });
        }

        tracing::info!(
            workers = config.max_workers,
            check_interval = config.check_interval,
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.dispatch_due(&tx).await;
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.changed() => break,
            }
        }

        // Close the dispatch channel; workers drain and exit.
        drop(tx);
        let grace = Duration::from_secs(config.shutdown_grace);
        let deadline = tokio::time::Instant::now() + grace;
        while let Ok(Some(_)) = tokio::time::timeout_at(deadline, workers.join_next()).await {
            if workers.is_empty() {
                break;
            }
        }
        workers.abort_all();
        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// Refresh the due-set and dispatch eligible items.
    async fn dispatch_due(&self, tx: &mpsc::Sender<Item>) {
        let now = Utc::now();
        let config = &self.inner.ctx.config.scheduler;
        let interval = Duration::from_secs(config.check_interval);

        let mut candidates = match self.inner.ctx.store.list_due_items(now, interval).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "due-set refresh failed");
                return;
            }
        };

        // Expedited items (suspicious drift, pending corroboration) are due
        // before their regular interval.
        let expedited: Vec<i64> = {
            let overrides = self.inner.next_eligible.lock().expect("override table");
            overrides
                .iter()
                .filter(|(id, at)| now >= **at && !candidates.iter().any(|i| i.item_id == **id))
                .map(|(id, _)| *id)
                .collect()
        };
        for id in expedited {
            match self.inner.ctx.store.get_item(id).await {
                Ok(Some(item)) if item.enabled => candidates.push(item),
                Ok(_) => {
                    self.inner.next_eligible.lock().expect("override table").remove(&id);
                }
                Err(e) => tracing::error!(item_id = id, error = %e, "expedite lookup failed"),
            }
        }

        for item in candidates {
            if !self.eligible(&item, now) {
                continue;
            }
            self.claim(&item);
            if tx.send(item).await.is_err() {
                return;
            }
        }
    }

    /// Deferred-time, in-flight and host checks for one candidate.
    fn eligible(&self, item: &Item, now: DateTime<Utc>) -> bool {
        {
            let overrides = self.inner.next_eligible.lock().expect("override table");
            if let Some(at) = overrides.get(&item.item_id) {
                if now < *at {
                    return false;
                }
            }
        }
        {
            let in_flight = self.inner.in_flight.lock().expect("in-flight table");
            if in_flight.contains(&item.item_id) {
                return false;
            }
        }
        if let Some(host) = item.host() {
            let busy = self.inner.busy_hosts.lock().expect("host table");
            if busy.contains(&host) {
                return false;
            }
        }
        true
    }

    /// Mark an item (and its host) as in flight. Only the dispatcher
    /// inserts, so check-then-claim cannot race.
    fn claim(&self, item: &Item) {
        self.inner
            .next_eligible
            .lock()
            .expect("override table")
            .remove(&item.item_id);
        self.inner
            .in_flight
            .lock()
            .expect("in-flight table")
            .insert(item.item_id);
        if let Some(host) = item.host() {
            self.inner.busy_hosts.lock().expect("host table").insert(host);
        }
    }
}

impl Inner {
    /// Worker body: fetch, handle retries, run detection, release claims.
    async fn process(&self, item: Item) {
        let fetch = self.ctx.source.fetch(&item.url).await;
        let now = Utc::now();
        let config = &self.ctx.config.scheduler;

        let handled_as_retry = if let Some(kind) = fetch.error_kind {
            if kind.is_transient() {
                let attempt = {
                    let retries = self.retries.lock().expect("retry table");
                    retries.get(&item.item_id).copied().unwrap_or(0)
                };
                if attempt < config.max_retries {
                    let delay = backoff_delay(config.retry_delay, attempt);
                    tracing::debug!(
                        item_id = item.item_id,
                        error_kind = kind.as_str(),
                        attempt,
                        delay_secs = delay.as_secs(),
                        "transient failure, scheduling retry"
                    );
                    self.retries
                        .lock()
                        .expect("retry table")
                        .insert(item.item_id, attempt + 1);
                    self.next_eligible.lock().expect("override table").insert(
                        item.item_id,
                        now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(60)),
                    );
                    true
                } else {
                    false
                }
            } else {
                false
            }
        } else {
            false
        };

        if !handled_as_retry {
            self.retries.lock().expect("retry table").remove(&item.item_id);
            let blocked = fetch.error_kind == Some(FetchErrorKind::Blocked);

            match self.ctx.poll_item(&item, fetch, Some(&self.events)).await {
                Ok(summary) => {
                    if blocked {
                        self.next_eligible.lock().expect("override table").insert(
                            item.item_id,
                            now + chrono::Duration::seconds(config.blocked_backoff as i64),
                        );
                    } else if summary.recheck_soon {
                        let soon = (config.check_interval / 4).max(config.tick_interval);
                        self.next_eligible
                            .lock()
                            .expect("override table")
                            .insert(item.item_id, now + chrono::Duration::seconds(soon as i64));
                    }
                }
                Err(e) => {
                    // Store failure: nothing recorded; the next tick retries
                    // the whole cycle.
                    tracing::error!(item_id = item.item_id, error = %e, "poll cycle failed");
                }
            }
        }

        self.in_flight.lock().expect("in-flight table").remove(&item.item_id);
        if let Some(host) = item.host() {
            self.busy_hosts.lock().expect("host table").remove(&host);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResult;
    use crate::models::DetectorConfig;
    use crate::store::test_support;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Page source serving canned bodies per URL, counting fetches.
    struct ScriptedSource {
        bodies: Mutex<HashMap<String, Vec<FetchResult>>>,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                bodies: Mutex::new(HashMap::new()),
                fetches: AtomicUsize::new(0),
            }
        }

        fn push(&self, url: &str, result: FetchResult) {
            self.bodies
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push(result);
        }

        fn ok_body(url: &str, body: &str) -> FetchResult {
            FetchResult {
                final_url: url.to_string(),
                http_status: Some(200),
                headers: Vec::new(),
                raw_body: body.to_string(),
                rendered_body: None,
                latency_ms: 5,
                error_kind: None,
                error_message: None,
            }
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch(&self, url: &str) -> FetchResult {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut bodies = self.bodies.lock().unwrap();
            let queue = bodies.get_mut(url);
            match queue {
                Some(q) if q.len() > 1 => q.remove(0),
                Some(q) if q.len() == 1 => q[0].clone(),
                _ => FetchResult::failure(url, FetchErrorKind::Dns, "unscripted url", 1),
            }
        }
    }

    async fn context(source: Arc<ScriptedSource>) -> PollContext {
        let config = Config::default();
        PollContext {
            store: test_support::store().await,
            source,
            detectors: DetectorSet::new(DetectorConfig::default()),
            evaluator: TransitionEvaluator::new(config.detectors.confidence_threshold),
            config,
        }
    }

    async fn seed(ctx: &PollContext, url: &str) -> Item {
        test_support::seed_user(&ctx.store, "u1").await;
        let id = ctx
            .store
            .insert_item(test_support::new_item("u1", url), 50)
            .await
            .unwrap();
        ctx.store.get_item(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_restock_detected_after_corroboration() {
        let source = Arc::new(ScriptedSource::new());
        let ctx = context(source.clone()).await;
        let url = "https://h1.example.com/kvm";
        let item = seed(&ctx, url).await;

        // Establish unavailable. Keyword-only unavailable fuses at 0.7,
        // below the 0.75 flip margin, so corroborate with a second read.
        let sold = ScriptedSource::ok_body(url, "<p>sold out</p>");
        ctx.poll_item(&item, sold.clone(), None).await.unwrap();
        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        ctx.poll_item(&item, sold, None).await.unwrap();
        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(item.last_status, ItemStatus::Unavailable);

        // Two successive "add to cart" bodies flip it and emit a restock.
        let instock = ScriptedSource::ok_body(url, "<button>Add to cart</button>");
        let first = ctx.poll_item(&item, instock.clone(), None).await.unwrap();
        assert_eq!(first.emitted, None, "single reading must not emit");
        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(item.last_status, ItemStatus::Unavailable, "hysteresis holds");

        let second = ctx.poll_item(&item, instock, None).await.unwrap();
        assert_eq!(second.emitted, Some(NotificationKind::Restock));
        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(item.last_status, ItemStatus::Available);
    }

    #[tokio::test]
    async fn test_false_positive_suppressed() {
        let source = Arc::new(ScriptedSource::new());
        let ctx = context(source.clone()).await;
        let url = "https://h1.example.com/kvm";
        let item = seed(&ctx, url).await;

        let sold = ScriptedSource::ok_body(url, "<p>out of stock</p>");
        ctx.poll_item(&item, sold.clone(), None).await.unwrap();
        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        ctx.poll_item(&item, sold.clone(), None).await.unwrap();
        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(item.last_status, ItemStatus::Unavailable);

        // One available blip, then unavailable again.
        let blip = ScriptedSource::ok_body(url, "<button>add to cart</button>");
        let summary = ctx.poll_item(&item, blip, None).await.unwrap();
        assert_eq!(summary.emitted, None);
        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(item.last_status, ItemStatus::Unavailable);

        let summary = ctx
            .poll_item(&item, ScriptedSource::ok_body(url, "<p>out of stock</p>"), None)
            .await
            .unwrap();
        assert_eq!(summary.emitted, None);
        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(item.last_status, ItemStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_blocked_fetch_freezes_and_reports() {
        let source = Arc::new(ScriptedSource::new());
        let ctx = context(source.clone()).await;
        let url = "https://h1.example.com/kvm";
        let item = seed(&ctx, url).await;

        let blocked = FetchResult::failure(url, FetchErrorKind::Blocked, "HTTP 403", 10);
        let summary = ctx.poll_item(&item, blocked, None).await.unwrap();
        assert_eq!(summary.error_kind, Some(FetchErrorKind::Blocked));
        assert!(!summary.auto_disabled);

        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(item.consecutive_error_count, 0, "blocked must not extend the streak");
        let history = ctx.store.recent_history(item.item_id, 5).await.unwrap();
        assert_eq!(history[0].error_kind.as_deref(), Some("blocked"));
    }

    #[tokio::test]
    async fn test_error_threshold_auto_disables() {
        let source = Arc::new(ScriptedSource::new());
        let mut ctx = context(source.clone()).await;
        ctx.config.scheduler.error_threshold = 3;
        let url = "https://h1.example.com/kvm";
        let item = seed(&ctx, url).await;

        let failure = || FetchResult::failure(url, FetchErrorKind::Timeout, "deadline", 10);
        for _ in 0..2 {
            let summary = ctx.poll_item(&item, failure(), None).await.unwrap();
            assert!(!summary.auto_disabled);
        }
        let summary = ctx.poll_item(&item, failure(), None).await.unwrap();
        assert!(summary.auto_disabled);
        assert_eq!(summary.emitted, Some(NotificationKind::AdminSummary));

        let item = ctx.store.get_item(item.item_id).await.unwrap().unwrap();
        assert!(!item.enabled);
    }

    #[tokio::test]
    async fn test_scheduler_one_poll_per_item_and_host_politeness() {
        let source = Arc::new(ScriptedSource::new());
        // Two items on the same host, one on another.
        source.push(
            "https://h2.example.com/b",
            ScriptedSource::ok_body("https://h2.example.com/b", "<p>out of stock</p>"),
        );
        source.push(
            "https://h2.example.com/c",
            ScriptedSource::ok_body("https://h2.example.com/c", "<p>out of stock</p>"),
        );
        source.push(
            "https://h3.example.com/d",
            ScriptedSource::ok_body("https://h3.example.com/d", "<p>out of stock</p>"),
        );

        let mut ctx = context(source.clone()).await;
        ctx.config.scheduler.tick_interval = 1;
        let store = ctx.store.clone();
        test_support::seed_user(&store, "u1").await;
        for url in [
            "https://h2.example.com/b",
            "https://h2.example.com/c",
            "https://h3.example.com/d",
        ] {
            store
                .insert_item(test_support::new_item("u1", url), 50)
                .await
                .unwrap();
        }

        let (events_tx, _events_rx) = mpsc::channel(64);
        let scheduler = Scheduler::new(ctx, events_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = {
            let scheduler = Scheduler {
                inner: Arc::clone(&scheduler.inner),
            };
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        // Give the scheduler a few ticks, then stop it.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // All three items were polled at least once, none twice in the
        // window (check_interval far exceeds the test duration).
        for id in 1..=3i64 {
            let history = store.recent_history(id, 10).await.unwrap();
            assert_eq!(history.len(), 1, "item {id} must be polled exactly once");
        }
    }

    #[test]
    fn test_backoff_bounds() {
        for attempt in 0..4 {
            let d = backoff_delay(60, attempt).as_secs_f64();
            let nominal = (60 * (1 << attempt)) as f64;
            assert!(d >= nominal * 0.75 - 1e-6);
            assert!(d <= nominal * 1.25 + 1e-6);
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "缺货缺货缺货";
        let t = truncate(s, 4);
        assert!(t.ends_with('…'));
    }
}
