// src/models/config.rs

//! Typed configuration, deserialized from TOML and validated at load.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{AppError, Result};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub fetcher: FetcherConfig,
    pub detectors: DetectorConfig,
    pub notifier: NotifierConfig,
    pub catalog: CatalogConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Polling pace, worker pool and retry settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum seconds between polls of the same item.
    pub check_interval: u64,
    /// Seconds between due-set refreshes.
    pub tick_interval: u64,
    /// Worker pool size.
    pub max_workers: usize,
    /// Transient-error backoff base, seconds.
    pub retry_delay: u64,
    /// Maximum backoff doublings.
    pub max_retries: u32,
    /// Extra deferral after an anti-bot block, seconds.
    pub blocked_backoff: u64,
    /// Consecutive errors before an item is auto-disabled.
    pub error_threshold: u32,
    /// Seconds granted to in-flight work on shutdown.
    pub shutdown_grace: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: 180,
            tick_interval: 1,
            max_workers: 8,
            retry_delay: 60,
            max_retries: 3,
            blocked_backoff: 1800,
            error_threshold: 10,
            shutdown_grace: 60,
        }
    }
}

/// HTTP fetching and rendering settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetcherConfig {
    /// Per-fetch deadline, seconds.
    pub fetch_timeout: u64,
    /// Seconds between requests to the same host.
    pub per_host_min_delay: u64,
    /// User-agent pool rotated across requests.
    pub user_agents: Vec<String>,
    /// Bodies shorter than this (after trim) count as incomplete.
    pub min_body_len: usize,
    /// Whether the headless renderer may be used.
    pub enable_render: bool,
    /// Browser pool cap.
    pub max_browsers: usize,
    /// Command template for the renderer; `{url}` is substituted.
    pub render_command: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: 30,
            per_host_min_delay: 2,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
            ],
            min_body_len: 100,
            enable_render: false,
            max_browsers: 2,
            render_command: vec![
                "chromium".to_string(),
                "--headless=new".to_string(),
                "--disable-gpu".to_string(),
                "--dump-dom".to_string(),
                "{url}".to_string(),
            ],
        }
    }
}

/// Per-detector fusion weights.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct DetectorWeights {
    pub keyword: f64,
    pub dom: f64,
    pub api: f64,
    pub fingerprint: f64,
}

impl Default for DetectorWeights {
    fn default() -> Self {
        Self {
            keyword: 0.20,
            dom: 0.35,
            api: 0.35,
            fingerprint: 0.10,
        }
    }
}

impl DetectorWeights {
    /// Weights scaled to sum to 1.
    pub fn normalized(&self) -> Self {
        let sum = self.keyword + self.dom + self.api + self.fingerprint;
        if sum <= f64::EPSILON {
            return Self::default();
        }
        Self {
            keyword: self.keyword / sum,
            dom: self.dom / sum,
            api: self.api / sum,
            fingerprint: self.fingerprint / sum,
        }
    }
}

/// Detector and fusion settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectorConfig {
    pub weights: DetectorWeights,
    /// Fusion emit threshold.
    pub confidence_threshold: f64,
    /// Per-detector deadline, seconds.
    pub detector_timeout: u64,
    /// Whether the API probe may discover endpoints.
    pub enable_api_discovery: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            weights: DetectorWeights::default(),
            confidence_threshold: 0.6,
            detector_timeout: 10,
            enable_api_discovery: true,
        }
    }
}

/// Notification aggregation and delivery settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifierConfig {
    /// Seconds between notification flushes.
    pub aggregation_interval: u64,
    /// Per-(item, recipient) anti-spam window, seconds.
    pub cooldown_seconds: u64,
    /// Default daily delivery cap for new users.
    pub daily_notify_limit: u32,
    /// Per-delivery deadline, seconds.
    pub delivery_timeout: u64,
    /// Admin recipient set.
    pub admin_ids: Vec<String>,
    /// Whether admins are told about available → unavailable flips.
    pub notify_outages: bool,
    /// Items listed in one admin digest before truncating.
    pub digest_max_items: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            aggregation_interval: 180,
            cooldown_seconds: 600,
            daily_notify_limit: 10,
            delivery_timeout: 15,
            admin_ids: Vec::new(),
            notify_outages: true,
            digest_max_items: 5,
        }
    }
}

/// Admission settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    /// Per-user admission cap in a rolling 24 h window.
    pub daily_add_limit: u32,
    /// Host suffix → vendor tag table.
    pub vendor_tags: HashMap<String, String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let mut vendor_tags = HashMap::new();
        vendor_tags.insert("racknerd.com".to_string(), "racknerd".to_string());
        vendor_tags.insert("bandwagonhost.com".to_string(), "bandwagon".to_string());
        vendor_tags.insert("vultr.com".to_string(), "vultr".to_string());
        vendor_tags.insert("hetzner.com".to_string(), "hetzner".to_string());
        vendor_tags.insert("ovhcloud.com".to_string(), "ovh".to_string());
        Self {
            daily_add_limit: 50,
            vendor_tags,
        }
    }
}

/// Persistence settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Rolling history window, days.
    pub history_retention_days: i64,
    /// Records always kept per item regardless of age.
    pub history_keep_per_item: u32,
    /// Rows deleted per prune call, to keep the operation short.
    pub prune_batch: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "stockwatch.db".to_string(),
            history_retention_days: 90,
            history_keep_per_item: 100,
            prune_batch: 512,
        }
    }
}

/// Logging settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Validate ranges that would otherwise wedge the scheduler or
    /// produce nonsense confidences.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_workers == 0 {
            return Err(AppError::config("scheduler.max_workers must be at least 1"));
        }
        if self.scheduler.tick_interval == 0 {
            return Err(AppError::config("scheduler.tick_interval must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detectors.confidence_threshold) {
            return Err(AppError::config(
                "detectors.confidence_threshold must be within [0, 1]",
            ));
        }
        let w = &self.detectors.weights;
        for (name, value) in [
            ("keyword", w.keyword),
            ("dom", w.dom),
            ("api", w.api),
            ("fingerprint", w.fingerprint),
        ] {
            if value < 0.0 {
                return Err(AppError::config(format!(
                    "detectors.weights.{name} must not be negative"
                )));
            }
        }
        if self.fetcher.user_agents.is_empty() {
            return Err(AppError::config("fetcher.user_agents must not be empty"));
        }
        if self.fetcher.enable_render && self.fetcher.max_browsers == 0 {
            return Err(AppError::config(
                "fetcher.max_browsers must be at least 1 when rendering is enabled",
            ));
        }
        if self.fetcher.enable_render && !self.fetcher.render_command.iter().any(|a| a.contains("{url}")) {
            return Err(AppError::config(
                "fetcher.render_command must contain a {url} placeholder",
            ));
        }
        if self.notifier.aggregation_interval == 0 {
            return Err(AppError::config(
                "notifier.aggregation_interval must be at least 1",
            ));
        }
        if self.storage.history_retention_days <= 0 {
            return Err(AppError::config(
                "storage.history_retention_days must be positive",
            ));
        }
        Ok(())
    }
}
