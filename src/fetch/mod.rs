// src/fetch/mod.rs

//! HTTP fetching with anti-bot workarounds and optional rendering.
//!
//! Network failures never propagate as errors: they are folded into the
//! returned [`FetchResult`] and recorded as check history downstream.

pub mod client;
pub mod politeness;
pub mod render;

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::FetcherConfig;

pub use client::ChallengeAwareClient;
pub use politeness::HostDelayTracker;
pub use render::{BrowserPool, CommandRenderer, PageRenderer};

/// Fetch-layer failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Dns,
    Connect,
    Tls,
    Timeout,
    /// Anti-bot block (403/503 with a challenge marker).
    Blocked,
    ServerError,
    Decode,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Dns => "dns",
            FetchErrorKind::Connect => "connect",
            FetchErrorKind::Tls => "tls",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Blocked => "blocked",
            FetchErrorKind::ServerError => "server_error",
            FetchErrorKind::Decode => "decode",
        }
    }

    /// Whether the scheduler may retry this failure within the same cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchErrorKind::Dns
                | FetchErrorKind::Connect
                | FetchErrorKind::Timeout
                | FetchErrorKind::ServerError
        )
    }
}

/// Result of one fetch attempt, successful or not.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub final_url: String,
    pub http_status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub raw_body: String,
    pub rendered_body: Option<String>,
    pub latency_ms: u64,
    pub error_kind: Option<FetchErrorKind>,
    pub error_message: Option<String>,
}

impl FetchResult {
    /// A failed fetch with no body.
    pub fn failure(url: &str, kind: FetchErrorKind, message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            final_url: url.to_string(),
            http_status: None,
            headers: Vec::new(),
            raw_body: String::new(),
            rendered_body: None,
            latency_ms,
            error_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }

    /// Whether the body is usable for detection.
    pub fn usable(&self) -> bool {
        self.error_kind.is_none() && !self.raw_body.trim().is_empty()
    }
}

/// Cloudflare interstitial phrases; a body containing one is a challenge
/// page, not the product page.
const CHALLENGE_MARKERS: &[&str] = &[
    "just a moment",
    "checking if the site connection is secure",
    "attention required! | cloudflare",
    "cf-browser-verification",
];

/// Whether a body looks like an anti-bot challenge page.
pub fn is_challenge_page(body: &str) -> bool {
    let lower = body.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Anything that turns a URL into a [`FetchResult`].
///
/// The production implementation is [`Fetcher`]; tests script one.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult;

    /// Release held resources; default is a no-op.
    async fn shutdown(&self) {}
}

/// The fetch pipeline: challenge-aware HTTP first, headless render as a
/// fallback when enabled.
pub struct Fetcher {
    client: ChallengeAwareClient,
    delays: HostDelayTracker,
    pool: Option<BrowserPool>,
    min_body_len: usize,
}

impl Fetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = ChallengeAwareClient::new(config)?;
        let delays = HostDelayTracker::new(std::time::Duration::from_secs(config.per_host_min_delay));
        let pool = if config.enable_render {
            Some(BrowserPool::new(
                Box::new(CommandRenderer::new(
                    config.render_command.clone(),
                    std::time::Duration::from_secs(config.fetch_timeout),
                )),
                config.max_browsers,
            ))
        } else {
            None
        };
        Ok(Self {
            client,
            delays,
            pool,
            min_body_len: config.min_body_len,
        })
    }

    /// Fetch a page, honouring per-host politeness.
    pub async fn fetch(&self, url: &str) -> FetchResult {
        if let Some(host) = crate::utils::url::host_of(url) {
            self.delays.wait(&host).await;
        }

        let started = Instant::now();
        let mut result = self.client.get(url).await;

        if self.should_render(&result) {
            if let Some(pool) = &self.pool {
                match pool.render(url).await {
                    Ok(body) => {
                        tracing::debug!(url, "renderer produced {} bytes", body.len());
                        result.rendered_body = Some(body);
                        // A successful render supersedes a challenge block.
                        if result.error_kind == Some(FetchErrorKind::Blocked) {
                            result.error_kind = None;
                            result.error_message = None;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(url, error = %e, "headless render failed");
                    }
                }
            }
        }

        result.latency_ms = started.elapsed().as_millis() as u64;
        if let Some(host) = crate::utils::url::host_of(url) {
            self.delays.mark_complete(&host);
        }
        result
    }

    fn should_render(&self, result: &FetchResult) -> bool {
        if self.pool.is_none() {
            return false;
        }
        if result.error_kind == Some(FetchErrorKind::Blocked) {
            return true;
        }
        if result.error_kind.is_some() {
            return false;
        }
        result.raw_body.trim().len() < self.min_body_len || is_challenge_page(&result.raw_body)
    }

    /// Release pooled browser resources.
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }
}

#[async_trait]
impl PageSource for Fetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        Fetcher::fetch(self, url).await
    }

    async fn shutdown(&self) {
        self.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_transience() {
        assert!(FetchErrorKind::Timeout.is_transient());
        assert!(FetchErrorKind::ServerError.is_transient());
        assert!(!FetchErrorKind::Blocked.is_transient());
        assert!(!FetchErrorKind::Decode.is_transient());
    }

    #[test]
    fn test_challenge_page_detection() {
        assert!(is_challenge_page("<title>Just a moment...</title>"));
        assert!(is_challenge_page(
            "Checking if the site connection is secure. Ray ID: 123"
        ));
        assert!(!is_challenge_page("<h1>KVM VPS — Add to cart</h1>"));
    }

    #[test]
    fn test_failure_result_not_usable() {
        let r = FetchResult::failure("https://example.com", FetchErrorKind::Dns, "no such host", 5);
        assert!(!r.usable());
        assert_eq!(r.error_kind, Some(FetchErrorKind::Dns));
    }

    #[tokio::test]
    async fn test_render_triggers() {
        let mut config = FetcherConfig::default();
        config.enable_render = true;
        let mut fetcher = Fetcher::new(&config).unwrap();
        fetcher.pool = Some(BrowserPool::new(
            Box::new(render::test_support::ScriptedRenderer::new("<p>ok</p>")),
            1,
        ));

        let ok = |body: &str| FetchResult {
            final_url: "https://example.com".to_string(),
            http_status: Some(200),
            headers: Vec::new(),
            raw_body: body.to_string(),
            rendered_body: None,
            latency_ms: 1,
            error_kind: None,
            error_message: None,
        };

        // Healthy long body: no render.
        assert!(!fetcher.should_render(&ok(&"x".repeat(500))));
        // Short body: render.
        assert!(fetcher.should_render(&ok("stub")));
        // Challenge shell: render.
        assert!(fetcher.should_render(&ok(&format!("Just a moment...{}", "x".repeat(500)))));
        // Blocked: render.
        let blocked = FetchResult::failure("https://example.com", FetchErrorKind::Blocked, "403", 1);
        assert!(fetcher.should_render(&blocked));
        // Hard failure: no render.
        let dns = FetchResult::failure("https://example.com", FetchErrorKind::Dns, "nx", 1);
        assert!(!fetcher.should_render(&dns));
    }
}
