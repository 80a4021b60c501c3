// src/fetch/client.rs

//! Challenge-aware HTTP client.
//!
//! Sends a browser-like header set and rotates through a user-agent pool,
//! which clears the common "verify your browser" interstitials that key on
//! bare client fingerprints. Actual JavaScript challenges fall through to
//! the renderer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::Result;
use crate::models::FetcherConfig;

use super::{is_challenge_page, FetchErrorKind, FetchResult};

pub struct ChallengeAwareClient {
    client: reqwest::Client,
    user_agents: Vec<String>,
    next_agent: AtomicUsize,
}

impl ChallengeAwareClient {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout))
            .gzip(true)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            user_agents: config.user_agents.clone(),
            next_agent: AtomicUsize::new(0),
        })
    }

    /// Issue one GET. Failures are folded into the result.
    pub async fn get(&self, url: &str) -> FetchResult {
        let started = Instant::now();
        let request = self
            .client
            .get(url)
            .headers(self.browser_headers())
            .header("User-Agent", self.next_user_agent());

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let latency = started.elapsed().as_millis() as u64;
                return FetchResult::failure(url, classify_error(&e), e.to_string(), latency);
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                let latency = started.elapsed().as_millis() as u64;
                let mut result =
                    FetchResult::failure(url, FetchErrorKind::Decode, e.to_string(), latency);
                result.http_status = Some(status.as_u16());
                return result;
            }
        };
        let latency = started.elapsed().as_millis() as u64;

        let error_kind = classify_response(status.as_u16(), &body);
        let error_message = error_kind.map(|k| format!("HTTP {} ({})", status.as_u16(), k.as_str()));

        FetchResult {
            final_url,
            http_status: Some(status.as_u16()),
            headers,
            raw_body: body,
            rendered_body: None,
            latency_ms: latency,
            error_kind,
            error_message,
        }
    }

    fn next_user_agent(&self) -> &str {
        let idx = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        &self.user_agents[idx]
    }

    fn browser_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            "Accept-Language",
            HeaderValue::from_static("en-US,en;q=0.9,zh-CN,zh;q=0.8"),
        );
        headers.insert("Cache-Control", HeaderValue::from_static("max-age=0"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        headers
    }
}

/// Map a transport error to the failure taxonomy.
fn classify_error(e: &reqwest::Error) -> FetchErrorKind {
    if e.is_timeout() {
        return FetchErrorKind::Timeout;
    }
    let chain = format!("{e:?}").to_lowercase();
    if chain.contains("dns") || chain.contains("resolve") {
        FetchErrorKind::Dns
    } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
        FetchErrorKind::Tls
    } else if e.is_connect() {
        FetchErrorKind::Connect
    } else if e.is_body() || e.is_decode() {
        FetchErrorKind::Decode
    } else {
        FetchErrorKind::Connect
    }
}

/// Map an HTTP response to the failure taxonomy, or `None` when usable.
fn classify_response(status: u16, body: &str) -> Option<FetchErrorKind> {
    match status {
        200..=299 => {
            if is_challenge_page(body) {
                // 2xx challenge shells still hide the real page.
                Some(FetchErrorKind::Blocked)
            } else {
                None
            }
        }
        403 | 503 if is_challenge_page(body) => Some(FetchErrorKind::Blocked),
        403 => Some(FetchErrorKind::Blocked),
        500..=599 => Some(FetchErrorKind::ServerError),
        _ => Some(FetchErrorKind::Blocked),
    }
}
