// src/detect/mod.rs

//! Stock detectors and the fusion layer.
//!
//! Four heterogeneous signals — keyword scan, rendered-DOM inspection,
//! discovered API endpoints and fingerprint drift — each produce a
//! [`DetectorResult`]; fusion combines them into one confidence-scored
//! verdict. A detector that exceeds its timeout contributes an
//! inconclusive result instead of failing the poll.

pub mod api_probe;
pub mod dom;
pub mod fingerprint;
pub mod fusion;
pub mod keyword;

use std::time::Duration;

use async_trait::async_trait;

use crate::fetch::FetchResult;
use crate::models::{DetectorConfig, DetectorRecord, DetectorResult};
use crate::utils::text::strip_html;

pub use api_probe::ApiProbe;
pub use dom::DomDetector;
pub use fingerprint::FingerprintDetector;
pub use fusion::{fuse, FusedVerdict};
pub use keyword::KeywordDetector;

/// Everything a detector may look at for one poll.
pub struct DetectionInput<'a> {
    pub fetch: &'a FetchResult,
    /// Lowercased, HTML-stripped body text.
    pub text: String,
    pub vendor_tag: Option<&'a str>,
    pub previous_fingerprint: Option<&'a str>,
    /// Memoised API endpoint, when discovery already ran.
    pub api_endpoint: Option<&'a str>,
}

impl<'a> DetectionInput<'a> {
    pub fn new(
        fetch: &'a FetchResult,
        vendor_tag: Option<&'a str>,
        previous_fingerprint: Option<&'a str>,
        api_endpoint: Option<&'a str>,
    ) -> Self {
        // Prefer the rendered body for text scanning when present.
        let source = fetch.rendered_body.as_deref().unwrap_or(&fetch.raw_body);
        Self {
            fetch,
            text: strip_html(source),
            vendor_tag,
            previous_fingerprint,
            api_endpoint,
        }
    }
}

/// A single detection capability.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, input: &DetectionInput<'_>) -> DetectorResult;
}

/// Combined output of one detection pass.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub fused: FusedVerdict,
    pub records: Vec<DetectorRecord>,
    /// Fingerprint computed this pass; persisted on the item.
    pub new_fingerprint: Option<String>,
    /// Endpoint found by a discovery pass; memoised on the item.
    pub discovered_endpoint: Option<String>,
}

/// The configured detector set, run per poll.
pub struct DetectorSet {
    keyword: KeywordDetector,
    dom: DomDetector,
    api: ApiProbe,
    config: DetectorConfig,
}

impl DetectorSet {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            keyword: KeywordDetector::new(),
            dom: DomDetector::new(),
            api: ApiProbe::new(Duration::from_secs(config.detector_timeout)),
            config,
        }
    }

    /// Run all detectors against one fetch result and fuse their votes.
    pub async fn run(&self, input: &DetectionInput<'_>) -> DetectionOutcome {
        let timeout = Duration::from_secs(self.config.detector_timeout);

        // Endpoint discovery is a one-shot per item; afterwards the memoised
        // endpoint is probed directly.
        let discovered_endpoint = if input.api_endpoint.is_none()
            && self.config.enable_api_discovery
            && input.fetch.usable()
        {
            self.api.discover(&input.fetch.raw_body, &input.fetch.final_url)
        } else {
            None
        };
        let endpoint = input
            .api_endpoint
            .map(str::to_string)
            .or_else(|| discovered_endpoint.clone());

        let (keyword, dom, api) = tokio::join!(
            run_bounded(&self.keyword, input, timeout),
            run_bounded(&self.dom, input, timeout),
            self.api.run_endpoint(endpoint.as_deref(), timeout),
        );

        let fp = FingerprintDetector::evaluate(input);

        let records = vec![
            DetectorRecord::new(keyword::NAME, &keyword),
            DetectorRecord::new(dom::NAME, &dom),
            DetectorRecord::new(api_probe::NAME, &api),
            DetectorRecord::new(fingerprint::NAME, &fp.result),
        ];

        let fused = fuse(
            &keyword,
            &dom,
            &api,
            &fp.result,
            fp.changed,
            self.config.weights,
            self.config.confidence_threshold,
        );

        DetectionOutcome {
            fused,
            records,
            new_fingerprint: fp.new_hash,
            discovered_endpoint,
        }
    }
}

/// Apply the per-detector timeout; lateness is inconclusive, not an error.
async fn run_bounded(
    detector: &dyn Detector,
    input: &DetectionInput<'_>,
    timeout: Duration,
) -> DetectorResult {
    match tokio::time::timeout(timeout, detector.run(input)).await {
        Ok(result) => result,
        Err(_) => DetectorResult::inconclusive("timeout"),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::fetch::FetchResult;

    /// A successful fetch with the given body.
    pub fn fetched(body: &str) -> FetchResult {
        FetchResult {
            final_url: "https://example.com/vps".to_string(),
            http_status: Some(200),
            headers: Vec::new(),
            raw_body: body.to_string(),
            rendered_body: None,
            latency_ms: 50,
            error_kind: None,
            error_message: None,
        }
    }

    /// A successful fetch with a rendered body as well.
    pub fn rendered(raw: &str, rendered: &str) -> FetchResult {
        let mut fetch = fetched(raw);
        fetch.rendered_body = Some(rendered.to_string());
        fetch
    }
}
