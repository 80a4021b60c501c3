// src/detect/api_probe.rs

//! Back-end endpoint discovery and probing.
//!
//! A one-shot discovery pass scans the page for candidate JSON endpoints;
//! the best one is memoised on the item. Subsequent polls hit the endpoint
//! directly and read the stock fields out of the response. APIs are
//! treated as authoritative when they speak clearly.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::models::{DetectorResult, Verdict};
use crate::utils::url::resolve;

use super::{DetectionInput, Detector};

pub const NAME: &str = "api_probe";

/// JSON keys that carry stock state.
const STOCK_KEYS: &[&str] = &["in_stock", "instock", "available", "stock", "inventory", "quantity"];

pub struct ApiProbe {
    client: Option<reqwest::Client>,
    patterns: Vec<Regex>,
}

impl ApiProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .ok();
        Self {
            client,
            patterns: Self::compile_patterns(),
        }
    }

    fn compile_patterns() -> Vec<Regex> {
        [
            r#"/api/[^"'\s<>\\]+"#,
            r#"/ajax/[^"'\s<>\\]+"#,
            r#"/cart/[^"'\s<>\\]+"#,
            r#"/product/[^"'\s<>\\]*\.json[^"'\s<>\\]*"#,
            r#"[^"'\s<>\\]*\.php\?[^"'\s<>\\]*action=[^"'\s<>\\]*stock[^"'\s<>\\]*"#,
            r#"/check[^"'\s<>\\]*stock[^"'\s<>\\]*"#,
            r#"/inventory[^"'\s<>\\]*"#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    }

    /// Scan a page body for candidate endpoints; returns the best one,
    /// resolved against the page URL.
    pub fn discover(&self, body: &str, base_url: &str) -> Option<String> {
        let mut candidates: Vec<String> = Vec::new();
        for pattern in &self.patterns {
            for m in pattern.find_iter(body) {
                candidates.push(m.as_str().to_string());
            }
        }
        candidates.sort();
        candidates.dedup();

        let best = candidates
            .into_iter()
            .max_by_key(|c| (score(c), std::cmp::Reverse(c.clone())))?;
        resolve(base_url, &best)
    }

    /// Probe a memoised endpoint.
    pub async fn run_endpoint(&self, endpoint: Option<&str>, timeout: Duration) -> DetectorResult {
        let endpoint = match endpoint {
            Some(e) => e,
            None => return DetectorResult::inconclusive("no endpoint discovered"),
        };
        let client = match &self.client {
            Some(c) => c,
            None => return DetectorResult::inconclusive("probe client unavailable"),
        };

        let request = client.get(endpoint).send();
        let response = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                return DetectorResult::inconclusive(format!("probe failed: {e}"));
            }
            Err(_) => return DetectorResult::inconclusive("timeout"),
        };

        if !response.status().is_success() {
            return DetectorResult::inconclusive(format!(
                "probe returned HTTP {}",
                response.status().as_u16()
            ));
        }

        let value: serde_json::Value = match tokio::time::timeout(timeout, response.json()).await {
            Ok(Ok(v)) => v,
            Ok(Err(_)) => return DetectorResult::inconclusive("probe response is not JSON"),
            Err(_) => return DetectorResult::inconclusive("timeout"),
        };

        analyze(&value)
    }
}

#[async_trait]
impl Detector for ApiProbe {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, input: &DetectionInput<'_>) -> DetectorResult {
        self.run_endpoint(input.api_endpoint, Duration::from_secs(10)).await
    }
}

/// Candidate ranking: stock-ish paths beat generic API paths.
fn score(candidate: &str) -> i32 {
    let lower = candidate.to_lowercase();
    let mut score = 0;
    if lower.contains("stock") {
        score += 3;
    }
    if lower.contains("inventory") {
        score += 3;
    }
    if lower.contains("/api/") {
        score += 2;
    }
    if lower.contains(".json") {
        score += 2;
    }
    if lower.contains("cart") {
        score += 1;
    }
    if lower.contains("ajax") {
        score += 1;
    }
    score
}

/// Interpret a JSON body: the first stock-keyed field wins.
pub(crate) fn analyze(value: &serde_json::Value) -> DetectorResult {
    match find_stock_field(value) {
        Some((key, found)) => match found {
            serde_json::Value::Bool(b) => DetectorResult::new(
                if *b { Verdict::Available } else { Verdict::Unavailable },
                0.9,
                format!("api field {key:?} = {b}"),
            ),
            serde_json::Value::Number(n) => {
                let count = n.as_f64().unwrap_or(0.0);
                DetectorResult::new(
                    if count > 0.0 { Verdict::Available } else { Verdict::Unavailable },
                    0.9,
                    format!("api field {key:?} = {n}"),
                )
            }
            serde_json::Value::String(s) => analyze_string(&key, s.as_str()),
            _ => DetectorResult::inconclusive(format!("api field {key:?} has unusable type")),
        },
        None => DetectorResult::inconclusive("no stock field in api response"),
    }
}

fn analyze_string(key: &str, s: &str) -> DetectorResult {
    let lower = s.trim().to_lowercase();
    // "available" contains "unavailable"'s stem, and "10 in stock" contains
    // "0": exact matches for literals, phrase containment for the rest.
    let negative = lower == "0"
        || lower == "false"
        || lower.contains("out of stock")
        || lower.contains("sold out")
        || lower.contains("unavailable")
        || lower.contains("缺货");
    if negative {
        return DetectorResult::new(
            Verdict::Unavailable,
            0.8,
            format!("api field {key:?} = {s:?}"),
        );
    }
    let positive = lower == "true"
        || lower.contains("in stock")
        || lower.contains("instock")
        || lower.contains("available")
        || lower.contains("有货");
    if positive {
        return DetectorResult::new(Verdict::Available, 0.8, format!("api field {key:?} = {s:?}"));
    }
    DetectorResult::inconclusive(format!("api field {key:?} = {s:?} is ambiguous"))
}

/// Depth-first search for the first key containing a stock term.
fn find_stock_field(value: &serde_json::Value) -> Option<(String, &serde_json::Value)> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, inner) in map {
                let lower = key.to_lowercase();
                if STOCK_KEYS.iter().any(|k| lower.contains(k)) {
                    return Some((key.clone(), inner));
                }
            }
            for inner in map.values() {
                if let Some(found) = find_stock_field(inner) {
                    return Some(found);
                }
            }
            None
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_stock_field),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn probe() -> ApiProbe {
        ApiProbe::new(Duration::from_secs(5))
    }

    #[test]
    fn test_discover_prefers_stock_endpoint() {
        let body = r#"
            <script src="/api/session"></script>
            fetch('/api/product/stock?id=99');
            <a href="/cart/view">cart</a>
        "#;
        let found = probe().discover(body, "https://example.com/vps").unwrap();
        assert_eq!(found, "https://example.com/api/product/stock?id=99");
    }

    #[test]
    fn test_discover_whmcs_style() {
        let body = r#"url: "ajax.php?action=checkstock&pid=12""#;
        let found = probe().discover(body, "https://example.com/store/page");
        assert!(found.unwrap().contains("action=checkstock"));
    }

    #[test]
    fn test_discover_nothing() {
        assert!(probe().discover("<p>static page</p>", "https://example.com").is_none());
    }

    #[test]
    fn test_analyze_bool_field() {
        let r = analyze(&json!({"product": {"in_stock": true}}));
        assert_eq!(r.verdict, Verdict::Available);
        assert!((r.confidence - 0.9).abs() < 1e-9);

        let r = analyze(&json!({"available": false}));
        assert_eq!(r.verdict, Verdict::Unavailable);
    }

    #[test]
    fn test_analyze_count_field() {
        let r = analyze(&json!({"stock": 7}));
        assert_eq!(r.verdict, Verdict::Available);
        let r = analyze(&json!({"stock": 0}));
        assert_eq!(r.verdict, Verdict::Unavailable);
    }

    #[test]
    fn test_analyze_string_field() {
        let r = analyze(&json!({"availability": "Out of Stock"}));
        assert_eq!(r.verdict, Verdict::Unavailable);
        assert!(r.confidence < 0.85, "string evidence must not trigger the override");
    }

    #[test]
    fn test_analyze_nested_array() {
        let r = analyze(&json!({"plans": [{"name": "1g"}, {"name": "2g", "quantity": 3}]}));
        assert_eq!(r.verdict, Verdict::Available);
    }

    #[test]
    fn test_analyze_no_field() {
        let r = analyze(&json!({"name": "kvm", "price": 18.88}));
        assert_eq!(r.verdict, Verdict::Inconclusive);
    }

    #[tokio::test]
    async fn test_no_endpoint_is_inconclusive() {
        let r = probe().run_endpoint(None, Duration::from_secs(1)).await;
        assert_eq!(r.verdict, Verdict::Inconclusive);
    }
}
