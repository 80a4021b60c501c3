// src/detect/fingerprint.rs

//! Page fingerprinting for drift detection.
//!
//! The fingerprint tolerates benign churn (timestamps, ad rotation) by
//! hashing only the stock-relevant surface: a DOM skeleton when a rendered
//! body exists, otherwise price/button/status fragments of the raw body
//! plus a coarse length bucket.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};

use crate::models::DetectorResult;

use super::{DetectionInput, Detector};

pub const NAME: &str = "fingerprint";

/// Raw-body length bucket width, bytes.
const LENGTH_BUCKET: usize = 256;

/// Outcome of a fingerprint pass; `changed` feeds the fusion escalation.
#[derive(Debug, Clone)]
pub struct FingerprintOutcome {
    pub result: DetectorResult,
    pub new_hash: Option<String>,
    pub changed: bool,
}

pub struct FingerprintDetector;

impl FingerprintDetector {
    /// Compare the page against the stored fingerprint.
    pub fn evaluate(input: &DetectionInput<'_>) -> FingerprintOutcome {
        if !input.fetch.usable() && input.fetch.rendered_body.is_none() {
            return FingerprintOutcome {
                result: DetectorResult::inconclusive("no body to fingerprint"),
                new_hash: None,
                changed: false,
            };
        }

        let hash = match &input.fetch.rendered_body {
            Some(rendered) if !rendered.trim().is_empty() => dom_skeleton_hash(rendered),
            _ => body_hash(&input.fetch.raw_body),
        };

        match input.previous_fingerprint {
            None => FingerprintOutcome {
                result: DetectorResult::inconclusive("first check, fingerprint recorded"),
                new_hash: Some(hash),
                changed: false,
            },
            Some(previous) if previous == hash => FingerprintOutcome {
                result: DetectorResult::new(
                    crate::models::Verdict::Inconclusive,
                    0.2,
                    "fingerprint unchanged",
                ),
                new_hash: Some(hash),
                changed: false,
            },
            Some(_) => FingerprintOutcome {
                result: DetectorResult::new(
                    crate::models::Verdict::Inconclusive,
                    0.3,
                    "fingerprint changed",
                ),
                new_hash: Some(hash),
                changed: true,
            },
        }
    }
}

#[async_trait]
impl Detector for FingerprintDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, input: &DetectionInput<'_>) -> DetectorResult {
        Self::evaluate(input).result
    }
}

/// Skeleton of a rendered DOM: element names, ids, classes, disabled
/// flags, plus the stock-relevant text fragments.
fn dom_skeleton_hash(rendered: &str) -> String {
    let document = Html::parse_document(rendered);
    let mut skeleton = String::new();

    if let Ok(all) = Selector::parse("*") {
        for element in document.select(&all) {
            let value = element.value();
            skeleton.push_str(value.name());
            if let Some(id) = value.attr("id") {
                skeleton.push('#');
                skeleton.push_str(id);
            }
            if let Some(class) = value.attr("class") {
                let mut classes: Vec<&str> = class.split_whitespace().collect();
                classes.sort_unstable();
                for c in classes {
                    skeleton.push('.');
                    skeleton.push_str(c);
                }
            }
            if value.attr("disabled").is_some() {
                skeleton.push_str("[disabled]");
            }
            skeleton.push(';');
        }
    }

    skeleton.push('|');
    skeleton.push_str(&important_fragments(rendered));
    hex_digest(&skeleton)
}

/// Fallback for raw bodies: stock-relevant fragments plus a length bucket.
fn body_hash(raw: &str) -> String {
    let normalised = raw.replace("\r\n", "\n");
    let fragments = important_fragments(&normalised);
    let input = format!("{fragments}|len:{}", normalised.len() / LENGTH_BUCKET);
    hex_digest(&input)
}

/// Price amounts, button texts and stock phrases: the page surface a
/// restock actually moves.
fn important_fragments(body: &str) -> String {
    static PRICE: OnceLock<Regex> = OnceLock::new();
    static BUTTON: OnceLock<Regex> = OnceLock::new();
    static STATUS: OnceLock<Regex> = OnceLock::new();

    let price = PRICE.get_or_init(|| Regex::new(r"[$¥€£][\d,]+\.?\d*").expect("price regex"));
    let button = BUTTON
        .get_or_init(|| Regex::new(r"(?is)<button[^>]*>(.{0,80}?)</button>").expect("button regex"));
    let status = STATUS.get_or_init(|| {
        Regex::new(r"(?i)(in stock|out of stock|sold out|available|unavailable|库存|缺货|售罄|现货)[^<]{0,20}")
            .expect("status regex")
    });

    let lower = body.to_lowercase();
    let mut parts: Vec<String> = Vec::new();
    for m in price.find_iter(&lower) {
        parts.push(m.as_str().to_string());
    }
    for caps in button.captures_iter(&lower) {
        if let Some(text) = caps.get(1) {
            let cleaned = crate::utils::text::collapse_whitespace(text.as_str());
            if !cleaned.is_empty() {
                parts.push(cleaned);
            }
        }
    }
    for m in status.find_iter(&lower) {
        parts.push(m.as_str().trim().to_string());
    }
    parts.join("\u{1f}")
}

fn hex_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
