// src/models/check.rs

//! Poll results and detector outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ItemStatus;

/// Detector-level verdict. Unlike [`ItemStatus`] this has no error state;
/// detector failures collapse to `Inconclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Available,
    Unavailable,
    #[default]
    Inconclusive,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Available => "available",
            Verdict::Unavailable => "unavailable",
            Verdict::Inconclusive => "inconclusive",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "available" => Verdict::Available,
            "unavailable" => Verdict::Unavailable,
            _ => Verdict::Inconclusive,
        }
    }

    /// The item status a fused verdict maps to.
    pub fn to_status(self) -> ItemStatus {
        match self {
            Verdict::Available => ItemStatus::Available,
            Verdict::Unavailable => ItemStatus::Unavailable,
            Verdict::Inconclusive => ItemStatus::Unknown,
        }
    }
}

/// Output of a single detector run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorResult {
    pub verdict: Verdict,
    /// In [0, 1].
    pub confidence: f64,
    pub evidence: String,
}

impl DetectorResult {
    pub fn new(verdict: Verdict, confidence: f64, evidence: impl Into<String>) -> Self {
        Self {
            verdict,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: evidence.into(),
        }
    }

    /// The neutral result used for timeouts and missing inputs.
    pub fn inconclusive(evidence: impl Into<String>) -> Self {
        Self::new(Verdict::Inconclusive, 0.0, evidence)
    }
}

/// A named detector result, as persisted in check history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorRecord {
    pub name: String,
    pub verdict: Verdict,
    pub confidence: f64,
    pub evidence: String,
}

impl DetectorRecord {
    pub fn new(name: &str, result: &DetectorResult) -> Self {
        Self {
            name: name.to_string(),
            verdict: result.verdict,
            confidence: result.confidence,
            evidence: result.evidence.clone(),
        }
    }
}

/// One poll result, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRecord {
    pub item_id: i64,
    pub check_time: DateTime<Utc>,
    /// Fused verdict, or `Error` when the fetch failed outright.
    pub status: ItemStatus,
    pub confidence: f64,
    pub detectors: Vec<DetectorRecord>,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub fingerprint_hash: Option<String>,
}

impl CheckRecord {
    /// Whether this record represents a fetch-level failure.
    pub fn is_error(&self) -> bool {
        self.status == ItemStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_roundtrip() {
        for v in [Verdict::Available, Verdict::Unavailable, Verdict::Inconclusive] {
            assert_eq!(Verdict::parse(v.as_str()), v);
        }
    }

    #[test]
    fn test_confidence_clamped() {
        let r = DetectorResult::new(Verdict::Available, 1.7, "boost overflow");
        assert_eq!(r.confidence, 1.0);
        let r = DetectorResult::new(Verdict::Available, -0.2, "negative");
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_verdict_to_status() {
        assert_eq!(Verdict::Available.to_status(), ItemStatus::Available);
        assert_eq!(Verdict::Inconclusive.to_status(), ItemStatus::Unknown);
    }

    #[test]
    fn test_detector_record_serializes() {
        let rec = DetectorRecord::new(
            "keyword",
            &DetectorResult::new(Verdict::Unavailable, 0.7, "matched 'sold out'"),
        );
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"unavailable\""));
        assert!(json.contains("sold out"));
    }
}
