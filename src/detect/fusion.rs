// src/detect/fusion.rs

//! Weighted combination of detector votes into a single verdict.
//!
//! Deterministic: the same four results and weights always fuse to the
//! same verdict and confidence.

use crate::models::{DetectorResult, DetectorWeights, Verdict};

/// Final fused verdict for one poll.
#[derive(Debug, Clone)]
pub struct FusedVerdict {
    pub verdict: Verdict,
    pub confidence: f64,
    pub evidence: String,
    /// Fingerprint drift with no detector agreeing: re-check sooner.
    pub suspicious: bool,
}

/// Boost applied to agreeing detectors when the fingerprint drifted.
const DRIFT_BOOST: f64 = 0.1;

/// An API verdict at or above this confidence overrides the vote.
const API_OVERRIDE_THRESHOLD: f64 = 0.85;

/// Fuse the four detector results.
#[allow(clippy::too_many_arguments)]
pub fn fuse(
    keyword: &DetectorResult,
    dom: &DetectorResult,
    api: &DetectorResult,
    fingerprint: &DetectorResult,
    fingerprint_changed: bool,
    weights: DetectorWeights,
    confidence_threshold: f64,
) -> FusedVerdict {
    let weights = weights.normalized();
    let mut voters: Vec<(&str, f64, DetectorResult)> = vec![
        ("keyword", weights.keyword, keyword.clone()),
        ("dom", weights.dom, dom.clone()),
        ("api", weights.api, api.clone()),
        ("fingerprint", weights.fingerprint, fingerprint.clone()),
    ];

    let any_vote = voters.iter().any(|(_, _, r)| r.verdict != Verdict::Inconclusive);

    // Fingerprint drift escalation: agreeing detectors gain confidence;
    // drift with nothing else speaking is merely suspicious.
    if fingerprint_changed && any_vote {
        for (_, _, result) in voters.iter_mut() {
            if result.verdict != Verdict::Inconclusive {
                result.confidence = (result.confidence + DRIFT_BOOST).min(1.0);
            }
        }
    }
    let suspicious = fingerprint_changed && !any_vote;

    // Weights renormalise over the detectors that actually voted, so a
    // lone confident signal is not diluted by silent detectors.
    let active_weight: f64 = voters
        .iter()
        .filter(|(_, _, r)| r.verdict != Verdict::Inconclusive)
        .map(|(_, w, _)| *w)
        .sum();

    let mut s_available = 0.0;
    let mut s_unavailable = 0.0;
    if active_weight > f64::EPSILON {
        for (_, weight, result) in &voters {
            let share = weight / active_weight;
            match result.verdict {
                Verdict::Available => s_available += share * result.confidence,
                Verdict::Unavailable => s_unavailable += share * result.confidence,
                Verdict::Inconclusive => {}
            }
        }
    }

    // Authoritative API override.
    let api_result = &voters[2].2;
    if api_result.verdict != Verdict::Inconclusive
        && api_result.confidence >= API_OVERRIDE_THRESHOLD
    {
        return FusedVerdict {
            verdict: api_result.verdict,
            confidence: api_result.confidence,
            evidence: format!("api override: {}", api_result.evidence),
            suspicious,
        };
    }

    let (verdict, confidence) = if s_available > s_unavailable {
        (Verdict::Available, s_available)
    } else if s_unavailable > s_available {
        (Verdict::Unavailable, s_unavailable)
    } else {
        (Verdict::Inconclusive, 0.0)
    };

    if verdict == Verdict::Inconclusive || confidence < confidence_threshold {
        return FusedVerdict {
            verdict: Verdict::Inconclusive,
            confidence,
            evidence: summarize(&voters, Verdict::Inconclusive),
            suspicious,
        };
    }

    FusedVerdict {
        verdict,
        confidence,
        evidence: summarize(&voters, verdict),
        suspicious,
    }
}

/// Concatenate the evidence of detectors that contributed to the verdict.
fn summarize(voters: &[(&str, f64, DetectorResult)], verdict: Verdict) -> String {
    let contributing: Vec<String> = voters
        .iter()
        .filter(|(_, _, r)| {
            if verdict == Verdict::Inconclusive {
                r.verdict != Verdict::Inconclusive
            } else {
                r.verdict == verdict
            }
        })
        .map(|(name, _, r)| format!("{name}: {}", r.evidence))
        .collect();
    if contributing.is_empty() {
        "all detectors inconclusive".to_string()
    } else {
        contributing.join("; ")
    }
}
