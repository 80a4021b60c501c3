// src/scheduler/transition.rs

//! Status-change classification with hysteresis.
//!
//! The evaluator decides what the *stored* status becomes and whether a
//! notification event fires. A single reading never flips a long-standing
//! status on its own: it needs extra confidence or a corroborating
//! reading from the recent history.

use crate::detect::FusedVerdict;
use crate::models::{CheckRecord, Item, ItemStatus, NotificationKind, Verdict};

/// Extra confidence a lone reading needs to flip the stored status.
pub const HYSTERESIS_MARGIN: f64 = 0.15;

/// History depth consulted for corroboration.
pub const HISTORY_DEPTH: u32 = 3;

/// Outcome of evaluating one fused verdict against the stored state.
#[derive(Debug, Clone, Default)]
pub struct TransitionDecision {
    /// Stored status (and confidence) to apply; `None` keeps the old one.
    pub apply_status: Option<(ItemStatus, f64)>,
    /// Notification to queue.
    pub emit: Option<NotificationKind>,
    /// Poll again sooner than the regular interval.
    pub recheck_soon: bool,
}

pub struct TransitionEvaluator {
    confidence_threshold: f64,
}

impl TransitionEvaluator {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
        }
    }

    /// Evaluate a fused verdict. `history` holds the most recent records
    /// *before* the current poll, newest first.
    pub fn evaluate(
        &self,
        item: &Item,
        fused: &FusedVerdict,
        history: &[CheckRecord],
    ) -> TransitionDecision {
        match fused.verdict {
            Verdict::Inconclusive => TransitionDecision {
                apply_status: None,
                emit: None,
                recheck_soon: fused.suspicious,
            },
            Verdict::Available => self.evaluate_available(item, fused, history),
            Verdict::Unavailable => self.evaluate_unavailable(item, fused, history),
        }
    }

    fn evaluate_available(
        &self,
        item: &Item,
        fused: &FusedVerdict,
        history: &[CheckRecord],
    ) -> TransitionDecision {
        if fused.confidence < self.confidence_threshold {
            return TransitionDecision::default();
        }
        if item.last_status == ItemStatus::Available {
            // Already stored as available; refresh confidence, no event.
            return TransitionDecision {
                apply_status: Some((ItemStatus::Available, fused.confidence)),
                emit: None,
                recheck_soon: false,
            };
        }

        let corroborated = fused.confidence >= self.confidence_threshold + HYSTERESIS_MARGIN
            || history
                .iter()
                .take((HISTORY_DEPTH - 1) as usize)
                .any(|r| r.status == ItemStatus::Available);

        if corroborated {
            TransitionDecision {
                apply_status: Some((ItemStatus::Available, fused.confidence)),
                emit: Some(NotificationKind::Restock),
                recheck_soon: false,
            }
        } else {
            // First sighting: hold the stored status and let the next poll
            // confirm. The current record lands in history, so agreement on
            // the next tick satisfies the corroboration clause.
            TransitionDecision {
                apply_status: None,
                emit: None,
                recheck_soon: true,
            }
        }
    }

    fn evaluate_unavailable(
        &self,
        item: &Item,
        fused: &FusedVerdict,
        history: &[CheckRecord],
    ) -> TransitionDecision {
        if fused.confidence < self.confidence_threshold {
            return TransitionDecision::default();
        }
        match item.last_status {
            ItemStatus::Unavailable => TransitionDecision {
                apply_status: Some((ItemStatus::Unavailable, fused.confidence)),
                emit: None,
                recheck_soon: false,
            },
            ItemStatus::Available => {
                // Two-of-last-three (current reading included) must agree
                // before an outage is declared.
                let prior_unavailable = history
                    .iter()
                    .take((HISTORY_DEPTH - 1) as usize)
                    .filter(|r| r.status == ItemStatus::Unavailable)
                    .count();
                if prior_unavailable + 1 >= 2 {
                    TransitionDecision {
                        apply_status: Some((ItemStatus::Unavailable, fused.confidence)),
                        emit: Some(NotificationKind::Outage),
                        recheck_soon: false,
                    }
                } else {
                    TransitionDecision {
                        apply_status: None,
                        emit: None,
                        recheck_soon: true,
                    }
                }
            }
            ItemStatus::Unknown | ItemStatus::Error => TransitionDecision {
                // First classification; nothing to announce.
                apply_status: Some((ItemStatus::Unavailable, fused.confidence)),
                emit: None,
                recheck_soon: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item_with_status(status: ItemStatus) -> Item {
        Item {
            item_id: 1,
            owner_id: "u1".into(),
            is_global: false,
            name: "kvm 2g".into(),
            url: "https://example.com/vps".into(),
            vendor_tag: None,
            config_text: String::new(),
            enabled: true,
            created_at: Utc::now(),
            last_checked_at: Some(Utc::now()),
            last_status: status,
            last_confidence: 0.8,
            consecutive_error_count: 0,
            fingerprint_hash: None,
            api_endpoint: None,
        }
    }

    fn fused(verdict: Verdict, confidence: f64) -> FusedVerdict {
        FusedVerdict {
            verdict,
            confidence,
            evidence: "test".into(),
            suspicious: false,
        }
    }

    fn record(status: ItemStatus) -> CheckRecord {
        CheckRecord {
            item_id: 1,
            check_time: Utc::now(),
            status,
            confidence: 0.8,
            detectors: Vec::new(),
            http_status: Some(200),
            latency_ms: 10,
            error_kind: None,
            error_message: None,
            fingerprint_hash: None,
        }
    }

    fn evaluator() -> TransitionEvaluator {
        TransitionEvaluator::new(0.6)
    }

    #[test]
    fn test_restock_with_high_confidence_flips_immediately() {
        let item = item_with_status(ItemStatus::Unavailable);
        let decision = evaluator().evaluate(&item, &fused(Verdict::Available, 0.8), &[]);
        assert_eq!(decision.apply_status, Some((ItemStatus::Available, 0.8)));
        assert_eq!(decision.emit, Some(NotificationKind::Restock));
    }

    #[test]
    fn test_single_moderate_reading_does_not_flip() {
        // Hysteresis invariant: one available reading after a long
        // unavailable run holds unless confidence clears the margin.
        let item = item_with_status(ItemStatus::Unavailable);
        let history: Vec<CheckRecord> =
            (0..10).map(|_| record(ItemStatus::Unavailable)).collect();
        let decision = evaluator().evaluate(&item, &fused(Verdict::Available, 0.7), &history);
        assert_eq!(decision.apply_status, None);
        assert_eq!(decision.emit, None);
        assert!(decision.recheck_soon);
    }

    #[test]
    fn test_corroborated_reading_flips() {
        let item = item_with_status(ItemStatus::Unavailable);
        let history = vec![record(ItemStatus::Available), record(ItemStatus::Unavailable)];
        let decision = evaluator().evaluate(&item, &fused(Verdict::Available, 0.7), &history);
        assert_eq!(decision.apply_status, Some((ItemStatus::Available, 0.7)));
        assert_eq!(decision.emit, Some(NotificationKind::Restock));
    }

    #[test]
    fn test_margin_boundary() {
        let item = item_with_status(ItemStatus::Unavailable);
        // 0.6 + 0.15 exactly clears the margin.
        let decision = evaluator().evaluate(&item, &fused(Verdict::Available, 0.75), &[]);
        assert_eq!(decision.emit, Some(NotificationKind::Restock));
        let decision = evaluator().evaluate(&item, &fused(Verdict::Available, 0.749), &[]);
        assert_eq!(decision.emit, None);
    }

    #[test]
    fn test_restock_from_unknown() {
        let item = item_with_status(ItemStatus::Unknown);
        let decision = evaluator().evaluate(&item, &fused(Verdict::Available, 0.9), &[]);
        assert_eq!(decision.emit, Some(NotificationKind::Restock));
    }

    #[test]
    fn test_available_refresh_no_event() {
        let item = item_with_status(ItemStatus::Available);
        let decision = evaluator().evaluate(&item, &fused(Verdict::Available, 0.9), &[]);
        assert_eq!(decision.apply_status, Some((ItemStatus::Available, 0.9)));
        assert_eq!(decision.emit, None);
    }

    #[test]
    fn test_outage_needs_two_of_three() {
        let item = item_with_status(ItemStatus::Available);
        // Only the current reading says unavailable.
        let history = vec![record(ItemStatus::Available), record(ItemStatus::Available)];
        let decision = evaluator().evaluate(&item, &fused(Verdict::Unavailable, 0.8), &history);
        assert_eq!(decision.emit, None);
        assert!(decision.recheck_soon);

        // One prior unavailable reading corroborates.
        let history = vec![record(ItemStatus::Unavailable), record(ItemStatus::Available)];
        let decision = evaluator().evaluate(&item, &fused(Verdict::Unavailable, 0.8), &history);
        assert_eq!(decision.emit, Some(NotificationKind::Outage));
        assert_eq!(decision.apply_status, Some((ItemStatus::Unavailable, 0.8)));
    }

    #[test]
    fn test_first_unavailable_classification_silent() {
        let item = item_with_status(ItemStatus::Unknown);
        let decision = evaluator().evaluate(&item, &fused(Verdict::Unavailable, 0.8), &[]);
        assert_eq!(decision.apply_status, Some((ItemStatus::Unavailable, 0.8)));
        assert_eq!(decision.emit, None);
    }

    #[test]
    fn test_inconclusive_never_emits() {
        let item = item_with_status(ItemStatus::Unavailable);
        let decision = evaluator().evaluate(&item, &fused(Verdict::Inconclusive, 0.0), &[]);
        assert_eq!(decision.apply_status, None);
        assert_eq!(decision.emit, None);
    }

    #[test]
    fn test_suspicious_drift_requests_recheck() {
        let item = item_with_status(ItemStatus::Unavailable);
        let mut verdict = fused(Verdict::Inconclusive, 0.3);
        verdict.suspicious = true;
        let decision = evaluator().evaluate(&item, &verdict, &[]);
        assert!(decision.recheck_soon);
        assert_eq!(decision.emit, None);
    }

    #[test]
    fn test_low_confidence_verdict_ignored() {
        let item = item_with_status(ItemStatus::Unavailable);
        let decision = evaluator().evaluate(&item, &fused(Verdict::Available, 0.5), &[]);
        assert_eq!(decision.apply_status, None);
        assert_eq!(decision.emit, None);
    }
}
