// src/models/event.rs

//! Transition events and the notification ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ItemStatus;

/// Kind of notification, as persisted in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Restock,
    Outage,
    AdminSummary,
    /// Record of a quiet-hours deferral that aged out before delivery.
    SkippedStale,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Restock => "restock",
            NotificationKind::Outage => "outage",
            NotificationKind::AdminSummary => "admin_summary",
            NotificationKind::SkippedStale => "skipped_stale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "restock" => Some(NotificationKind::Restock),
            "outage" => Some(NotificationKind::Outage),
            "admin_summary" => Some(NotificationKind::AdminSummary),
            "skipped_stale" => Some(NotificationKind::SkippedStale),
            _ => None,
        }
    }
}

/// A detected status transition awaiting aggregation.
///
/// Transient: owned by the aggregator and never persisted. A restock
/// missed during a crash is acceptable; a duplicate is worse.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub item_id: i64,
    pub item_name: String,
    pub item_url: String,
    pub owner_id: String,
    pub detected_at: DateTime<Utc>,
    pub from_status: ItemStatus,
    pub to_status: ItemStatus,
    pub confidence: f64,
    pub kind: NotificationKind,
}

/// One row of the append-only notification ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub item_id: i64,
    pub recipient_id: String,
    pub sent_at: DateTime<Utc>,
    pub kind: NotificationKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            NotificationKind::Restock,
            NotificationKind::Outage,
            NotificationKind::AdminSummary,
            NotificationKind::SkippedStale,
        ] {
            assert_eq!(NotificationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NotificationKind::parse("bogus"), None);
    }
}
