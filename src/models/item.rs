// src/models/item.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored stock status of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Unknown,
    Available,
    Unavailable,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Unknown => "unknown",
            ItemStatus::Available => "available",
            ItemStatus::Unavailable => "unavailable",
            ItemStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "available" => ItemStatus::Available,
            "unavailable" => ItemStatus::Unavailable,
            "error" => ItemStatus::Error,
            _ => ItemStatus::Unknown,
        }
    }
}

/// Owner sentinel for items added by administrators for everyone.
pub const SYSTEM_OWNER: &str = "system";

/// A monitored product page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub item_id: i64,
    pub owner_id: String,
    pub is_global: bool,
    pub name: String,
    /// Canonical URL; unique across the catalog.
    pub url: String,
    pub vendor_tag: Option<String>,
    pub config_text: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_status: ItemStatus,
    pub last_confidence: f64,
    pub consecutive_error_count: u32,
    pub fingerprint_hash: Option<String>,
    /// Memoised API endpoint discovered by the probe detector.
    pub api_endpoint: Option<String>,
}

impl Item {
    /// Host portion of the canonical URL, used for politeness locks.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }
}

/// Admission-time payload for a new item.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub owner_id: String,
    pub is_global: bool,
    pub name: String,
    pub url: String,
    pub vendor_tag: Option<String>,
    pub config_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ItemStatus::Unknown,
            ItemStatus::Available,
            ItemStatus::Unavailable,
            ItemStatus::Error,
        ] {
            assert_eq!(ItemStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_status_parse_unknown_fallback() {
        assert_eq!(ItemStatus::parse("bogus"), ItemStatus::Unknown);
        assert_eq!(ItemStatus::parse(""), ItemStatus::Unknown);
    }

    #[test]
    fn test_item_host() {
        let item = Item {
            item_id: 1,
            owner_id: "u1".into(),
            is_global: false,
            name: "test".into(),
            url: "https://Example.com/vps/2g".into(),
            vendor_tag: None,
            config_text: String::new(),
            enabled: true,
            created_at: Utc::now(),
            last_checked_at: None,
            last_status: ItemStatus::Unknown,
            last_confidence: 0.0,
            consecutive_error_count: 0,
            fingerprint_hash: None,
            api_endpoint: None,
        };
        assert_eq!(item.host(), Some("example.com".to_string()));
    }
}
