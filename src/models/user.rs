// src/models/user.rs

//! Users and their notification preferences.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A daily window during which deliveries are deferred.
///
/// Hours of day in the recipient's local convention; when `start > end`
/// the window crosses midnight (e.g. 23 → 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: u8,
    pub end: u8,
}

impl QuietHours {
    pub fn new(start: u8, end: u8) -> Self {
        Self {
            start: start % 24,
            end: end % 24,
        }
    }

    /// Whether `hour` falls inside the quiet window.
    pub fn contains(&self, hour: u8) -> bool {
        let hour = hour % 24;
        if self.start == self.end {
            // Degenerate window: never quiet.
            false
        } else if self.start < self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// A bot-registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// External identifier provided by the bot front-end.
    pub user_id: String,
    pub is_admin: bool,
    pub is_banned: bool,
    pub daily_added_count: u32,
    pub daily_window_start: Option<DateTime<Utc>>,
    pub cooldown_seconds: u64,
    pub daily_notify_limit: u32,
    pub quiet_hours: Option<QuietHours>,
    pub notifications_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A fresh user with the configured defaults.
    pub fn new(user_id: impl Into<String>, cooldown_seconds: u64, daily_notify_limit: u32) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
            is_banned: false,
            daily_added_count: 0,
            daily_window_start: None,
            cooldown_seconds,
            daily_notify_limit,
            quiet_hours: None,
            notifications_enabled: true,
            created_at: Utc::now(),
        }
    }

    /// Whether the daily-add window has lapsed and the count should reset.
    pub fn add_window_expired(&self, now: DateTime<Utc>) -> bool {
        match self.daily_window_start {
            Some(start) => now - start >= Duration::hours(24),
            None => true,
        }
    }

    /// Effective adds inside the current window.
    pub fn effective_added_count(&self, now: DateTime<Utc>) -> u32 {
        if self.add_window_expired(now) {
            0
        } else {
            self.daily_added_count
        }
    }

    /// When the daily-add quota resets, for the `quota_exceeded` hint.
    pub fn quota_resets_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.daily_window_start {
            Some(start) if !self.add_window_expired(now) => start + Duration::hours(24),
            _ => now,
        }
    }
}

/// Partial preference update applied through the service surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPrefs {
    pub cooldown_seconds: Option<u64>,
    pub daily_notify_limit: Option<u32>,
    pub quiet_hours: Option<Option<QuietHours>>,
    pub notifications_enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_hours_same_day() {
        let q = QuietHours::new(9, 17);
        assert!(q.contains(9));
        assert!(q.contains(12));
        assert!(!q.contains(17));
        assert!(!q.contains(3));
    }

    #[test]
    fn test_quiet_hours_crossing_midnight() {
        let q = QuietHours::new(23, 7);
        assert!(q.contains(23));
        assert!(q.contains(2));
        assert!(q.contains(6));
        assert!(!q.contains(7));
        assert!(!q.contains(12));
    }

    #[test]
    fn test_quiet_hours_degenerate() {
        let q = QuietHours::new(5, 5);
        for h in 0..24 {
            assert!(!q.contains(h));
        }
    }

    #[test]
    fn test_add_window_reset() {
        let now = Utc::now();
        let mut user = User::new("u1", 600, 10);
        user.daily_added_count = 7;
        user.daily_window_start = Some(now - Duration::hours(25));
        assert!(user.add_window_expired(now));
        assert_eq!(user.effective_added_count(now), 0);

        user.daily_window_start = Some(now - Duration::hours(3));
        assert!(!user.add_window_expired(now));
        assert_eq!(user.effective_added_count(now), 7);
    }

    #[test]
    fn test_quota_reset_hint() {
        let now = Utc::now();
        let mut user = User::new("u1", 600, 10);
        user.daily_window_start = Some(now - Duration::hours(3));
        let resets = user.quota_resets_at(now);
        assert_eq!(resets, user.daily_window_start.unwrap() + Duration::hours(24));
    }
}
