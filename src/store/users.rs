// src/store/users.rs

//! User rows: registration, preferences, moderation flags.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{QuietHours, User, UserPrefs};

use super::items::parse_time;
use super::Store;

impl Store {
    /// Fetch a user, creating the row with the given defaults on first
    /// contact. The bot front-end calls this on every interaction.
    pub async fn get_or_create_user(
        &self,
        user_id: &str,
        default_cooldown: u64,
        default_daily_limit: u32,
    ) -> Result<User> {
        let user_id = user_id.to_string();
        let now = Utc::now();
        let user = self
            .conn()
            .call(move |conn| {
                let existing = conn
                    .query_row(
                        &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                        params![user_id],
                        user_from_row,
                    )
                    .optional()?;
                if let Some(user) = existing {
                    return Ok(user);
                }

                conn.execute(
                    "INSERT INTO users (user_id, cooldown_seconds, daily_notify_limit, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        user_id,
                        default_cooldown as i64,
                        default_daily_limit as i64,
                        now.to_rfc3339(),
                    ],
                )?;
                let user = conn.query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                    params![user_id],
                    user_from_row,
                )?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user_id = user_id.to_string();
        let user = self
            .conn()
            .call(move |conn| {
                let user = conn
                    .query_row(
                        &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                        params![user_id],
                        user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    /// Apply a partial preference update; absent fields keep their value.
    pub async fn set_user_prefs(&self, user_id: &str, prefs: UserPrefs) -> Result<bool> {
        let user_id = user_id.to_string();
        let changed = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut any = 0;
                if let Some(cooldown) = prefs.cooldown_seconds {
                    any += tx.execute(
                        "UPDATE users SET cooldown_seconds = ?2 WHERE user_id = ?1",
                        params![user_id, cooldown as i64],
                    )?;
                }
                if let Some(limit) = prefs.daily_notify_limit {
                    any += tx.execute(
                        "UPDATE users SET daily_notify_limit = ?2 WHERE user_id = ?1",
                        params![user_id, limit as i64],
                    )?;
                }
                if let Some(quiet) = prefs.quiet_hours {
                    any += tx.execute(
                        "UPDATE users SET quiet_start = ?2, quiet_end = ?3 WHERE user_id = ?1",
                        params![
                            user_id,
                            quiet.map(|q| q.start as i64),
                            quiet.map(|q| q.end as i64),
                        ],
                    )?;
                }
                if let Some(enabled) = prefs.notifications_enabled {
                    any += tx.execute(
                        "UPDATE users SET notifications_enabled = ?2 WHERE user_id = ?1",
                        params![user_id, enabled as i64],
                    )?;
                }
                tx.commit()?;
                Ok(any > 0)
            })
            .await?;
        Ok(changed)
    }

    pub async fn set_user_banned(&self, user_id: &str, banned: bool) -> Result<bool> {
        let user_id = user_id.to_string();
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE users SET is_banned = ?2 WHERE user_id = ?1",
                    params![user_id, banned as i64],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    pub async fn set_user_admin(&self, user_id: &str, admin: bool) -> Result<bool> {
        let user_id = user_id.to_string();
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE users SET is_admin = ?2 WHERE user_id = ?1",
                    params![user_id, admin as i64],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }
}

const USER_COLUMNS: &str = "user_id, is_admin, is_banned, daily_added_count, daily_window_start, \
                            cooldown_seconds, daily_notify_limit, quiet_start, quiet_end, \
                            notifications_enabled, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let window_start: Option<String> = row.get(4)?;
    let quiet_start: Option<i64> = row.get(7)?;
    let quiet_end: Option<i64> = row.get(8)?;
    let created_at: String = row.get(10)?;
    let quiet_hours = match (quiet_start, quiet_end) {
        (Some(start), Some(end)) => Some(QuietHours::new(start as u8, end as u8)),
        _ => None,
    };
    Ok(User {
        user_id: row.get(0)?,
        is_admin: row.get::<_, i64>(1)? != 0,
        is_banned: row.get::<_, i64>(2)? != 0,
        daily_added_count: row.get::<_, i64>(3)? as u32,
        daily_window_start: window_start.as_deref().and_then(parse_time),
        cooldown_seconds: row.get::<_, i64>(5)? as u64,
        daily_notify_limit: row.get::<_, i64>(6)? as u32,
        quiet_hours,
        notifications_enabled: row.get::<_, i64>(9)? != 0,
        created_at: parse_time(&created_at).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;

    #[tokio::test]
    async fn test_create_then_fetch() {
        let store = test_support::store().await;
        let created = store.get_or_create_user("u1", 600, 10).await.unwrap();
        assert_eq!(created.cooldown_seconds, 600);
        assert!(!created.is_admin);
        assert!(created.notifications_enabled);

        // Second call returns the same row, not a reset one.
        store
            .set_user_prefs(
                "u1",
                UserPrefs {
                    cooldown_seconds: Some(1200),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let again = store.get_or_create_user("u1", 600, 10).await.unwrap();
        assert_eq!(again.cooldown_seconds, 1200);
    }

    #[tokio::test]
    async fn test_quiet_hours_roundtrip() {
        let store = test_support::store().await;
        store.get_or_create_user("u1", 600, 10).await.unwrap();
        store
            .set_user_prefs(
                "u1",
                UserPrefs {
                    quiet_hours: Some(Some(QuietHours::new(23, 7))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.quiet_hours, Some(QuietHours::new(23, 7)));

        // Clearing works too.
        store
            .set_user_prefs(
                "u1",
                UserPrefs {
                    quiet_hours: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.quiet_hours, None);
    }

    #[tokio::test]
    async fn test_ban_flag() {
        let store = test_support::store().await;
        store.get_or_create_user("u1", 600, 10).await.unwrap();
        assert!(store.set_user_banned("u1", true).await.unwrap());
        let user = store.get_user("u1").await.unwrap().unwrap();
        assert!(user.is_banned);
    }

    #[tokio::test]
    async fn test_unknown_user_updates_return_false() {
        let store = test_support::store().await;
        assert!(!store.set_user_banned("ghost", true).await.unwrap());
        assert!(store.get_user("ghost").await.unwrap().is_none());
    }
}
