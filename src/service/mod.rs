// src/service/mod.rs

//! Programmatic surface consumed by the bot front-end.
//!
//! Thin argument-checking layer over the catalog and store: resolves the
//! calling user, enforces bans and admin rights, and maps everything to
//! the error envelope the front-end renders for humans.

use crate::catalog::Catalog;
use crate::error::{AppError, Result};
use crate::models::{Item, User, UserPrefs};
use crate::store::{ItemFilter, Store};

#[derive(Clone)]
pub struct MonitorService {
    catalog: Catalog,
}

impl MonitorService {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    fn store(&self) -> &Store {
        self.catalog.store()
    }

    /// Register a URL for monitoring on behalf of a user.
    pub async fn add_item(
        &self,
        user_id: &str,
        name: &str,
        url: &str,
        config_text: &str,
    ) -> Result<i64> {
        let user = self.catalog.touch_user(user_id).await?;
        self.catalog.add_item(&user, name, url, config_text, false).await
    }

    /// Admin variant: the item becomes visible to every user.
    pub async fn add_global_item(
        &self,
        admin_id: &str,
        name: &str,
        url: &str,
        config_text: &str,
    ) -> Result<i64> {
        let admin = self.require_admin(admin_id).await?;
        self.catalog.add_item(&admin, name, url, config_text, true).await
    }

    pub async fn remove_item(&self, user_id: &str, item_id: i64) -> Result<()> {
        let user = self.catalog.touch_user(user_id).await?;
        if user.is_banned {
            return Err(AppError::Banned(user.user_id));
        }
        self.catalog.remove_item(&user, item_id).await
    }

    /// Items visible to the user: their own plus global entries.
    pub async fn list_items(&self, user_id: &str, page: u32, page_size: u32) -> Result<Vec<Item>> {
        let user = self.catalog.touch_user(user_id).await?;
        self.catalog.list_items(&user, page, page_size).await
    }

    /// Apply a partial preference update.
    pub async fn set_user_prefs(&self, user_id: &str, prefs: UserPrefs) -> Result<()> {
        let user = self.catalog.touch_user(user_id).await?;
        if user.is_banned {
            return Err(AppError::Banned(user.user_id));
        }
        if let Some(Some(quiet)) = &prefs.quiet_hours {
            if quiet.start > 23 || quiet.end > 23 {
                return Err(AppError::validation("quiet hours must be within 0–23"));
            }
        }
        self.store().set_user_prefs(user_id, prefs).await?;
        Ok(())
    }

    /// Full catalog listing, admins only.
    pub async fn admin_list_all(&self, admin_id: &str, filter: ItemFilter) -> Result<Vec<Item>> {
        self.require_admin(admin_id).await?;
        self.store().list_items(filter).await
    }

    pub async fn admin_ban(&self, admin_id: &str, user_id: &str) -> Result<()> {
        let admin = self.require_admin(admin_id).await?;
        if admin.user_id == user_id {
            return Err(AppError::validation("admins cannot ban themselves"));
        }
        // Create-on-ban so a never-seen abuser stays banned once they show up.
        self.catalog.touch_user(user_id).await?;
        self.store().set_user_banned(user_id, true).await?;
        Ok(())
    }

    pub async fn admin_unban(&self, admin_id: &str, user_id: &str) -> Result<()> {
        self.require_admin(admin_id).await?;
        self.store().set_user_banned(user_id, false).await?;
        Ok(())
    }

    /// Freeze scheduling for an item without losing its history.
    pub async fn admin_disable_item(&self, admin_id: &str, item_id: i64) -> Result<()> {
        self.require_admin(admin_id).await?;
        if !self.store().set_item_enabled(item_id, false).await? {
            return Err(AppError::NotFound(item_id));
        }
        Ok(())
    }

    pub async fn admin_enable_item(&self, admin_id: &str, item_id: i64) -> Result<()> {
        self.require_admin(admin_id).await?;
        if !self.store().set_item_enabled(item_id, true).await? {
            return Err(AppError::NotFound(item_id));
        }
        Ok(())
    }

    async fn require_admin(&self, admin_id: &str) -> Result<User> {
        let user = self.catalog.touch_user(admin_id).await?;
        if !user.is_admin {
            return Err(AppError::NotAdmin(admin_id.to_string()));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Config, QuietHours};
    use crate::store::test_support;

    async fn service() -> MonitorService {
        let store = test_support::store().await;
        MonitorService::new(Catalog::new(store, &Config::default()))
    }

    async fn make_admin(service: &MonitorService, user_id: &str) {
        service.catalog.touch_user(user_id).await.unwrap();
        service.store().set_user_admin(user_id, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let service = service().await;
        let id = service
            .add_item("u1", "KVM 2G", "https://example.com/kvm2g", "2G RAM")
            .await
            .unwrap();
        let items = service.list_items("u1", 0, 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, id);

        // Another user does not see it.
        let items = service.list_items("u2", 0, 10).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_global_item_visible_to_all() {
        let service = service().await;
        make_admin(&service, "admin").await;
        service
            .add_global_item("admin", "Flash sale", "https://example.com/flash", "")
            .await
            .unwrap();
        let items = service.list_items("u2", 0, 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_global);
    }

    #[tokio::test]
    async fn test_global_add_requires_admin() {
        let service = service().await;
        let err = service
            .add_global_item("mortal", "x", "https://example.com/x", "")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAdmin(_)));
    }

    #[tokio::test]
    async fn test_banned_user_cannot_add() {
        let service = service().await;
        make_admin(&service, "admin").await;
        service.admin_ban("admin", "u1").await.unwrap();
        let err = service
            .add_item("u1", "x", "https://example.com/x", "")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Banned(_)));
    }

    #[tokio::test]
    async fn test_admin_cannot_self_ban() {
        let service = service().await;
        make_admin(&service, "admin").await;
        assert!(service.admin_ban("admin", "admin").await.is_err());
    }

    #[tokio::test]
    async fn test_prefs_validation() {
        let service = service().await;
        let err = service
            .set_user_prefs(
                "u1",
                UserPrefs {
                    quiet_hours: Some(Some(QuietHours { start: 25, end: 7 })),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        service
            .set_user_prefs(
                "u1",
                UserPrefs {
                    quiet_hours: Some(Some(QuietHours::new(23, 7))),
                    cooldown_seconds: Some(1200),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let user = service.store().get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.cooldown_seconds, 1200);
        assert_eq!(user.quiet_hours, Some(QuietHours::new(23, 7)));
    }

    #[tokio::test]
    async fn test_admin_disable_item() {
        let service = service().await;
        make_admin(&service, "admin").await;
        let id = service
            .add_item("u1", "x", "https://example.com/x", "")
            .await
            .unwrap();
        service.admin_disable_item("admin", id).await.unwrap();
        let item = service.store().get_item(id).await.unwrap().unwrap();
        assert!(!item.enabled);

        assert!(matches!(
            service.admin_disable_item("admin", 9999).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_admin_list_all_with_filter() {
        let service = service().await;
        make_admin(&service, "admin").await;
        service
            .add_item("u1", "a", "https://racknerd.com/a", "")
            .await
            .unwrap();
        service
            .add_item("u2", "b", "https://example.com/b", "")
            .await
            .unwrap();

        let all = service
            .admin_list_all("admin", ItemFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let tagged = service
            .admin_list_all(
                "admin",
                ItemFilter {
                    vendor_tag: Some("racknerd".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
    }
}
