// src/catalog/mod.rs

//! Admission-time checks over the store.
//!
//! Thin façade: canonicalises URLs, infers vendor tags, enforces per-user
//! quotas. Everything durable lives in the store.

pub mod canonical;
pub mod vendor;

use crate::error::{AppError, Result};
use crate::models::{Config, Item, NewItem, User};
use crate::store::Store;

pub use canonical::canonicalise;
pub use vendor::VendorTable;

/// Catalog of monitored items.
#[derive(Clone)]
pub struct Catalog {
    store: Store,
    vendors: VendorTable,
    daily_add_limit: u32,
    default_cooldown: u64,
    default_daily_limit: u32,
}

impl Catalog {
    pub fn new(store: Store, config: &Config) -> Self {
        Self {
            store,
            vendors: VendorTable::new(config.catalog.vendor_tags.clone()),
            daily_add_limit: config.catalog.daily_add_limit,
            default_cooldown: config.notifier.cooldown_seconds,
            default_daily_limit: config.notifier.daily_notify_limit,
        }
    }

    /// Register (or fetch) the calling user.
    pub async fn touch_user(&self, user_id: &str) -> Result<User> {
        self.store
            .get_or_create_user(user_id, self.default_cooldown, self.default_daily_limit)
            .await
    }

    /// Admit a new item for monitoring.
    ///
    /// Admins may pass `is_global` to add fleet-wide entries that bypass
    /// the daily quota.
    pub async fn add_item(
        &self,
        user: &User,
        name: &str,
        raw_url: &str,
        config_text: &str,
        is_global: bool,
    ) -> Result<i64> {
        if user.is_banned {
            return Err(AppError::Banned(user.user_id.clone()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation("item name must not be empty"));
        }

        let url = canonicalise(raw_url)?;
        let vendor_tag = self.vendors.infer(&url);
        let new = NewItem {
            owner_id: user.user_id.clone(),
            is_global: is_global && user.is_admin,
            name: name.to_string(),
            url,
            vendor_tag,
            config_text: config_text.trim().to_string(),
        };
        let limit = if user.is_admin { u32::MAX } else { self.daily_add_limit };
        self.store.insert_item(new, limit).await
    }

    /// Remove an item the caller owns; admins may remove anything.
    pub async fn remove_item(&self, user: &User, item_id: i64) -> Result<()> {
        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or(AppError::NotFound(item_id))?;
        if item.owner_id != user.user_id && !user.is_admin {
            return Err(AppError::NotOwner {
                user_id: user.user_id.clone(),
                item_id,
            });
        }
        self.store.delete_item(item_id).await?;
        Ok(())
    }

    /// Items visible to the user, paged.
    pub async fn list_items(&self, user: &User, page: u32, page_size: u32) -> Result<Vec<Item>> {
        let size = page_size.clamp(1, 100);
        self.store.list_items_for_user(&user.user_id, page, size).await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
