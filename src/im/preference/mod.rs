//! 本地偏好设置模块
//!
//! 保存当前登录用户的身份信息与推送 token。

pub mod dao;

use crate::im::entities::UserIdentity;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

pub use dao::SqlitePreferenceStore;

/// 偏好设置键名
pub mod keys {
    pub const USER_ID: &str = "userId";
    pub const NAME: &str = "name";
    pub const IMAGE: &str = "image";
    pub const FCM_TOKEN: &str = "fcmToken";
}

/// 字符串键值偏好存储
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// 进程内偏好存储
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.values.write().await.clear();
        Ok(())
    }
}

/// 读取已保存的登录身份；没有用户 ID 时返回 None
pub async fn load_identity(prefs: &dyn PreferenceStore) -> Result<Option<UserIdentity>> {
    let Some(user_id) = prefs.get(keys::USER_ID).await? else {
        debug!("[Prefs] 未找到已登录用户");
        return Ok(None);
    };
    let name = prefs.get(keys::NAME).await?.unwrap_or_default();
    Ok(Some(UserIdentity {
        user_id,
        name,
        image: prefs.get(keys::IMAGE).await?,
        push_token: prefs.get(keys::FCM_TOKEN).await?,
    }))
}

/// 保存登录身份
pub async fn save_identity(prefs: &dyn PreferenceStore, identity: &UserIdentity) -> Result<()> {
    prefs.put(keys::USER_ID, &identity.user_id).await?;
    prefs.put(keys::NAME, &identity.name).await?;
    match &identity.image {
        Some(image) => prefs.put(keys::IMAGE, image).await?,
        None => prefs.remove(keys::IMAGE).await?,
    }
    match &identity.push_token {
        Some(token) => prefs.put(keys::FCM_TOKEN, token).await?,
        None => prefs.remove(keys::FCM_TOKEN).await?,
    }
    Ok(())
}
