//! 偏好设置数据访问层（DAO）

use crate::im::preference::PreferenceStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 基于 SQLite 键值表的偏好存储
pub struct SqlitePreferenceStore {
    pool: Pool<Sqlite>,
}

impl SqlitePreferenceStore {
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self> {
        let store = Self { pool };
        store.ensure_table().await?;
        Ok(store)
    }

    async fn ensure_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS local_preferences (
                pref_key    TEXT PRIMARY KEY,
                pref_value  TEXT NOT NULL,
                update_time INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建偏好设置表失败")?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for SqlitePreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT pref_value FROM local_preferences WHERE pref_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("读取偏好设置失败: {}", key))?;
        Ok(row.map(|r| r.get::<String, _>("pref_value")))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO local_preferences (pref_key, pref_value, update_time) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("写入偏好设置失败: {}", key))?;
        debug!("[Prefs] 写入 {}", key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM local_preferences WHERE pref_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("删除偏好设置失败: {}", key))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM local_preferences")
            .execute(&self.pool)
            .await
            .context("清空偏好设置失败")?;
        debug!("[Prefs] 已清空");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::db::create_sqlite_pool;

    #[tokio::test]
    async fn sqlite_store_round_trip() {
        let pool = create_sqlite_pool("sqlite::memory:").await.unwrap();
        let store = SqlitePreferenceStore::new(pool).await.unwrap();

        assert_eq!(store.get("userId").await.unwrap(), None);
        store.put("userId", "alice").await.unwrap();
        store.put("userId", "alice2").await.unwrap();
        store.put("name", "Alice").await.unwrap();
        assert_eq!(store.get("userId").await.unwrap().as_deref(), Some("alice2"));

        store.remove("name").await.unwrap();
        assert_eq!(store.get("name").await.unwrap(), None);

        store.clear().await.unwrap();
        assert_eq!(store.get("userId").await.unwrap(), None);
    }
}
