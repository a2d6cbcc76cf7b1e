//! SQLite 数据库工具：统一创建连接池

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

/// 创建 SQLite 连接池
///
/// 内存库每个连接都是独立的数据库，因此只保留一个常驻连接。
pub async fn create_sqlite_pool(db_url: &str) -> Result<Pool<Sqlite>> {
    let options = if db_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    options
        .connect(db_url)
        .await
        .with_context(|| format!("连接SQLite数据库失败: {}", db_url))
}
