//! 实时文档存储协作方接口
//!
//! 引擎只依赖这里的订阅 / 查询 / 写入原语，存储本身的协议与持久化不在本 crate 范围内。

pub mod memory;

use crate::im::types::{ChangeBatch, Document, Fields};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

pub use memory::InMemoryDocumentStore;

/// 等值过滤查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, String)>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
        }
    }

    /// 追加条件 `field == value`
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| doc.get_str(field) == Some(value.as_str()))
    }
}

/// 一个活跃订阅；drop 即取消订阅
///
/// 首个批次是初始快照（全部以 Added 形式投递），之后每个批次是增量变更。
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChangeBatch>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeBatch>) -> Self {
        Self { rx }
    }

    /// 等待下一个批次，订阅被存储端关闭时返回 None
    pub async fn next_batch(&mut self) -> Option<ChangeBatch> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = ChangeBatch;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// 文档存储协作方
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 订阅查询结果的变更
    async fn subscribe(&self, query: Query) -> Result<Subscription>;

    /// 订阅单个文档的变更
    async fn subscribe_document(&self, collection: &str, id: &str) -> Result<Subscription>;

    /// 一次性查询
    async fn get(&self, query: Query) -> Result<Vec<Document>>;

    /// 新增文档，返回存储分配的 ID
    async fn add(&self, collection: &str, fields: Fields) -> Result<String>;

    /// 以指定 ID 创建文档；文档已存在时不写入并返回 false
    async fn create(&self, collection: &str, id: &str, fields: Fields) -> Result<bool>;

    /// 局部更新；值为 null 的字段会被删除
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_matches_all_equality_filters() {
        let doc = Document::new(
            "m1",
            json!({"senderId": "a", "receiverId": "b"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert!(Query::new("chat").matches(&doc));
        assert!(Query::new("chat").where_eq("senderId", "a").matches(&doc));
        assert!(!Query::new("chat")
            .where_eq("senderId", "a")
            .where_eq("receiverId", "a")
            .matches(&doc));
        assert!(!Query::new("chat").where_eq("missing", "a").matches(&doc));
    }
}
