//! 进程内文档存储实现
//!
//! 带实时变更通知：每次写入按写入前后是否命中订阅条件计算 Added / Modified / Removed。
//! 用于演示 CLI 和单元测试，支持注入写入失败、流错误与操作延迟。

use crate::im::error::StreamError;
use crate::im::store::{DocumentStore, Query, Subscription};
use crate::im::types::{ChangeBatch, ChangeKind, Document, DocumentChange, Fields};
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

enum Target {
    Query(Query),
    Document { collection: String, id: String },
}

impl Target {
    fn collection(&self) -> &str {
        match self {
            Target::Query(q) => &q.collection,
            Target::Document { collection, .. } => collection,
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        match self {
            Target::Query(q) => q.matches(doc),
            Target::Document { id, .. } => doc.id == *id,
        }
    }
}

struct Subscriber {
    target: Target,
    tx: mpsc::UnboundedSender<ChangeBatch>,
}

#[derive(Default)]
struct Inner {
    /// 集合名 -> 按插入顺序排列的文档
    collections: HashMap<String, Vec<Document>>,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn find(&self, collection: &str, id: &str) -> Option<&Document> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
    }

    /// 向受影响的订阅者推送单条变更，并清理已关闭的订阅
    fn notify(&mut self, collection: &str, before: Option<&Document>, after: Option<&Document>) {
        self.subscribers.retain(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if sub.target.collection() != collection {
                return true;
            }
            let was = before.map(|d| sub.target.matches(d)).unwrap_or(false);
            let is = after.map(|d| sub.target.matches(d)).unwrap_or(false);
            let change = match (was, is, before, after) {
                (false, true, _, Some(doc)) => DocumentChange::new(ChangeKind::Added, doc.clone()),
                (true, true, _, Some(doc)) => {
                    DocumentChange::new(ChangeKind::Modified, doc.clone())
                }
                (true, false, Some(doc), _) => {
                    DocumentChange::new(ChangeKind::Removed, doc.clone())
                }
                _ => return true,
            };
            sub.tx.send(Ok(vec![change])).is_ok()
        });
    }
}

/// 进程内文档存储
pub struct InMemoryDocumentStore {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
    fail_writes: AtomicBool,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            latency: None,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// 每个操作在执行前等待 `latency`，用于模拟网络往返与并发竞争
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 开启后所有写操作返回错误
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 向某集合上的全部订阅投递一次流错误
    pub async fn emit_stream_error(&self, collection: &str, message: &str) {
        let inner = self.inner.lock().await;
        for sub in inner
            .subscribers
            .iter()
            .filter(|s| s.target.collection() == collection)
        {
            let _ = sub
                .tx
                .send(Err(StreamError::Transient(message.to_string())));
        }
    }

    /// 集合中当前全部文档（按插入顺序）
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let inner = self.inner.lock().await;
        inner.collections.get(collection).cloned().unwrap_or_default()
    }

    /// 仍然存活的订阅数
    pub async fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .subscribers
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("文档存储拒绝写入");
        }
        Ok(())
    }

    async fn register(&self, target: Target) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        let initial: Vec<DocumentChange> = inner
            .collections
            .get(target.collection())
            .map(|docs| {
                docs.iter()
                    .filter(|d| target.matches(d))
                    .map(|d| DocumentChange::new(ChangeKind::Added, d.clone()))
                    .collect()
            })
            .unwrap_or_default();
        debug!(
            "[Store] 新订阅 collection={}，初始快照 {} 条",
            target.collection(),
            initial.len()
        );
        let _ = tx.send(Ok(initial));
        inner.subscribers.push(Subscriber { target, tx });
        Subscription::new(rx)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn subscribe(&self, query: Query) -> Result<Subscription> {
        self.simulate_latency().await;
        Ok(self.register(Target::Query(query)).await)
    }

    async fn subscribe_document(&self, collection: &str, id: &str) -> Result<Subscription> {
        self.simulate_latency().await;
        Ok(self
            .register(Target::Document {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await)
    }

    async fn get(&self, query: Query) -> Result<Vec<Document>> {
        self.simulate_latency().await;
        let inner = self.inner.lock().await;
        Ok(inner
            .collections
            .get(&query.collection)
            .map(|docs| docs.iter().filter(|d| query.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String> {
        self.simulate_latency().await;
        self.check_writable()?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let doc = Document::new(id.clone(), fields);
        let mut inner = self.inner.lock().await;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        inner.notify(collection, None, Some(&doc));
        Ok(id)
    }

    async fn create(&self, collection: &str, id: &str, fields: Fields) -> Result<bool> {
        self.simulate_latency().await;
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        if inner.find(collection, id).is_some() {
            debug!("[Store] 文档已存在，跳过创建: {}/{}", collection, id);
            return Ok(false);
        }
        let doc = Document::new(id, fields);
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        inner.notify(collection, None, Some(&doc));
        Ok(true)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        self.simulate_latency().await;
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        let Some(doc) = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
        else {
            warn!("[Store] 更新不存在的文档: {}/{}", collection, id);
            bail!("文档不存在: {}/{}", collection, id);
        };
        let before = doc.clone();
        for (key, value) in fields {
            if value == Value::Null {
                doc.fields.remove(&key);
            } else {
                doc.fields.insert(key, value);
            }
        }
        let after = doc.clone();
        inner.notify(collection, Some(&before), Some(&after));
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.simulate_latency().await;
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        let removed = inner.collections.get_mut(collection).and_then(|docs| {
            let pos = docs.iter().position(|d| d.id == id)?;
            Some(docs.remove(pos))
        });
        if let Some(doc) = removed {
            inner.notify(collection, Some(&doc), None);
        }
        Ok(())
    }
}
