//! 会话解析：为参与者对找到已有会话或创建唯一一个
//!
//! 存在性检查按方向依次查询（我 -> 对端，再对端 -> 我），命中则更新最新消息。
//! 创建时默认使用由参与者对确定的文档 ID，并依赖存储的"仅在不存在时创建"，
//! 这样两端同时首发消息也只会产生一条会话记录。

use crate::im::change::FromDocument;
use crate::im::conversation::models::{ConversationRecord, PairKey};
use crate::im::entities::{UserIdentity, UserProfile};
use crate::im::store::{DocumentStore, Query};
use crate::im::types::fields;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 新会话的创建方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveStrategy {
    /// 以参与者对确定的 ID 创建，创建操作幂等
    #[default]
    CompositeKey,
    /// 查询后由存储分配 ID 创建；并发首发时可能产生重复会话
    QueryThenCreate,
}

/// 会话解析器，每个线程会话持有一个
pub struct ConversationResolver {
    store: Arc<dyn DocumentStore>,
    collection: String,
    strategy: ResolveStrategy,
    /// 已确认的会话 ID；锁在整个 resolve 期间持有，同一线程内的发送串行执行
    cached: Mutex<Option<String>>,
}

impl ConversationResolver {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        strategy: ResolveStrategy,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            strategy,
            cached: Mutex::new(None),
        }
    }

    pub async fn cached_id(&self) -> Option<String> {
        self.cached.lock().await.clone()
    }

    /// 解析会话 ID，并把 `text` 写为最新消息
    ///
    /// 缓存的记录已被删除（例如对端修复了重复会话）时重新查询或创建；
    /// 其他写入失败返回错误，缓存保持不变。
    pub async fn resolve(&self, me: &UserIdentity, peer: &UserProfile, text: &str) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        let existing = match cached.clone() {
            Some(id) => {
                debug!("[ConvResolve] 使用缓存的会话 ID: {}", id);
                let err = match self.update_last_message(&id, text, now).await {
                    Ok(()) => return Ok(id),
                    Err(e) => e,
                };
                let found = self.find_existing(&me.user_id, &peer.id).await?;
                if found.as_deref() == Some(id.as_str()) {
                    return Err(err);
                }
                warn!("[ConvResolve] 缓存的会话 {} 已不存在，重新解析: {:#}", id, err);
                *cached = None;
                found
            }
            None => self.find_existing(&me.user_id, &peer.id).await?,
        };

        if let Some(id) = existing {
            info!("[ConvResolve] 找到已有会话: {}", id);
            self.update_last_message(&id, text, now).await?;
            *cached = Some(id.clone());
            return Ok(id);
        }

        let id = self.create(me, peer, text, now).await?;
        *cached = Some(id.clone());
        Ok(id)
    }

    /// 依次查询两个方向，只有第一个方向无结果时才查询第二个
    pub async fn find_existing(&self, me: &str, peer: &str) -> Result<Option<String>> {
        for (sender, receiver) in [(me, peer), (peer, me)] {
            let docs = self
                .store
                .get(self.directional_query(sender, receiver))
                .await
                .context("查询会话失败")?;
            if let Some(doc) = docs.first() {
                if docs.len() > 1 {
                    warn!(
                        "[ConvResolve] 参与者对 {} -> {} 存在 {} 条会话记录，需要修复",
                        sender,
                        receiver,
                        docs.len()
                    );
                }
                return Ok(Some(doc.id.clone()));
            }
        }
        Ok(None)
    }

    /// 合并同一参与者对的重复会话记录，返回保留的会话 ID
    ///
    /// 保留参与者对确定的 ID（若存在），否则保留字典序最小的 ID；
    /// 最新消息取所有重复记录中时间最新的一条。重复执行无副作用。
    pub async fn repair_duplicates(&self, a: &str, b: &str) -> Result<Option<String>> {
        let mut records: Vec<ConversationRecord> = Vec::new();
        for (sender, receiver) in [(a, b), (b, a)] {
            let docs = self
                .store
                .get(self.directional_query(sender, receiver))
                .await
                .context("查询待修复会话失败")?;
            for doc in docs {
                if records.iter().any(|r| r.id == doc.id) {
                    continue;
                }
                match ConversationRecord::from_document(&doc) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("[ConvResolve] 修复时跳过无效会话记录: {}", e),
                }
            }
        }

        let canonical = if records.len() <= 1 {
            records.pop().map(|r| r.id)
        } else {
            Some(self.merge_records(a, b, &records).await?)
        };

        // 缓存可能指向已删除的重复记录
        let mut cached = self.cached.lock().await;
        if *cached != canonical {
            debug!("[ConvResolve] 修复后更新缓存: {:?} -> {:?}", *cached, canonical);
            *cached = canonical.clone();
        }
        Ok(canonical)
    }

    async fn merge_records(&self, a: &str, b: &str, records: &[ConversationRecord]) -> Result<String> {
        let composite = PairKey::new(a, b).composite_id();
        let canonical = if records.iter().any(|r| r.id == composite) {
            composite
        } else {
            records
                .iter()
                .map(|r| r.id.clone())
                .min()
                .unwrap_or(composite)
        };
        info!(
            "[ConvResolve] 修复重复会话 {} <-> {}：共 {} 条，保留 {}",
            a,
            b,
            records.len(),
            canonical
        );

        if let Some(latest) = records.iter().max_by_key(|r| r.last_message_time) {
            if latest.id != canonical {
                self.update_last_message(&canonical, &latest.last_message, latest.last_message_time)
                    .await?;
            }
        }

        for record in records.iter().filter(|r| r.id != canonical) {
            self.store
                .delete(&self.collection, &record.id)
                .await
                .with_context(|| format!("删除重复会话失败: {}", record.id))?;
        }
        Ok(canonical)
    }

    async fn create(
        &self,
        me: &UserIdentity,
        peer: &UserProfile,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let fields = ConversationRecord::new_fields(me, peer, text, now);
        match self.strategy {
            ResolveStrategy::QueryThenCreate => {
                let id = self
                    .store
                    .add(&self.collection, fields)
                    .await
                    .context("创建会话失败")?;
                info!("[ConvResolve] 创建新会话: {}", id);
                Ok(id)
            }
            ResolveStrategy::CompositeKey => {
                let id = PairKey::new(&me.user_id, &peer.id).composite_id();
                let created = self
                    .store
                    .create(&self.collection, &id, fields)
                    .await
                    .context("创建会话失败")?;
                if created {
                    info!("[ConvResolve] 创建新会话: {}", id);
                } else {
                    // 对端抢先创建了同一条记录，只在本条消息更新时覆盖
                    let winner = self.fetch_record(&id, &me.user_id, &peer.id).await?;
                    match winner {
                        Some(record) if record.last_message_time >= now => {
                            info!("[ConvResolve] 会话已由对端创建且消息更新，保留: {}", id);
                        }
                        _ => {
                            info!("[ConvResolve] 会话已由对端创建，改为更新: {}", id);
                            self.update_last_message(&id, text, now).await?;
                        }
                    }
                }
                Ok(id)
            }
        }
    }

    /// 按 ID 读取参与者对的会话记录，两个方向都查询
    async fn fetch_record(&self, id: &str, a: &str, b: &str) -> Result<Option<ConversationRecord>> {
        for (sender, receiver) in [(a, b), (b, a)] {
            let docs = self
                .store
                .get(self.directional_query(sender, receiver))
                .await
                .context("查询会话失败")?;
            if let Some(doc) = docs.iter().find(|d| d.id == id) {
                return match ConversationRecord::from_document(doc) {
                    Ok(record) => Ok(Some(record)),
                    Err(e) => {
                        warn!("[ConvResolve] 会话记录无效，按不存在处理: {}", e);
                        Ok(None)
                    }
                };
            }
        }
        Ok(None)
    }

    async fn update_last_message(&self, id: &str, text: &str, time: DateTime<Utc>) -> Result<()> {
        self.store
            .update(
                &self.collection,
                id,
                ConversationRecord::last_message_fields(text, time),
            )
            .await
            .with_context(|| format!("更新会话失败: {}", id))
    }

    fn directional_query(&self, sender: &str, receiver: &str) -> Query {
        Query::new(self.collection.as_str())
            .where_eq(fields::SENDER_ID, sender)
            .where_eq(fields::RECEIVER_ID, receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::store::InMemoryDocumentStore;
    use crate::im::types::{collections, Fields};
    use serde_json::json;
    use std::time::Duration;

    fn users() -> (UserIdentity, UserProfile) {
        (
            UserIdentity::new("alice", "Alice"),
            UserProfile::new("bob", "Bob"),
        )
    }

    fn resolver(store: &Arc<InMemoryDocumentStore>, strategy: ResolveStrategy) -> ConversationResolver {
        ConversationResolver::new(store.clone(), collections::CONVERSATIONS, strategy)
    }

    fn record_fields(from: &str, to: &str, text: &str, ms: i64) -> Fields {
        json!({"senderId": from, "receiverId": to, "lastMessage": text, "timestamp": ms})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn sequential_sends_create_once_per_pair() {
        for strategy in [ResolveStrategy::CompositeKey, ResolveStrategy::QueryThenCreate] {
            let store = Arc::new(InMemoryDocumentStore::new());
            let (alice, bob) = users();
            let carol = UserProfile::new("carol", "Carol");

            let with_bob = resolver(&store, strategy);
            let with_carol = resolver(&store, strategy);
            let first = with_bob.resolve(&alice, &bob, "hi bob").await.unwrap();
            with_carol.resolve(&alice, &carol, "hi carol").await.unwrap();
            assert_eq!(store.documents(collections::CONVERSATIONS).await.len(), 2);

            let second = with_bob.resolve(&alice, &bob, "again").await.unwrap();
            assert_eq!(first, second);
            let docs = store.documents(collections::CONVERSATIONS).await;
            assert_eq!(docs.len(), 2);
            let doc = docs.iter().find(|d| d.id == first).unwrap();
            assert_eq!(doc.get_str(fields::LAST_MESSAGE), Some("again"));
            assert_eq!(doc.get_str(fields::SENDER_ID), Some("alice"));
        }
    }

    #[tokio::test]
    async fn reverse_direction_record_is_found() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (alice, bob) = users();
        store
            .create(
                collections::CONVERSATIONS,
                "legacy-id",
                record_fields("bob", "alice", "from bob", 1),
            )
            .await
            .unwrap();

        let resolver = resolver(&store, ResolveStrategy::CompositeKey);
        assert_eq!(
            resolver.find_existing("alice", "bob").await.unwrap().as_deref(),
            Some("legacy-id")
        );
        let id = resolver.resolve(&alice, &bob, "reply").await.unwrap();
        assert_eq!(id, "legacy-id");
        assert_eq!(resolver.cached_id().await.as_deref(), Some("legacy-id"));

        let docs = store.documents(collections::CONVERSATIONS).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str(fields::LAST_MESSAGE), Some("reply"));
        // 方向不变
        assert_eq!(docs[0].get_str(fields::SENDER_ID), Some("bob"));
    }

    #[tokio::test]
    async fn failed_update_keeps_cache_empty() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (alice, bob) = users();
        store
            .create(
                collections::CONVERSATIONS,
                "c1",
                record_fields("alice", "bob", "old", 1),
            )
            .await
            .unwrap();

        let resolver = resolver(&store, ResolveStrategy::CompositeKey);
        store.set_fail_writes(true);
        assert!(resolver.resolve(&alice, &bob, "new").await.is_err());
        assert_eq!(resolver.cached_id().await, None);

        store.set_fail_writes(false);
        assert_eq!(resolver.resolve(&alice, &bob, "new").await.unwrap(), "c1");
    }

    #[tokio::test]
    async fn concurrent_first_sends_with_composite_key_create_one_record() {
        let store = Arc::new(InMemoryDocumentStore::new().with_latency(Duration::from_millis(5)));
        let alice_side = resolver(&store, ResolveStrategy::CompositeKey);
        let bob_side = resolver(&store, ResolveStrategy::CompositeKey);
        let alice = UserIdentity::new("alice", "Alice");
        let bob = UserIdentity::new("bob", "Bob");
        let to_bob = UserProfile::new("bob", "Bob");
        let to_alice = UserProfile::new("alice", "Alice");

        let (a, b) = tokio::join!(
            alice_side.resolve(&alice, &to_bob, "from alice"),
            bob_side.resolve(&bob, &to_alice, "from bob"),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(store.documents(collections::CONVERSATIONS).await.len(), 1);
    }

    #[tokio::test]
    async fn racy_duplicates_are_repaired() {
        let store = Arc::new(InMemoryDocumentStore::new().with_latency(Duration::from_millis(5)));
        let alice_side = resolver(&store, ResolveStrategy::QueryThenCreate);
        let bob_side = resolver(&store, ResolveStrategy::QueryThenCreate);
        let alice = UserIdentity::new("alice", "Alice");
        let bob = UserIdentity::new("bob", "Bob");
        let to_bob = UserProfile::new("bob", "Bob");
        let to_alice = UserProfile::new("alice", "Alice");

        let (a, b) = tokio::join!(
            alice_side.resolve(&alice, &to_bob, "from alice"),
            bob_side.resolve(&bob, &to_alice, "from bob"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a, b);
        assert_eq!(store.documents(collections::CONVERSATIONS).await.len(), 2);

        let kept = alice_side.repair_duplicates("alice", "bob").await.unwrap().unwrap();
        assert_eq!(kept, a.clone().min(b.clone()));
        assert_eq!(alice_side.cached_id().await, Some(kept.clone()));
        let docs = store.documents(collections::CONVERSATIONS).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, kept);

        // 幂等
        assert_eq!(
            bob_side.repair_duplicates("bob", "alice").await.unwrap(),
            Some(kept)
        );
        assert_eq!(store.documents(collections::CONVERSATIONS).await.len(), 1);
    }

    #[tokio::test]
    async fn repair_carries_latest_message_into_canonical() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let canonical = PairKey::new("alice", "bob").composite_id();
        store
            .create(
                collections::CONVERSATIONS,
                &canonical,
                record_fields("alice", "bob", "older", 10),
            )
            .await
            .unwrap();
        store
            .create(
                collections::CONVERSATIONS,
                "0-dup",
                record_fields("bob", "alice", "newest", 20),
            )
            .await
            .unwrap();

        let resolver = resolver(&store, ResolveStrategy::CompositeKey);
        let kept = resolver.repair_duplicates("alice", "bob").await.unwrap();
        assert_eq!(kept.as_deref(), Some(canonical.as_str()));

        let docs = store.documents(collections::CONVERSATIONS).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str(fields::LAST_MESSAGE), Some("newest"));
        assert_eq!(docs[0].get_i64(fields::TIMESTAMP), Some(20));
    }

    #[tokio::test]
    async fn both_sides_keep_sending_after_repair() {
        let store = Arc::new(InMemoryDocumentStore::new().with_latency(Duration::from_millis(5)));
        let alice_side = resolver(&store, ResolveStrategy::QueryThenCreate);
        let bob_side = resolver(&store, ResolveStrategy::QueryThenCreate);
        let alice = UserIdentity::new("alice", "Alice");
        let bob = UserIdentity::new("bob", "Bob");
        let to_bob = UserProfile::new("bob", "Bob");
        let to_alice = UserProfile::new("alice", "Alice");

        let (a, b) = tokio::join!(
            alice_side.resolve(&alice, &to_bob, "from alice"),
            bob_side.resolve(&bob, &to_alice, "from bob"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a, b);

        // 由保留记录的一端修复，另一端的缓存指向被删除的记录
        let (repairing, stale_side, stale_id) = if a < b {
            (&alice_side, &bob_side, b.clone())
        } else {
            (&bob_side, &alice_side, a.clone())
        };
        let kept = repairing.repair_duplicates("alice", "bob").await.unwrap().unwrap();
        assert_eq!(kept, a.clone().min(b.clone()));
        assert_eq!(stale_side.cached_id().await, Some(stale_id.clone()));

        let from_bob = bob_side.resolve(&bob, &to_alice, "after repair").await.unwrap();
        let from_alice = alice_side.resolve(&alice, &to_bob, "reply").await.unwrap();
        assert_eq!(from_bob, kept);
        assert_eq!(from_alice, kept);
        assert_eq!(stale_side.cached_id().await, Some(kept.clone()));

        let docs = store.documents(collections::CONVERSATIONS).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, kept);
        assert_ne!(docs[0].id, stale_id);
        assert_eq!(docs[0].get_str(fields::LAST_MESSAGE), Some("reply"));
    }

    #[tokio::test]
    async fn deleted_cached_record_is_recreated() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (alice, bob) = users();
        let resolver = resolver(&store, ResolveStrategy::CompositeKey);
        let first = resolver.resolve(&alice, &bob, "first").await.unwrap();

        store.delete(collections::CONVERSATIONS, &first).await.unwrap();
        let second = resolver.resolve(&alice, &bob, "second").await.unwrap();
        assert_eq!(second, first);

        let docs = store.documents(collections::CONVERSATIONS).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str(fields::LAST_MESSAGE), Some("second"));
    }

    #[tokio::test]
    async fn rejected_write_on_live_record_keeps_cache() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (alice, bob) = users();
        let resolver = resolver(&store, ResolveStrategy::CompositeKey);
        let id = resolver.resolve(&alice, &bob, "first").await.unwrap();

        store.set_fail_writes(true);
        assert!(resolver.resolve(&alice, &bob, "second").await.is_err());
        assert_eq!(resolver.cached_id().await, Some(id));
        assert_eq!(store.documents(collections::CONVERSATIONS).await.len(), 1);
    }

    #[tokio::test]
    async fn lost_create_race_does_not_move_last_message_backwards() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (alice, bob) = users();
        let id = PairKey::new("alice", "bob").composite_id();
        // 2100-01-01，晚于本次发送
        let later = 4_102_444_800_000;
        store
            .create(
                collections::CONVERSATIONS,
                &id,
                record_fields("bob", "alice", "newer", later),
            )
            .await
            .unwrap();

        let resolver = resolver(&store, ResolveStrategy::CompositeKey);
        let created = resolver.create(&alice, &bob, "older", Utc::now()).await.unwrap();
        assert_eq!(created, id);

        let docs = store.documents(collections::CONVERSATIONS).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str(fields::LAST_MESSAGE), Some("newer"));
        assert_eq!(docs[0].get_i64(fields::TIMESTAMP), Some(later));
        assert_eq!(docs[0].get_str(fields::SENDER_ID), Some("bob"));
    }

    #[tokio::test]
    async fn lost_create_race_updates_older_record() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (alice, bob) = users();
        let id = PairKey::new("alice", "bob").composite_id();
        store
            .create(
                collections::CONVERSATIONS,
                &id,
                record_fields("bob", "alice", "earlier", 1),
            )
            .await
            .unwrap();

        let resolver = resolver(&store, ResolveStrategy::CompositeKey);
        resolver.create(&alice, &bob, "latest", Utc::now()).await.unwrap();

        let docs = store.documents(collections::CONVERSATIONS).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str(fields::LAST_MESSAGE), Some("latest"));
    }
}
