//! 聊天客户端核心实现模块
//!
//! 持有当前登录身份与各协作方（文档存储、偏好存储、推送通道），
//! 负责打开会话列表 / 消息线程会话以及账号相关操作。

use crate::im::conversation::{ConversationListListener, ResolveStrategy};
use crate::im::entities::{UserIdentity, UserProfile};
use crate::im::preference::{keys, load_identity, PreferenceStore};
use crate::im::push::{build_push_notifier, PushNotifier};
use crate::im::session::{ConversationListSession, ThreadListeners, ThreadSession};
use crate::im::store::DocumentStore;
use crate::im::types::{collections, fields, Fields};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// 文档集合名
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionNames {
    pub chat: String,
    pub conversations: String,
    pub users: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            chat: collections::CHAT.to_string(),
            conversations: collections::CONVERSATIONS.to_string(),
            users: collections::USERS.to_string(),
        }
    }
}

/// 推送通道配置
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushConfig {
    /// 推送接口地址
    pub endpoint: String,
    /// 服务端密钥，为空时不发送推送
    pub server_key: Option<String>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://fcm.googleapis.com/fcm/send".to_string(),
            server_key: None,
        }
    }
}

/// 引擎配置
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub collections: CollectionNames,
    /// 新会话的创建方式
    pub resolve_strategy: ResolveStrategy,
    pub push: PushConfig,
}

impl EngineConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolve_strategy(mut self, strategy: ResolveStrategy) -> Self {
        self.resolve_strategy = strategy;
        self
    }

    pub fn with_push_server_key(mut self, key: impl Into<String>) -> Self {
        self.push.server_key = Some(key.into());
        self
    }
}

/// 聊天客户端
///
/// 必须在偏好存储中已有登录身份时创建。
pub struct ChatClient {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    prefs: Arc<dyn PreferenceStore>,
    notifier: Arc<dyn PushNotifier>,
    identity: UserIdentity,
}

impl ChatClient {
    /// 从偏好存储恢复登录身份并创建客户端
    pub async fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Result<Self> {
        let identity = load_identity(prefs.as_ref())
            .await
            .context("读取登录身份失败")?
            .ok_or_else(|| anyhow!("本地没有已登录的用户"))?;
        let notifier = build_push_notifier(&config.push)?;
        info!("[Client] 客户端已创建，当前用户: {}", identity.user_id);
        Ok(Self {
            config,
            store,
            prefs,
            notifier,
            identity,
        })
    }

    /// 替换推送通知器
    pub fn with_notifier(mut self, notifier: Arc<dyn PushNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 打开当前用户的会话列表
    pub async fn open_conversation_list(
        &self,
        listener: Arc<dyn ConversationListListener>,
    ) -> Result<ConversationListSession> {
        ConversationListSession::open(
            self.store.clone(),
            &self.config,
            &self.identity.user_id,
            listener,
        )
        .await
    }

    /// 打开与 `peer` 的消息线程
    pub async fn open_thread(
        &self,
        peer: UserProfile,
        listeners: ThreadListeners,
    ) -> Result<ThreadSession> {
        ThreadSession::open(
            self.store.clone(),
            self.notifier.clone(),
            &self.config,
            self.identity.clone(),
            peer,
            listeners,
        )
        .await
    }

    /// 上报本机推送 token 并缓存到偏好存储
    pub async fn update_push_token(&mut self, token: &str) -> Result<()> {
        let mut update = Fields::new();
        update.insert(fields::FCM_TOKEN.into(), Value::from(token));
        self.store
            .update(&self.config.collections.users, &self.identity.user_id, update)
            .await
            .context("上报推送 token 失败")?;
        self.prefs.put(keys::FCM_TOKEN, token).await?;
        self.identity.push_token = Some(token.to_string());
        info!("[Client] 推送 token 已更新");
        Ok(())
    }

    /// 退出登录：先删除远端推送 token，成功后才清空本地偏好
    pub async fn sign_out(self) -> Result<()> {
        let mut update = Fields::new();
        update.insert(fields::FCM_TOKEN.into(), Value::Null);
        if let Err(e) = self
            .store
            .update(&self.config.collections.users, &self.identity.user_id, update)
            .await
        {
            warn!("[Client] 退出登录失败，保留本地登录状态: {:#}", e);
            return Err(e.context("移除推送 token 失败"));
        }
        self.prefs.clear().await.context("清空本地偏好失败")?;
        info!("[Client] 用户 {} 已退出登录", self.identity.user_id);
        Ok(())
    }

    /// 更新当前用户的在线状态
    pub async fn set_availability(&self, available: bool) -> Result<()> {
        let mut update = Fields::new();
        update.insert(
            fields::AVAILABILITY.into(),
            Value::from(if available { 1 } else { 0 }),
        );
        self.store
            .update(&self.config.collections.users, &self.identity.user_id, update)
            .await
            .context("更新在线状态失败")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::preference::{save_identity, MemoryPreferenceStore};
    use crate::im::store::InMemoryDocumentStore;
    use serde_json::json;

    async fn setup() -> (Arc<InMemoryDocumentStore>, Arc<MemoryPreferenceStore>, ChatClient) {
        let memory = Arc::new(InMemoryDocumentStore::new());
        memory
            .create("users", "alice", json!({"name": "Alice"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        let prefs = Arc::new(MemoryPreferenceStore::new());
        save_identity(prefs.as_ref(), &UserIdentity::new("alice", "Alice"))
            .await
            .unwrap();
        let client = ChatClient::new(EngineConfig::new(), memory.clone(), prefs.clone())
            .await
            .unwrap();
        (memory, prefs, client)
    }

    #[tokio::test]
    async fn requires_stored_identity() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let prefs: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::new());
        assert!(ChatClient::new(EngineConfig::new(), store, prefs).await.is_err());
    }

    #[tokio::test]
    async fn push_token_and_availability_are_written() {
        let (memory, prefs, mut client) = setup().await;
        client.update_push_token("tok-1").await.unwrap();
        client.set_availability(true).await.unwrap();

        let docs = memory.documents("users").await;
        assert_eq!(docs[0].get_str(fields::FCM_TOKEN), Some("tok-1"));
        assert_eq!(docs[0].get_i64(fields::AVAILABILITY), Some(1));
        assert_eq!(prefs.get(keys::FCM_TOKEN).await.unwrap().as_deref(), Some("tok-1"));
        assert_eq!(client.identity().push_token.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn sign_out_clears_prefs_only_after_token_removal() {
        let (memory, prefs, mut client) = setup().await;
        client.update_push_token("tok-1").await.unwrap();

        memory.set_fail_writes(true);
        let client = {
            let config = client.config().clone();
            assert!(client.sign_out().await.is_err());
            // 失败后本地登录状态仍在，可以重新创建客户端
            ChatClient::new(config, memory.clone(), prefs.clone()).await.unwrap()
        };
        assert_eq!(prefs.get(keys::USER_ID).await.unwrap().as_deref(), Some("alice"));

        memory.set_fail_writes(false);
        client.sign_out().await.unwrap();
        assert_eq!(prefs.get(keys::USER_ID).await.unwrap(), None);
        let docs = memory.documents("users").await;
        assert_eq!(docs[0].get_str(fields::FCM_TOKEN), None);
    }
}
