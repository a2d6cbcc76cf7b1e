//! 消息线程会话
//!
//! 打开时建立三个订阅：我 -> 对端、对端 -> 我两路消息查询，以及对端用户记录。
//! 两路消息批次合并为一条流，由单个事件循环任务写入合并器。

use crate::im::client::EngineConfig;
use crate::im::conversation::ConversationResolver;
use crate::im::entities::{UserIdentity, UserProfile};
use crate::im::error::SendError;
use crate::im::message::{
    EmptyMessageListener, EmptySendListener, Message, MessageListener, MessageRefresh,
    MessageStreamMerger, SendListener,
};
use crate::im::presence::{
    EmptyPresenceListener, PresenceListener, PresenceState, PresenceSubscription, PresenceTracker,
};
use crate::im::push::{PushNotifier, PushRequest};
use crate::im::serialization::generate_operation_id;
use crate::im::store::{DocumentStore, Query};
use crate::im::types::fields;
use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::stream::select;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 线程会话的监听器集合
#[derive(Clone)]
pub struct ThreadListeners {
    pub message: Arc<dyn MessageListener>,
    pub presence: Arc<dyn PresenceListener>,
    pub send: Arc<dyn SendListener>,
}

impl Default for ThreadListeners {
    fn default() -> Self {
        Self {
            message: Arc::new(EmptyMessageListener),
            presence: Arc::new(EmptyPresenceListener),
            send: Arc::new(EmptySendListener),
        }
    }
}

/// 离线推送是否已发起
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDispatch {
    /// 已在后台发送，结果通过 `SendListener::on_notification_result` 回调
    Dispatched,
    /// 对端在线或没有推送 token
    Skipped,
}

/// 发送成功的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub conversation_id: String,
    pub notification: NotificationDispatch,
}

/// 与单个对端的消息线程
pub struct ThreadSession {
    identity: UserIdentity,
    peer: UserProfile,
    chat_collection: String,
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn PushNotifier>,
    resolver: Arc<ConversationResolver>,
    send_listener: Arc<dyn SendListener>,
    messages: watch::Receiver<Vec<Message>>,
    presence: Option<PresenceSubscription>,
    task: JoinHandle<()>,
}

impl ThreadSession {
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn PushNotifier>,
        config: &EngineConfig,
        identity: UserIdentity,
        peer: UserProfile,
        listeners: ThreadListeners,
    ) -> Result<Self> {
        let chat = config.collections.chat.clone();
        let me = identity.user_id.clone();
        info!("[Session] 打开消息线程: {} <-> {}", me, peer.id);

        let outgoing = store
            .subscribe(
                Query::new(&chat)
                    .where_eq(fields::SENDER_ID, &me)
                    .where_eq(fields::RECEIVER_ID, &peer.id),
            )
            .await
            .context("订阅发出的消息失败")?;
        let incoming = store
            .subscribe(
                Query::new(&chat)
                    .where_eq(fields::SENDER_ID, &peer.id)
                    .where_eq(fields::RECEIVER_ID, &me),
            )
            .await
            .context("订阅收到的消息失败")?;

        let presence = PresenceTracker::subscribe(
            &store,
            &config.collections.users,
            &peer.id,
            peer.image.clone(),
            listeners.presence.clone(),
        )
        .await?;

        let (tx, rx) = watch::channel(Vec::new());
        let listener = listeners.message.clone();
        let mut batches = select(outgoing, incoming);
        let task = tokio::spawn(async move {
            let mut merger = MessageStreamMerger::new();
            let mut loaded = false;
            while let Some(batch) = batches.next().await {
                let changes = match batch {
                    Ok(changes) => changes,
                    Err(e) => {
                        warn!("[Session] 消息订阅流错误，保留现有消息: {}", e);
                        continue;
                    }
                };
                let refresh = merger.on_batch(&changes);
                let messages = merger.messages().to_vec();
                tx.send_replace(messages.clone());
                match refresh {
                    MessageRefresh::InitialLoad => listener.on_messages_reloaded(messages).await,
                    MessageRefresh::Appended { count } => {
                        listener.on_messages_appended(messages, count).await
                    }
                    // 空线程也要通知一次，界面据此结束加载状态
                    MessageRefresh::Unchanged if !loaded => {
                        listener.on_messages_reloaded(messages).await
                    }
                    MessageRefresh::Unchanged => {}
                }
                loaded = true;
            }
            debug!("[Session] 消息事件循环结束");
        });

        let resolver = Arc::new(ConversationResolver::new(
            store.clone(),
            config.collections.conversations.clone(),
            config.resolve_strategy,
        ));

        Ok(Self {
            identity,
            peer,
            chat_collection: chat,
            store,
            notifier,
            resolver,
            send_listener: listeners.send,
            messages: rx,
            presence: Some(presence),
            task,
        })
    }

    pub fn peer(&self) -> &UserProfile {
        &self.peer
    }

    /// 当前有序消息快照
    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    /// 订阅消息快照的变化
    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.clone()
    }

    /// 对端在线状态快照
    pub async fn presence(&self) -> PresenceState {
        match &self.presence {
            Some(p) => p.state().await,
            None => PresenceState::default(),
        }
    }

    /// 已解析的会话 ID
    pub async fn conversation_id(&self) -> Option<String> {
        self.resolver.cached_id().await
    }

    pub fn resolver(&self) -> &Arc<ConversationResolver> {
        &self.resolver
    }

    /// 发送一条消息
    ///
    /// 消息写入后更新会话摘要；对端离线且有推送 token 时在后台发送通知。
    /// 本地消息列表不会提前插入，等待订阅回推。
    pub async fn send_message(&self, text: &str) -> Result<SendReceipt, SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let operation_id = generate_operation_id();
        let message_id = self
            .store
            .add(
                &self.chat_collection,
                Message::new_fields(&self.identity.user_id, &self.peer.id, text, Utc::now()),
            )
            .await
            .map_err(SendError::MessageWrite)?;
        debug!("[Session] 消息已写入: {}, 操作ID: {}", message_id, operation_id);

        let conversation_id = self
            .resolver
            .resolve(&self.identity, &self.peer, text)
            .await
            .map_err(|error| {
                warn!(
                    "[Session] 会话更新失败，消息 {} 已写入, 操作ID: {}: {:#}",
                    message_id, operation_id, error
                );
                SendError::Conversation {
                    message_id: message_id.clone(),
                    error,
                }
            })?;

        self.send_listener.on_input_cleared().await;
        let notification = self.dispatch_notification(text).await;

        Ok(SendReceipt {
            message_id,
            conversation_id,
            notification,
        })
    }

    async fn dispatch_notification(&self, text: &str) -> NotificationDispatch {
        let presence = self.presence().await;
        if presence.available {
            debug!("[Session] 对端在线，跳过推送");
            return NotificationDispatch::Skipped;
        }
        let Some(target_token) = presence.push_token else {
            debug!("[Session] 对端没有推送 token，跳过推送");
            return NotificationDispatch::Skipped;
        };

        let request = PushRequest {
            target_token,
            sender_id: self.identity.user_id.clone(),
            sender_name: self.identity.name.clone(),
            sender_token: self.identity.push_token.clone(),
            body: text.to_string(),
        };
        let notifier = self.notifier.clone();
        let listener = self.send_listener.clone();
        // 推送结果与消息写入无关，会话关闭后仍会回调
        tokio::spawn(async move {
            let outcome = notifier.send(request).await;
            if let Some(err) = &outcome.error {
                warn!("[Session] 推送通知失败: {}", err);
            }
            listener.on_notification_result(outcome).await;
        });
        NotificationDispatch::Dispatched
    }

    /// 关闭会话，取消全部订阅
    pub async fn close(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
        if let Some(presence) = self.presence.take() {
            presence.close().await;
        }
        info!("[Session] 消息线程已关闭: {}", self.peer.id);
    }
}

impl Drop for ThreadSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}
