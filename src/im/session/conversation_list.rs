//! 会话列表会话
//!
//! 当前用户作为发送方、作为接收方两路订阅合并后写入列表合并器，每个批次整表通知。

use crate::im::client::EngineConfig;
use crate::im::conversation::{ConversationListEntry, ConversationListListener, ConversationListMerger};
use crate::im::entities::UserProfile;
use crate::im::store::{DocumentStore, Query};
use crate::im::types::fields;
use anyhow::{Context, Result};
use futures_util::stream::select;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 当前用户的最近会话列表
pub struct ConversationListSession {
    viewer: String,
    entries: watch::Receiver<Vec<ConversationListEntry>>,
    task: JoinHandle<()>,
}

impl ConversationListSession {
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        config: &EngineConfig,
        viewer: &str,
        listener: Arc<dyn ConversationListListener>,
    ) -> Result<Self> {
        let collection = &config.collections.conversations;
        info!("[Session] 打开会话列表: {}", viewer);

        let as_sender = store
            .subscribe(Query::new(collection).where_eq(fields::SENDER_ID, viewer))
            .await
            .context("订阅发起的会话失败")?;
        let as_receiver = store
            .subscribe(Query::new(collection).where_eq(fields::RECEIVER_ID, viewer))
            .await
            .context("订阅收到的会话失败")?;

        let (tx, rx) = watch::channel(Vec::new());
        let mut batches = select(as_sender, as_receiver);
        let mut merger = ConversationListMerger::new(viewer);
        let task = tokio::spawn(async move {
            while let Some(batch) = batches.next().await {
                let changes = match batch {
                    Ok(changes) => changes,
                    Err(e) => {
                        warn!("[Session] 会话订阅流错误，保留现有列表: {}", e);
                        continue;
                    }
                };
                let refresh = merger.on_batch(&changes);
                let entries = merger.entries().to_vec();
                tx.send_replace(entries.clone());
                listener
                    .on_conversation_list_changed(entries, refresh.scroll_to_top)
                    .await;
            }
            debug!("[Session] 会话列表事件循环结束");
        });

        Ok(Self {
            viewer: viewer.to_string(),
            entries: rx,
            task,
        })
    }

    /// 当前列表快照，最近的会话在前
    pub fn entries(&self) -> Vec<ConversationListEntry> {
        self.entries.borrow().clone()
    }

    /// 订阅列表快照的变化
    pub fn watch_entries(&self) -> watch::Receiver<Vec<ConversationListEntry>> {
        self.entries.clone()
    }

    /// 点击列表中的会话，返回进入线程所需的对端资料
    pub fn open_conversation(&self, peer_id: &str) -> Option<UserProfile> {
        self.entries
            .borrow()
            .iter()
            .find(|e| e.peer_id == peer_id)
            .map(ConversationListEntry::peer_profile)
    }

    /// 关闭会话列表，取消两路订阅
    pub async fn close(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
        info!("[Session] 会话列表已关闭: {}", self.viewer);
    }
}

impl Drop for ConversationListSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}
