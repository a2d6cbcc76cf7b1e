//! 消息流合并
//!
//! 一个双人线程由两个对称查询驱动（我 -> 对端、对端 -> 我），两路批次以任意顺序到达。
//! 按文档 ID 去重、按 (时间戳, 文档 ID) 排序，保证任意交错下结果一致。

use crate::im::change::{normalize, ChangeEvent};
use crate::im::message::models::Message;
use crate::im::types::{ChangeKind, DocumentChange};
use std::collections::HashSet;
use tracing::debug;

/// 一个线程的有序消息集合
#[derive(Debug, Clone, Default)]
pub struct MessageThread {
    messages: Vec<Message>,
    seen: HashSet<String>,
}

impl MessageThread {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.seen.contains(doc_id)
    }
}

/// 一个批次合并后界面应采用的刷新方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRefresh {
    /// 本批次没有新增消息
    Unchanged,
    /// 合并前列表为空：整表刷新
    InitialLoad,
    /// 合并前列表非空：仅插入通知 + 滚动到最新
    Appended { count: usize },
}

/// 合并一批归一化后的消息事件
pub fn merge_message_batch(
    mut state: MessageThread,
    batch: &[ChangeEvent<Message>],
) -> (MessageThread, MessageRefresh) {
    let was_empty = state.is_empty();
    let mut added = 0;

    for event in batch {
        match event.kind {
            ChangeKind::Added => {
                if state.seen.insert(event.doc_id.clone()) {
                    state.messages.push(event.payload.clone());
                    added += 1;
                } else {
                    debug!("[MsgMerge] 重复投递的消息，忽略: {}", event.doc_id);
                }
            }
            // 消息不可变，修改 / 删除不应出现
            ChangeKind::Modified | ChangeKind::Removed => {
                debug!(
                    "[MsgMerge] 忽略消息 {:?} 事件: {}",
                    event.kind, event.doc_id
                );
            }
        }
    }

    if added == 0 {
        return (state, MessageRefresh::Unchanged);
    }

    state.messages.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });

    let refresh = if was_empty {
        MessageRefresh::InitialLoad
    } else {
        MessageRefresh::Appended { count: added }
    };
    debug!(
        "[MsgMerge] 合并完成，新增 {} 条，共 {} 条，刷新方式 {:?}",
        added,
        state.len(),
        refresh
    );
    (state, refresh)
}

/// 持有消息线程状态的合并器
#[derive(Debug, Default)]
pub struct MessageStreamMerger {
    thread: MessageThread,
}

impl MessageStreamMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 处理一个原始变更批次
    pub fn on_batch(&mut self, changes: &[DocumentChange]) -> MessageRefresh {
        let events = normalize::<Message>(changes);
        let (thread, refresh) = merge_message_batch(std::mem::take(&mut self.thread), &events);
        self.thread = thread;
        refresh
    }

    pub fn thread(&self) -> &MessageThread {
        &self.thread
    }

    pub fn messages(&self) -> &[Message] {
        self.thread.messages()
    }
}
