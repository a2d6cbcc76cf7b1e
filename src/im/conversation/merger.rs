//! 会话列表合并
//!
//! 由两个订阅驱动（作为发送方、作为接收方），按无序参与者对去重，
//! 每个批次后按最新消息时间倒序排列。

use crate::im::change::{normalize, ChangeEvent};
use crate::im::conversation::models::{ConversationListEntry, ConversationRecord};
use crate::im::types::{ChangeKind, DocumentChange};
use tracing::{debug, info};

/// 当前用户的会话列表
#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    entries: Vec<ConversationListEntry>,
}

impl ConversationList {
    pub fn entries(&self) -> &[ConversationListEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按对端 ID 查找
    pub fn find_peer(&self, peer_id: &str) -> Option<&ConversationListEntry> {
        self.entries.iter().find(|e| e.peer_id == peer_id)
    }

    fn position(&self, record: &ConversationRecord) -> Option<usize> {
        let key = record.key();
        self.entries.iter().position(|e| e.key() == key)
    }
}

/// 每个批次后都是整表刷新，并滚动到顶部
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationListRefresh {
    pub inserted: usize,
    pub updated: usize,
    pub scroll_to_top: bool,
}

/// 合并一批归一化后的会话事件
pub fn merge_conversation_batch(
    viewer: &str,
    mut state: ConversationList,
    batch: &[ChangeEvent<ConversationRecord>],
) -> (ConversationList, ConversationListRefresh) {
    let mut inserted = 0;
    let mut updated = 0;

    for event in batch {
        let record = &event.payload;
        match event.kind {
            ChangeKind::Added => match state.position(record) {
                Some(idx) => {
                    // 两路订阅同时命中或重连重放
                    state.entries[idx] = ConversationListEntry::from_record(viewer, record);
                    updated += 1;
                }
                None => {
                    state
                        .entries
                        .push(ConversationListEntry::from_record(viewer, record));
                    inserted += 1;
                }
            },
            ChangeKind::Modified => match state.position(record) {
                Some(idx) => {
                    let entry = &mut state.entries[idx];
                    entry.last_message = record.last_message.clone();
                    entry.last_message_time = record.last_message_time;
                    updated += 1;
                }
                None => {
                    info!(
                        "[ConvList] 收到未见过的会话修改，按新增处理: {}",
                        event.doc_id
                    );
                    state
                        .entries
                        .push(ConversationListEntry::from_record(viewer, record));
                    inserted += 1;
                }
            },
            ChangeKind::Removed => {
                debug!("[ConvList] 忽略会话删除事件: {}", event.doc_id);
            }
        }
    }

    // sort_by 是稳定排序，时间相同的项保持原有相对顺序
    state
        .entries
        .sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));

    debug!(
        "[ConvList] 合并完成，新增 {}，更新 {}，共 {} 个会话",
        inserted,
        updated,
        state.len()
    );
    (
        state,
        ConversationListRefresh {
            inserted,
            updated,
            scroll_to_top: true,
        },
    )
}

/// 持有会话列表状态的合并器
#[derive(Debug)]
pub struct ConversationListMerger {
    viewer: String,
    list: ConversationList,
}

impl ConversationListMerger {
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            list: ConversationList::default(),
        }
    }

    /// 处理一个原始变更批次
    pub fn on_batch(&mut self, changes: &[DocumentChange]) -> ConversationListRefresh {
        let events = normalize::<ConversationRecord>(changes);
        let (list, refresh) =
            merge_conversation_batch(&self.viewer, std::mem::take(&mut self.list), &events);
        self.list = list;
        refresh
    }

    pub fn list(&self) -> &ConversationList {
        &self.list
    }

    pub fn entries(&self) -> &[ConversationListEntry] {
        self.list.entries()
    }
}
