//! 会话列表监听器回调接口

use crate::im::conversation::models::ConversationListEntry;
use async_trait::async_trait;

/// 会话列表监听器
#[async_trait]
pub trait ConversationListListener: Send + Sync {
    /// 会话列表变更，整表刷新；`scroll_to_top` 为 true 时滚动到最近的会话
    async fn on_conversation_list_changed(
        &self,
        entries: Vec<ConversationListEntry>,
        scroll_to_top: bool,
    );
}

/// 空实现（默认监听器）
pub struct EmptyConversationListListener;

#[async_trait]
impl ConversationListListener for EmptyConversationListListener {
    async fn on_conversation_list_changed(
        &self,
        _entries: Vec<ConversationListEntry>,
        _scroll_to_top: bool,
    ) {
    }
}
