//! 会话模块
//!
//! 会话列表合并与会话解析

pub mod listener;
pub mod merger;
pub mod models;
pub mod resolver;

// 重新导出主要类型和函数
pub use listener::{ConversationListListener, EmptyConversationListListener};
pub use merger::{
    merge_conversation_batch, ConversationList, ConversationListMerger, ConversationListRefresh,
};
pub use models::{ConversationListEntry, ConversationRecord, PairKey};
pub use resolver::{ConversationResolver, ResolveStrategy};
