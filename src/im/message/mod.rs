//! 消息模块
//!
//! 单个双人线程的消息流合并

pub mod listener;
pub mod merger;
pub mod models;

pub use listener::{EmptyMessageListener, EmptySendListener, MessageListener, SendListener};
pub use merger::{merge_message_batch, MessageRefresh, MessageStreamMerger, MessageThread};
pub use models::Message;
