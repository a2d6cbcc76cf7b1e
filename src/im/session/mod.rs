//! 界面会话：把订阅、合并器与监听器连接起来
//!
//! 每个会话在一个事件循环任务中独占自己的合并状态，外部只读取快照。

pub mod conversation_list;
pub mod thread;

pub use conversation_list::ConversationListSession;
pub use thread::{NotificationDispatch, SendReceipt, ThreadListeners, ThreadSession};
