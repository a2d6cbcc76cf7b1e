//! 消息线程监听器回调接口

use crate::im::message::models::Message;
use crate::im::push::PushOutcome;
use async_trait::async_trait;

/// 消息列表监听器
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// 首批数据到达，整表刷新
    async fn on_messages_reloaded(&self, messages: Vec<Message>);

    /// 增量追加：只通知新插入的 `inserted` 条，并滚动到最新一条
    async fn on_messages_appended(&self, messages: Vec<Message>, inserted: usize);
}

/// 发送流程监听器
#[async_trait]
pub trait SendListener: Send + Sync {
    /// 消息与会话均已写入，输入框可以清空
    async fn on_input_cleared(&self);

    /// 离线推送结果（推送失败不影响已落库的消息）
    async fn on_notification_result(&self, outcome: PushOutcome);
}

/// 空实现（默认监听器）
pub struct EmptyMessageListener;

#[async_trait]
impl MessageListener for EmptyMessageListener {
    async fn on_messages_reloaded(&self, _messages: Vec<Message>) {}
    async fn on_messages_appended(&self, _messages: Vec<Message>, _inserted: usize) {}
}

/// 空实现（默认监听器）
pub struct EmptySendListener;

#[async_trait]
impl SendListener for EmptySendListener {
    async fn on_input_cleared(&self) {}
    async fn on_notification_result(&self, _outcome: PushOutcome) {}
}
