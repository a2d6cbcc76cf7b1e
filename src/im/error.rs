//! 类型化错误
//!
//! 服务层统一使用 `anyhow::Result`，这里只放需要调用方按类型区分的错误。

use thiserror::Error;

/// 单条文档记录无法转换为领域对象
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("文档 {doc_id} 缺少字段 {field}")]
    MissingField { doc_id: String, field: &'static str },
    #[error("文档 {doc_id} 字段 {field} 类型无效")]
    InvalidField { doc_id: String, field: &'static str },
}

/// 订阅流投递的错误（存储客户端会自行重连）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("订阅流暂时不可用: {0}")]
    Transient(String),
}

/// 发送消息失败
#[derive(Debug, Error)]
pub enum SendError {
    #[error("不能发送空消息")]
    EmptyMessage,
    #[error("消息写入失败: {0:#}")]
    MessageWrite(anyhow::Error),
    /// 消息已落库，但会话摘要写入失败
    #[error("会话更新失败 (消息 {message_id}): {error:#}")]
    Conversation {
        message_id: String,
        error: anyhow::Error,
    },
}
