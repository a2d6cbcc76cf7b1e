//! 文档存储通用类型：集合名、字段名、文档快照与变更记录
//!
//! 字段名是外部固定的 schema，与移动端共用同一套文档结构。

use crate::im::error::StreamError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 默认集合名
pub mod collections {
    /// 消息集合
    pub const CHAT: &str = "chat";
    /// 会话摘要集合
    pub const CONVERSATIONS: &str = "conversations";
    /// 用户集合（在线状态、推送 token、头像）
    pub const USERS: &str = "users";
}

/// 文档字段名
pub mod fields {
    pub const SENDER_ID: &str = "senderId";
    pub const RECEIVER_ID: &str = "receiverId";
    pub const MESSAGE: &str = "message";
    /// 消息时间，同时也是会话的最新消息时间
    pub const TIMESTAMP: &str = "timestamp";
    pub const LAST_MESSAGE: &str = "lastMessage";
    pub const SENDER_NAME: &str = "senderName";
    pub const RECEIVER_NAME: &str = "receiverName";
    pub const SENDER_IMAGE: &str = "senderImage";
    pub const RECEIVER_IMAGE: &str = "receiverImage";
    /// 在线状态，数值 1 表示在线
    pub const AVAILABILITY: &str = "availability";
    pub const FCM_TOKEN: &str = "fcmToken";
    pub const NAME: &str = "name";
    pub const IMAGE: &str = "image";
}

/// 文档字段集合
pub type Fields = Map<String, Value>;

/// 文档快照：存储分配的 ID + 当前完整字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// 读取字符串字段，缺失或类型不符时返回 None
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// 读取整数字段
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(|v| v.as_i64())
    }
}

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// 单条原始变更记录
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub document: Document,
}

impl DocumentChange {
    pub fn new(kind: ChangeKind, document: Document) -> Self {
        Self { kind, document }
    }
}

/// 订阅一次投递的变更批次；Err 表示本次投递的是流错误而非数据
pub type ChangeBatch = Result<Vec<DocumentChange>, StreamError>;
