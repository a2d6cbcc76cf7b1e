//! 会话模型

use crate::im::change::{optional_str, required_str, required_time, FromDocument};
use crate::im::entities::{UserIdentity, UserProfile};
use crate::im::error::RecordError;
use crate::im::serialization::timestamp_to_value;
use crate::im::types::{fields, Document, Fields};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// 无序参与者对，会话去重的唯一键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PairKey {
    low: String,
    high: String,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    /// 由参与者对确定的会话文档 ID，与发起方向无关
    ///
    /// 前缀为较小 ID 的长度，保证不同的参与者对不会拼出同一个 ID。
    pub fn composite_id(&self) -> String {
        format!("{}_{}_{}", self.low.len(), self.low, self.high)
    }
}

/// 已持久化的会话摘要记录
///
/// sender / receiver 在创建时确定，之后只更新最新消息与时间。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub sender_name: Option<String>,
    pub sender_image: Option<String>,
    pub receiver_name: Option<String>,
    pub receiver_image: Option<String>,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn key(&self) -> PairKey {
        PairKey::new(&self.sender_id, &self.receiver_id)
    }

    /// 首条消息时创建会话的字段：发起方为 sender
    pub fn new_fields(
        me: &UserIdentity,
        peer: &UserProfile,
        text: &str,
        now: DateTime<Utc>,
    ) -> Fields {
        let mut f = Fields::new();
        f.insert(fields::SENDER_ID.into(), Value::from(me.user_id.as_str()));
        f.insert(fields::SENDER_NAME.into(), Value::from(me.name.as_str()));
        if let Some(image) = &me.image {
            f.insert(fields::SENDER_IMAGE.into(), Value::from(image.as_str()));
        }
        f.insert(fields::RECEIVER_ID.into(), Value::from(peer.id.as_str()));
        f.insert(fields::RECEIVER_NAME.into(), Value::from(peer.name.as_str()));
        if let Some(image) = &peer.image {
            f.insert(fields::RECEIVER_IMAGE.into(), Value::from(image.as_str()));
        }
        f.extend(Self::last_message_fields(text, now));
        f
    }

    /// 后续消息只更新这两个字段
    pub fn last_message_fields(text: &str, now: DateTime<Utc>) -> Fields {
        let mut f = Fields::new();
        f.insert(fields::LAST_MESSAGE.into(), Value::from(text));
        f.insert(fields::TIMESTAMP.into(), timestamp_to_value(now));
        f
    }
}

impl FromDocument for ConversationRecord {
    fn from_document(doc: &Document) -> Result<Self, RecordError> {
        Ok(Self {
            id: doc.id.clone(),
            sender_id: required_str(doc, fields::SENDER_ID)?,
            receiver_id: required_str(doc, fields::RECEIVER_ID)?,
            sender_name: optional_str(doc, fields::SENDER_NAME),
            sender_image: optional_str(doc, fields::SENDER_IMAGE),
            receiver_name: optional_str(doc, fields::RECEIVER_NAME),
            receiver_image: optional_str(doc, fields::RECEIVER_IMAGE),
            last_message: optional_str(doc, fields::LAST_MESSAGE).unwrap_or_default(),
            last_message_time: required_time(doc, fields::TIMESTAMP)?,
        })
    }
}

/// 会话列表中的一项（当前用户视角，只在内存中维护）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListEntry {
    /// 对端用户 ID
    pub peer_id: String,
    pub peer_name: String,
    pub peer_image: Option<String>,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub sender_id: String,
    pub receiver_id: String,
}

impl ConversationListEntry {
    /// 取记录中不是 `viewer` 的一侧作为对端
    pub fn from_record(viewer: &str, record: &ConversationRecord) -> Self {
        let (peer_id, peer_name, peer_image) = if record.sender_id == viewer {
            (
                record.receiver_id.clone(),
                record.receiver_name.clone(),
                record.receiver_image.clone(),
            )
        } else {
            (
                record.sender_id.clone(),
                record.sender_name.clone(),
                record.sender_image.clone(),
            )
        };
        Self {
            peer_id,
            peer_name: peer_name.unwrap_or_default(),
            peer_image,
            last_message: record.last_message.clone(),
            last_message_time: record.last_message_time,
            sender_id: record.sender_id.clone(),
            receiver_id: record.receiver_id.clone(),
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(&self.sender_id, &self.receiver_id)
    }

    /// 点击会话进入线程时使用的对端资料
    pub fn peer_profile(&self) -> UserProfile {
        UserProfile {
            id: self.peer_id.clone(),
            name: self.peer_name.clone(),
            image: self.peer_image.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_unordered() {
        assert_eq!(PairKey::new("alice", "bob"), PairKey::new("bob", "alice"));
        assert_eq!(
            PairKey::new("alice", "bob").composite_id(),
            PairKey::new("bob", "alice").composite_id()
        );
    }

    #[test]
    fn composite_id_does_not_collide_on_separator() {
        assert_ne!(
            PairKey::new("a_b", "c").composite_id(),
            PairKey::new("a", "b_c").composite_id()
        );
    }
}
