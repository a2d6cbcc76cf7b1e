//! 消息模型

use crate::im::change::{required_str, required_time, FromDocument};
use crate::im::error::RecordError;
use crate::im::serialization::timestamp_to_value;
use crate::im::types::{fields, Document, Fields};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// 单条消息，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// 存储分配的文档 ID，去重依据
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// 构建待写入的消息文档字段
    pub fn new_fields(
        sender_id: &str,
        receiver_id: &str,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Fields {
        let mut f = Fields::new();
        f.insert(fields::SENDER_ID.into(), Value::from(sender_id));
        f.insert(fields::RECEIVER_ID.into(), Value::from(receiver_id));
        f.insert(fields::MESSAGE.into(), Value::from(text));
        f.insert(fields::TIMESTAMP.into(), timestamp_to_value(timestamp));
        f
    }
}

impl FromDocument for Message {
    fn from_document(doc: &Document) -> Result<Self, RecordError> {
        Ok(Self {
            id: doc.id.clone(),
            sender_id: required_str(doc, fields::SENDER_ID)?,
            receiver_id: required_str(doc, fields::RECEIVER_ID)?,
            text: required_str(doc, fields::MESSAGE)?,
            timestamp: required_time(doc, fields::TIMESTAMP)?,
        })
    }
}
