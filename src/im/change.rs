//! 变更事件归一化
//!
//! 将订阅投递的原始变更记录转换为统一的 `ChangeEvent<T>`。
//! 字段缺失或类型不符的记录会被跳过并记录日志，不会中断整批合并。

use crate::im::error::RecordError;
use crate::im::serialization::value_to_timestamp;
use crate::im::types::{ChangeKind, Document, DocumentChange};
use chrono::{DateTime, Utc};
use tracing::warn;

/// 可由文档快照构建的领域对象
pub trait FromDocument: Sized {
    fn from_document(doc: &Document) -> Result<Self, RecordError>;
}

/// 归一化后的变更事件
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub doc_id: String,
    pub payload: T,
}

/// 归一化一批变更，无效记录被丢弃
pub fn normalize<T: FromDocument>(changes: &[DocumentChange]) -> Vec<ChangeEvent<T>> {
    changes
        .iter()
        .filter_map(|change| match T::from_document(&change.document) {
            Ok(payload) => Some(ChangeEvent {
                kind: change.kind,
                doc_id: change.document.id.clone(),
                payload,
            }),
            Err(e) => {
                warn!("[Normalize] 跳过无效记录 ({:?}): {}", change.kind, e);
                None
            }
        })
        .collect()
}

pub(crate) fn required_str(doc: &Document, field: &'static str) -> Result<String, RecordError> {
    match doc.fields.get(field) {
        None | Some(serde_json::Value::Null) => Err(RecordError::MissingField {
            doc_id: doc.id.clone(),
            field,
        }),
        Some(v) => v.as_str().map(str::to_string).ok_or(RecordError::InvalidField {
            doc_id: doc.id.clone(),
            field,
        }),
    }
}

pub(crate) fn optional_str(doc: &Document, field: &str) -> Option<String> {
    doc.get_str(field).map(str::to_string)
}

pub(crate) fn required_time(
    doc: &Document,
    field: &'static str,
) -> Result<DateTime<Utc>, RecordError> {
    match doc.fields.get(field) {
        None | Some(serde_json::Value::Null) => Err(RecordError::MissingField {
            doc_id: doc.id.clone(),
            field,
        }),
        Some(v) => value_to_timestamp(v).ok_or(RecordError::InvalidField {
            doc_id: doc.id.clone(),
            field,
        }),
    }
}
