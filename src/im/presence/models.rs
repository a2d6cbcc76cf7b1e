//! 在线状态模型

use crate::im::change::{optional_str, FromDocument};
use crate::im::error::RecordError;
use crate::im::types::{fields, Document};

/// 对端用户记录中与在线状态相关的部分
///
/// 所有字段都可缺失，解析不会失败。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: String,
    pub availability: Option<i64>,
    pub push_token: Option<String>,
    pub image: Option<String>,
}

impl FromDocument for PeerRecord {
    fn from_document(doc: &Document) -> Result<Self, RecordError> {
        Ok(Self {
            id: doc.id.clone(),
            availability: doc.get_i64(fields::AVAILABILITY),
            push_token: optional_str(doc, fields::FCM_TOKEN),
            image: optional_str(doc, fields::IMAGE),
        })
    }
}

/// 一个线程会话持有的对端在线状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceState {
    pub available: bool,
    pub push_token: Option<String>,
    /// 对端头像，仅在没有推送 token 时从用户记录刷新
    pub peer_image: Option<String>,
}

impl PresenceState {
    pub fn with_peer_image(image: Option<String>) -> Self {
        Self {
            peer_image: image,
            ..Self::default()
        }
    }
}

/// 一次用户记录更新带来的变化
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceDelta {
    /// 在线状态发生变化时为新值
    pub availability: Option<bool>,
    /// 头像被刷新时为新头像，只需刷新头像控件
    pub image_refreshed: Option<String>,
}

impl PresenceDelta {
    pub fn is_empty(&self) -> bool {
        self.availability.is_none() && self.image_refreshed.is_none()
    }
}
