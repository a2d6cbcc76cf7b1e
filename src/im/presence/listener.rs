//! 在线状态监听器回调接口

use async_trait::async_trait;

/// 对端在线状态监听器
#[async_trait]
pub trait PresenceListener: Send + Sync {
    /// 对端在线状态变化
    async fn on_availability_changed(&self, available: bool);

    /// 对端头像刷新，只需要更新头像控件，不需要重载消息列表
    async fn on_peer_image_changed(&self, image: String);
}

/// 空实现（默认监听器）
pub struct EmptyPresenceListener;

#[async_trait]
impl PresenceListener for EmptyPresenceListener {
    async fn on_availability_changed(&self, _available: bool) {}
    async fn on_peer_image_changed(&self, _image: String) {}
}
