//! 新消息推送通知模块

pub mod api;
pub mod types;

use crate::im::client::PushConfig;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub use api::FcmPushNotifier;
pub use types::{parse_push_response, PushOutcome, PushRequest};

/// 推送通知协作方
///
/// 失败通过 [`PushOutcome`] 返回，不会影响已写入的消息。
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn send(&self, request: PushRequest) -> PushOutcome;
}

/// 未配置推送通道时使用
pub struct DisabledPushNotifier;

#[async_trait]
impl PushNotifier for DisabledPushNotifier {
    async fn send(&self, _request: PushRequest) -> PushOutcome {
        PushOutcome::failure("推送通道未配置")
    }
}

/// 按配置创建推送通知器；没有服务端密钥时返回禁用实现
pub fn build_push_notifier(config: &PushConfig) -> Result<Arc<dyn PushNotifier>> {
    match &config.server_key {
        Some(key) => Ok(Arc::new(FcmPushNotifier::new(config.endpoint.clone(), key)?)),
        None => {
            info!("[Push] 未配置服务端密钥，推送通知已禁用");
            Ok(Arc::new(DisabledPushNotifier))
        }
    }
}
