//! 推送通道 HTTP 客户端

use crate::im::push::types::{parse_push_response, FcmPayload, PushOutcome, PushRequest};
use crate::im::push::PushNotifier;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// 通过旧版 FCM HTTP 接口发送通知
pub struct FcmPushNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl FcmPushNotifier {
    /// 创建推送客户端，服务端密钥通过 default_headers 自动附带
    pub fn new(endpoint: impl Into<String>, server_key: &str) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("key={}", server_key))
                        .context("无效的推送服务端密钥")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PushNotifier for FcmPushNotifier {
    async fn send(&self, request: PushRequest) -> PushOutcome {
        let payload = FcmPayload::from(&request);
        debug!("[Push] 发送通知 -> {}，发送方: {}", self.endpoint, request.sender_id);

        let response = match self.client.post(&self.endpoint).json(&payload).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[Push] 请求失败: {}", e);
                return PushOutcome::failure(e.to_string());
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let outcome = parse_push_response(status, &body);
        match &outcome.error {
            None => info!("[Push] 通知已送达推送通道"),
            Some(err) => warn!("[Push] 通知发送失败: {}，响应: {}", err, body),
        }
        outcome
    }
}
