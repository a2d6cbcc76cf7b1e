//! 推送通知相关类型定义
//!
//! 请求 / 响应体沿用旧版 FCM HTTP 接口的 JSON 结构。

use serde::{Deserialize, Serialize};

/// 一条待发送的新消息通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// 接收方设备的推送 token
    pub target_token: String,
    pub sender_id: String,
    pub sender_name: String,
    /// 发送方自己的推送 token，供对端回复时使用
    pub sender_token: Option<String>,
    pub body: String,
}

/// 通知发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl PushOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// 推送通道请求体
#[derive(Debug, Clone, Serialize)]
pub struct FcmPayload {
    pub registration_ids: Vec<String>,
    pub data: FcmData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FcmData {
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcm_token: Option<String>,
    pub message: String,
}

impl From<&PushRequest> for FcmPayload {
    fn from(req: &PushRequest) -> Self {
        Self {
            registration_ids: vec![req.target_token.clone()],
            data: FcmData {
                user_id: req.sender_id.clone(),
                name: req.sender_name.clone(),
                fcm_token: req.sender_token.clone(),
                message: req.body.clone(),
            },
        }
    }
}

/// 推送通道响应体
#[derive(Debug, Clone, Deserialize)]
pub struct FcmResponse {
    #[serde(default)]
    pub failure: i64,
    #[serde(default)]
    pub results: Vec<FcmResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmResult {
    #[serde(default)]
    pub error: Option<String>,
}

/// 将 HTTP 状态码与响应体映射为通知结果
///
/// 2xx 但响应体无法解析时视为成功。
pub fn parse_push_response(status: u16, body: &str) -> PushOutcome {
    if !(200..300).contains(&status) {
        return PushOutcome::failure(format!("HTTP {}", status));
    }
    match serde_json::from_str::<FcmResponse>(body) {
        Ok(resp) if resp.failure == 1 => {
            let error = resp
                .results
                .into_iter()
                .next()
                .and_then(|r| r.error)
                .unwrap_or_else(|| "未知推送错误".to_string());
            PushOutcome::failure(error)
        }
        _ => PushOutcome::success(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_sender_identity() {
        let req = PushRequest {
            target_token: "peer-token".into(),
            sender_id: "alice".into(),
            sender_name: "Alice".into(),
            sender_token: Some("alice-token".into()),
            body: "hello".into(),
        };
        let json = serde_json::to_value(FcmPayload::from(&req)).unwrap();
        assert_eq!(json["registration_ids"][0], "peer-token");
        assert_eq!(json["data"]["userId"], "alice");
        assert_eq!(json["data"]["name"], "Alice");
        assert_eq!(json["data"]["fcmToken"], "alice-token");
        assert_eq!(json["data"]["message"], "hello");
    }

    #[test]
    fn response_mapping() {
        assert_eq!(
            parse_push_response(200, r#"{"success":1,"failure":0,"results":[{"message_id":"x"}]}"#),
            PushOutcome::success()
        );
        assert_eq!(
            parse_push_response(200, r#"{"failure":1,"results":[{"error":"NotRegistered"}]}"#),
            PushOutcome::failure("NotRegistered")
        );
        assert_eq!(parse_push_response(401, ""), PushOutcome::failure("HTTP 401"));
        assert_eq!(parse_push_response(200, "not json"), PushOutcome::success());
    }
}
