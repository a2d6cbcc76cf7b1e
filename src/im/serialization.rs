use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// 时间戳编码为文档字段（毫秒）
pub fn timestamp_to_value(ts: DateTime<Utc>) -> Value {
    Value::from(ts.timestamp_millis())
}

/// 从文档字段解析时间戳，支持毫秒整数和 RFC 3339 字符串
pub fn value_to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// 解码 base64 头像数据，空串或非法编码返回 None
///
/// 移动端按 76 列换行编码，解码前去掉所有空白。
pub fn decode_image(encoded: &str) -> Option<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    base64::engine::general_purpose::STANDARD.decode(compact).ok()
}

/// 生成操作 ID（日志追踪用）
pub fn generate_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_accepts_millis_and_rfc3339() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).single().unwrap();
        assert_eq!(value_to_timestamp(&timestamp_to_value(ts)), Some(ts));

        let parsed = value_to_timestamp(&Value::from("2023-11-14T22:13:20.123Z"));
        assert_eq!(parsed, Some(ts));

        assert_eq!(value_to_timestamp(&Value::Bool(true)), None);
        assert_eq!(value_to_timestamp(&Value::from("yesterday")), None);
    }

    #[test]
    fn decode_image_rejects_empty_and_garbage() {
        assert_eq!(decode_image(""), None);
        assert_eq!(decode_image("@@not base64@@"), None);
        assert_eq!(decode_image("aGk="), Some(b"hi".to_vec()));
        assert_eq!(decode_image(" \n"), None);
    }

    #[test]
    fn decode_image_accepts_line_wrapped_output() {
        assert_eq!(
            decode_image("aGVsbG8gd29y\nbGQ=\n"),
            Some(b"hello world".to_vec())
        );
        assert_eq!(
            decode_image("aGVsbG8g\r\nd29ybGQ="),
            Some(b"hello world".to_vec())
        );
    }
}
