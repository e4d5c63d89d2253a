//! PARSE 阶段：原始报文 -> (key, 线路值) -> 规范类型值。
//!
//! 文本载荷支持两种写法：
//! - JSON 对象：嵌套对象与数组按 `__` 展开成 key，如 `{"boiler": {"temp": 61}}` -> `boiler__temp`
//! - 按行的 `key=value`

use chrono::{DateTime, Utc};
use domain::{ParsedMessage, RawMessage, RawPayload, WireValue};
use ems_codec::{Codec, Decoded};
use ems_protocol::wire_to_text;
use serde_json::Value;
use std::collections::BTreeMap;

const KEY_SEPARATOR: &str = "__";
/// 整条载荷无法拆分时使用的 key。
pub const PAYLOAD_KEY: &str = "<payload>";

/// 解析结果：部分成功，格式错误的 key 单独列出。
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub message: ParsedMessage,
    /// (key, 原因)
    pub malformed: Vec<(String, String)>,
}

/// 把原始报文拆成字段并逐个解码。
pub fn parse_raw(raw: &RawMessage, codec: &dyn Codec) -> ParseOutcome {
    let mut malformed = Vec::new();
    let fields = split_fields(&raw.payload, &mut malformed);
    decode_fields(fields, raw.timestamp, codec, malformed)
}

fn decode_fields(
    fields: Vec<(String, WireValue)>,
    timestamp: DateTime<Utc>,
    codec: &dyn Codec,
    mut malformed: Vec<(String, String)>,
) -> ParseOutcome {
    let mut message = ParsedMessage::empty(timestamp);
    for (key, wire) in fields {
        match codec.decode(&key, &wire) {
            Ok(Decoded::Value(value)) => {
                message.examples.insert(key.clone(), wire_to_text(&wire));
                message.parsed_values.insert(key, value);
            }
            Ok(Decoded::Unmapped) => {
                message.examples.insert(key.clone(), wire_to_text(&wire));
                message.unmapped.push(key);
            }
            Err(err) => malformed.push((key, err.to_string())),
        }
    }
    ParseOutcome { message, malformed }
}

fn split_fields(payload: &RawPayload, malformed: &mut Vec<(String, String)>) -> Vec<(String, WireValue)> {
    match payload {
        RawPayload::Fields(fields) => fields.clone(),
        RawPayload::Text(text) => split_text(text, malformed),
        RawPayload::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => split_text(text, malformed),
            Err(_) => {
                malformed.push((PAYLOAD_KEY.to_string(), "binary payload is not utf-8".to_string()));
                Vec::new()
            }
        },
    }
}

fn split_text(text: &str, malformed: &mut Vec<(String, String)>) -> Vec<(String, WireValue)> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.starts_with('{') {
        return match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                let mut fields = BTreeMap::new();
                flatten_json(&value, "", &mut fields, malformed);
                fields.into_iter().collect()
            }
            Err(err) => {
                malformed.push((PAYLOAD_KEY.to_string(), err.to_string()));
                Vec::new()
            }
        };
    }

    let mut fields = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                fields.push((key.trim().to_string(), WireValue::Text(value.trim().to_string())));
            }
            _ => malformed.push((format!("line {}", index + 1), format!("expected key=value: {}", line))),
        }
    }
    fields
}

fn flatten_json(
    value: &Value,
    prefix: &str,
    fields: &mut BTreeMap<String, WireValue>,
    malformed: &mut Vec<(String, String)>,
) {
    let child_key = |segment: &str| {
        if prefix.is_empty() {
            segment.to_string()
        } else {
            format!("{}{}{}", prefix, KEY_SEPARATOR, segment)
        }
    };
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_json(child, &child_key(key), fields, malformed);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_json(child, &child_key(&index.to_string()), fields, malformed);
            }
        }
        Value::Null => malformed.push((prefix.to_string(), "null value".to_string())),
        Value::Bool(flag) => {
            fields.insert(prefix.to_string(), WireValue::Bool(*flag));
        }
        Value::Number(number) => match number.as_f64() {
            Some(number) => {
                fields.insert(prefix.to_string(), WireValue::Number(number));
            }
            None => malformed.push((prefix.to_string(), format!("unrepresentable number {}", number))),
        },
        Value::String(text) => {
            fields.insert(prefix.to_string(), WireValue::Text(text.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::TypedValue;
    use ems_codec::TypedCodec;

    fn codec() -> TypedCodec {
        TypedCodec::from_json(
            r#"[
              { "key": "temp_1", "direction": "sensor", "data_format": "continuous_numeric" },
              { "key": "boiler__temp", "direction": "sensor", "data_format": "continuous_numeric" },
              { "key": "status", "direction": "sensor", "data_format": "generic_text" }
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn nested_json_is_flattened() {
        let raw = RawMessage::new(RawPayload::Text(
            r#"{"temp_1": 22.3, "boiler": {"temp": 61}, "status": "ok"}"#.to_string(),
        ));
        let outcome = parse_raw(&raw, &codec());
        assert!(outcome.malformed.is_empty());
        assert_eq!(
            outcome.message.parsed_values.get("boiler__temp"),
            Some(&TypedValue::Number(61.0))
        );
        assert_eq!(outcome.message.parsed_values.len(), 3);
        assert_eq!(outcome.message.examples.get("temp_1").map(String::as_str), Some("22.3"));
    }

    #[test]
    fn key_value_lines_with_partial_failure() {
        let raw = RawMessage::new(RawPayload::Text(
            "temp_1=21.0\n# comment\nstatus = ok\ngarbage\nhumidity=40".to_string(),
        ));
        let outcome = parse_raw(&raw, &codec());
        assert_eq!(outcome.message.parsed_values.len(), 2);
        assert_eq!(outcome.message.unmapped, vec!["humidity".to_string()]);
        assert!(outcome.message.examples.contains_key("humidity"));
        assert_eq!(outcome.malformed.len(), 1);
        assert_eq!(outcome.malformed[0].0, "line 4");
    }

    #[test]
    fn undecodable_values_are_excluded() {
        let raw = RawMessage::new(RawPayload::Fields(vec![
            ("temp_1".to_string(), WireValue::Text("n/a".to_string())),
            ("status".to_string(), WireValue::Text("ok".to_string())),
        ]));
        let outcome = parse_raw(&raw, &codec());
        assert_eq!(outcome.message.parsed_values.len(), 1);
        assert_eq!(outcome.malformed.len(), 1);
        assert_eq!(outcome.malformed[0].0, "temp_1");
        assert!(!outcome.message.examples.contains_key("temp_1"));
    }

    #[test]
    fn broken_json_fails_whole_payload() {
        let raw = RawMessage::new(RawPayload::Text("{\"temp_1\": ".to_string()));
        let outcome = parse_raw(&raw, &codec());
        assert!(outcome.message.parsed_values.is_empty());
        assert_eq!(outcome.malformed.len(), 1);
        assert_eq!(outcome.malformed[0].0, PAYLOAD_KEY);
    }
}
