//! Normalization of raw agent output into the canonical weather payload.
//!
//! The agent's reply is structurally unpredictable: a ready payload, a bare
//! document, a list of documents, prose with JSON buried inside it, or a
//! sequence of content fragments. [`normalize`] coerces every recognized
//! shape into a mapping with at least a `latest` key; an empty mapping means
//! "no data" and is distinct from an unrecognizable result, which is an
//! [`WeatherError::UnsupportedResult`].

use serde_json::{Map, Value};

use crate::error::{Result, WeatherError};

/// Canonical payload: `latest` plus optional `history`, `count`, `summary`,
/// `recommendation` and `source`.
pub type WeatherPayload = Map<String, Value>;

/// Tag recorded in payloads synthesized from bare documents.
pub const SOURCE_TAG: &str = "mongodb-mcp";

/// Untyped result of one agent invocation, tagged by shape at the boundary
/// where the agent's output enters the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAgentResult {
    /// The agent produced nothing.
    Empty,
    /// A decoded JSON value: object, list, string or scalar.
    Structured(Value),
    /// Free-form text, possibly with JSON embedded in it.
    Text(String),
    /// Ordered content fragments: JSON strings or objects with a `text` field.
    Parts(Vec<Value>),
}

pub fn normalize(raw: RawAgentResult) -> Result<WeatherPayload> {
    match raw {
        RawAgentResult::Empty => Ok(Map::new()),
        RawAgentResult::Structured(value) => coerce_value(value),
        RawAgentResult::Text(text) => coerce_text(&text),
        RawAgentResult::Parts(parts) => {
            let fragments: Vec<String> = parts.iter().filter_map(extract_text).collect();
            if fragments.is_empty() {
                return Err(WeatherError::UnsupportedResult(
                    "content parts without any text".into(),
                ));
            }
            coerce_text(&fragments.join("\n"))
        }
    }
}

fn extract_text(part: &Value) -> Option<String> {
    match part {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(str::to_owned),
        _ => None,
    }
}

fn coerce_value(value: Value) -> Result<WeatherPayload> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => {
            if map.contains_key("latest") {
                // Already canonical.
                Ok(map)
            } else {
                Ok(wrap_documents(vec![Value::Object(map)]))
            }
        }
        Value::Array(docs) => Ok(wrap_documents(docs)),
        Value::String(text) => coerce_text(&text),
        other => Err(WeatherError::UnsupportedResult(type_tag(&other).into())),
    }
}

fn coerce_text(text: &str) -> Result<WeatherPayload> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return coerce_value(value);
    }
    if let Some(value) = extract_embedded_json(trimmed) {
        return coerce_value(value);
    }
    Ok(Map::new())
}

/// Scans left to right for the first position where a JSON object or array
/// can be decoded, ignoring whatever trails it.
fn extract_embedded_json(text: &str) -> Option<Value> {
    for (idx, ch) in text.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            return Some(value);
        }
    }
    None
}

fn wrap_documents(docs: Vec<Value>) -> WeatherPayload {
    let count = docs.len();
    let mut iter = docs.into_iter();
    let latest = match iter.next() {
        Some(doc) => doc,
        None => return Map::new(),
    };
    let history: Vec<Value> = iter.collect();

    let mut payload = Map::new();
    if let Some(summary) = summarize(&latest) {
        payload.insert("summary".into(), Value::String(summary));
    }
    payload.insert("latest".into(), latest);
    payload.insert("count".into(), Value::from(count));
    payload.insert("source".into(), Value::String(SOURCE_TAG.into()));
    if !history.is_empty() {
        payload.insert("history".into(), Value::Array(history));
    }
    payload
}

fn summarize(latest: &Value) -> Option<String> {
    let doc = latest.as_object()?;
    let mut bits = Vec::new();
    if let Some(temperature) = doc.get("temperature").filter(|v| v.is_number()) {
        bits.push(format!("{temperature}°C"));
    }
    if let Some(humidity) = doc.get("humidity").filter(|v| v.is_number()) {
        bits.push(format!("{humidity}% humidity"));
    }
    if bits.is_empty() {
        return None;
    }
    Some(format!("Latest weather sample: {}", bits.join(", ")))
}

fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structured(value: Value) -> RawAgentResult {
        RawAgentResult::Structured(value)
    }

    #[test]
    fn canonical_payload_passes_through_unchanged() {
        let input = json!({"latest": {"temperature": 5}});
        let payload = normalize(structured(input.clone())).unwrap();
        assert_eq!(Value::Object(payload), input);
    }

    #[test]
    fn single_document_is_wrapped() {
        let payload = normalize(structured(json!({"temperature": 7, "station": "roof"}))).unwrap();
        assert_eq!(payload["latest"], json!({"temperature": 7, "station": "roof"}));
        assert_eq!(payload["count"], json!(1));
        assert_eq!(payload["source"], json!(SOURCE_TAG));
        assert!(!payload.contains_key("history"));
        assert_eq!(payload["summary"], json!("Latest weather sample: 7°C"));
    }

    #[test]
    fn document_list_becomes_latest_plus_history() {
        let payload = normalize(structured(json!([
            {"temperature": 20, "humidity": 40},
            {"temperature": 18}
        ])))
        .unwrap();

        assert_eq!(payload["latest"], json!({"temperature": 20, "humidity": 40}));
        assert_eq!(payload["count"], json!(2));
        assert_eq!(payload["history"], json!([{"temperature": 18}]));
        assert_eq!(
            payload["summary"],
            json!("Latest weather sample: 20°C, 40% humidity")
        );
    }

    #[test]
    fn summary_is_omitted_without_sensor_fields() {
        let payload = normalize(structured(json!({"pressure": 1013}))).unwrap();
        assert!(!payload.contains_key("summary"));
    }

    #[test]
    fn non_numeric_sensor_values_are_not_summarized() {
        let payload = normalize(structured(json!({"temperature": "warm"}))).unwrap();
        assert!(!payload.contains_key("summary"));
    }

    #[test]
    fn whole_string_json_is_parsed() {
        let raw = RawAgentResult::Text(r#"{"latest": {"temperature": 10, "humidity": 55}}"#.into());
        let payload = normalize(raw).unwrap();
        assert_eq!(payload["latest"], json!({"temperature": 10, "humidity": 55}));
    }

    #[test]
    fn embedded_json_is_extracted_from_noise() {
        let raw = RawAgentResult::Text(
            "noise before {\"latest\": {\"temperature\": 3}} noise after".into(),
        );
        let payload = normalize(raw).unwrap();
        assert_eq!(
            Value::Object(payload),
            json!({"latest": {"temperature": 3}})
        );
    }

    #[test]
    fn false_brace_starts_are_skipped() {
        let raw = RawAgentResult::Text("{oops, then real data [{\"temperature\": 2}]".into());
        let payload = normalize(raw).unwrap();
        assert_eq!(payload["latest"], json!({"temperature": 2}));
    }

    #[test]
    fn empty_inputs_yield_empty_payload() {
        assert!(normalize(RawAgentResult::Empty).unwrap().is_empty());
        assert!(normalize(RawAgentResult::Text("".into())).unwrap().is_empty());
        assert!(normalize(RawAgentResult::Text("   ".into())).unwrap().is_empty());
        assert!(normalize(structured(json!([]))).unwrap().is_empty());
        assert!(normalize(structured(Value::Null)).unwrap().is_empty());
    }

    #[test]
    fn text_without_json_yields_empty_payload() {
        let payload = normalize(RawAgentResult::Text("no readings today".into())).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn scalars_are_unsupported() {
        let err = normalize(structured(json!(42))).unwrap_err();
        assert!(matches!(err, WeatherError::UnsupportedResult(tag) if tag == "number"));

        let err = normalize(structured(json!(true))).unwrap_err();
        assert!(matches!(err, WeatherError::UnsupportedResult(tag) if tag == "boolean"));
    }

    #[test]
    fn string_encoding_a_scalar_is_unsupported() {
        let err = normalize(RawAgentResult::Text("42".into())).unwrap_err();
        assert!(matches!(err, WeatherError::UnsupportedResult(_)));
    }

    #[test]
    fn parts_are_joined_and_normalized() {
        let raw = RawAgentResult::Parts(vec![
            json!("The tool returned:"),
            json!({"text": "{\"latest\": {\"temperature\": 9}}"}),
        ]);
        let payload = normalize(raw).unwrap();
        assert_eq!(payload["latest"], json!({"temperature": 9}));
    }

    #[test]
    fn parts_without_text_are_unsupported() {
        let raw = RawAgentResult::Parts(vec![json!(17), json!({"data": "blob"})]);
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, WeatherError::UnsupportedResult(_)));
    }
}
