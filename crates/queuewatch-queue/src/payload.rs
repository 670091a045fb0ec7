//! Task payload envelope.
//!
//! Producers store `{"task": "<kind>", "data": <any>}`. The dispatcher
//! routes on the kind and hands `data` to the matching handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueueError;

/// A kind-tagged task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(rename = "task", alias = "kind")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl TaskPayload {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn to_value(&self) -> Result<Value, QueueError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A decoded stored payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Carries a task kind and its data.
    Task(TaskPayload),
    /// Valid JSON without a string kind; routed as an unknown kind.
    Untagged(Value),
}

impl Envelope {
    pub fn kind(&self) -> Option<&str> {
        match self {
            Envelope::Task(task) => Some(&task.kind),
            Envelope::Untagged(_) => None,
        }
    }
}

/// Decode raw stored payload text.
pub fn decode(raw: &str) -> Result<Envelope, QueueError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| QueueError::Decode(e.to_string()))?;
    Ok(classify(value))
}

fn classify(mut value: Value) -> Envelope {
    let Some(object) = value.as_object_mut() else {
        return Envelope::Untagged(value);
    };
    let kind = ["task", "kind"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_string);

    match kind {
        Some(kind) => {
            let data = object.remove("data").unwrap_or(Value::Null);
            Envelope::Task(TaskPayload { kind, data })
        }
        None => Envelope::Untagged(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_task() {
        let envelope = decode(r#"{"task": "send_email", "data": {"to": "ops"}}"#).unwrap();
        assert_eq!(
            envelope,
            Envelope::Task(TaskPayload::new("send_email", json!({"to": "ops"})))
        );
        assert_eq!(envelope.kind(), Some("send_email"));
    }

    #[test]
    fn test_decode_kind_alias_and_missing_data() {
        let envelope = decode(r#"{"kind": "ping"}"#).unwrap();
        assert_eq!(envelope, Envelope::Task(TaskPayload::new("ping", Value::Null)));
    }

    #[test]
    fn test_decode_untagged() {
        assert_eq!(decode("[1, 2]").unwrap(), Envelope::Untagged(json!([1, 2])));
        let envelope = decode(r#"{"task": 7, "data": {}}"#).unwrap();
        assert!(envelope.kind().is_none());
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode("{not json"), Err(QueueError::Decode(_))));
    }

    #[test]
    fn test_payload_serializes_as_wire_format() {
        let value = TaskPayload::new("known", json!({"x": 1})).to_value().unwrap();
        assert_eq!(value, json!({"task": "known", "data": {"x": 1}}));
    }
}
