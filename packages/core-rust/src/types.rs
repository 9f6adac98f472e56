//! Request, response and payload types exchanged with the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Raw call arguments: a JSON object keyed by argument name.
pub type Arguments = Map<String, Value>;

/// Separator between the group and operation parts of a full name.
pub const NAME_SEPARATOR: char = '.';

/// Splits `group.operation` at the first separator.
///
/// Returns `None` when there is no separator or either part is empty.
#[must_use]
pub fn split_operation_name(full_name: &str) -> Option<(&str, &str)> {
    let (group, operation) = full_name.split_once(NAME_SEPARATOR)?;
    if group.is_empty() || operation.is_empty() {
        return None;
    }
    Some((group, operation))
}

/// Joins a group and operation name into the externally visible full name.
#[must_use]
pub fn full_operation_name(group: &str, operation: &str) -> String {
    format!("{group}{NAME_SEPARATOR}{operation}")
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One operation invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Correlation id carried through logs.
    pub request_id: Uuid,
    /// Full operation name, `group.operation`.
    pub operation: String,
    /// Raw arguments. `None` is treated as an empty map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Arguments>,
}

impl ExecutionRequest {
    /// Creates a request with a fresh correlation id.
    #[must_use]
    pub fn new(operation: impl Into<String>, arguments: Option<Arguments>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            operation: operation.into(),
            arguments,
        }
    }
}

/// Outcome of one invocation.
///
/// A present `error` is authoritative; `payload` is then always `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResponse {
    /// Successful response carrying an optional payload.
    #[must_use]
    pub fn success(payload: Option<Payload>) -> Self {
        Self { payload, error: None }
    }

    /// Failed response carrying a normalized message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            payload: None,
            error: Some(message.into()),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Flattened text of the payload, if any.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.payload.as_ref().map(Payload::to_text)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Result payload returned by a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Scalar rendered as text.
    Text(String),
    /// Structured record as canonical JSON text (keys sorted).
    Structured(String),
    /// Ordered sequence of payloads.
    Sequence(Vec<Payload>),
    /// A `null` element inside a sequence.
    Empty,
}

impl Payload {
    /// Converts a handler result into a payload.
    ///
    /// A top-level `null` yields no payload. Nulls inside a sequence keep
    /// their position as [`Payload::Empty`].
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            other => Some(Self::from_element(other)),
        }
    }

    fn from_element(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::String(s) => Self::Text(s),
            Value::Bool(b) => Self::Text(b.to_string()),
            Value::Number(n) => Self::Text(format_number(&n)),
            Value::Array(items) => Self::Sequence(items.into_iter().map(Self::from_element).collect()),
            object @ Value::Object(_) => Self::Structured(canonical_json(&object)),
        }
    }

    /// Flattens the payload to text. Sequence elements are joined by newlines.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) | Self::Structured(s) => s.clone(),
            Self::Empty => String::new(),
            Self::Sequence(items) => items
                .iter()
                .map(Self::to_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Renders a number, dropping the fractional part of integral floats.
fn format_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        // f64 Display prints 5.0 as "5".
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Serialises with keys in sorted order at every level.
fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn split_at_first_separator() {
        assert_eq!(split_operation_name("math.add"), Some(("math", "add")));
        assert_eq!(split_operation_name("a.b.c"), Some(("a", "b.c")));
        assert_eq!(split_operation_name("math"), None);
        assert_eq!(split_operation_name(".add"), None);
        assert_eq!(split_operation_name("math."), None);
        assert_eq!(split_operation_name(""), None);
    }

    #[test]
    fn full_name_round_trip() {
        let full = full_operation_name("schema", "greet_person");
        assert_eq!(full, "schema.greet_person");
        assert_eq!(split_operation_name(&full), Some(("schema", "greet_person")));
    }

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(Payload::from_value(json!(5.0)), Some(Payload::Text("5".into())));
        assert_eq!(Payload::from_value(json!(5)), Some(Payload::Text("5".into())));
        assert_eq!(Payload::from_value(json!(-2.5)), Some(Payload::Text("-2.5".into())));
    }

    #[test]
    fn scalars_become_text() {
        assert_eq!(Payload::from_value(json!("hi")), Some(Payload::Text("hi".into())));
        assert_eq!(Payload::from_value(json!(true)), Some(Payload::Text("true".into())));
        assert_eq!(Payload::from_value(Value::Null), None);
    }

    #[test]
    fn objects_become_canonical_json() {
        let payload = Payload::from_value(json!({"b": 1, "a": {"d": 2, "c": 3}})).unwrap();
        assert_eq!(payload, Payload::Structured(r#"{"a":{"c":3,"d":2},"b":1}"#.into()));
        let reparsed: Value = serde_json::from_str(&payload.to_text()).unwrap();
        assert_eq!(reparsed, json!({"a": {"c": 3, "d": 2}, "b": 1}));
    }

    #[test]
    fn arrays_become_sequences() {
        let payload = Payload::from_value(json!(["Item: a", null, 2])).unwrap();
        assert_eq!(
            payload,
            Payload::Sequence(vec![
                Payload::Text("Item: a".into()),
                Payload::Empty,
                Payload::Text("2".into())
            ])
        );
        assert_eq!(payload.to_text(), "Item: a\n\n2");
    }

    #[test]
    fn null_elements_keep_their_position() {
        let Some(Payload::Sequence(items)) = Payload::from_value(json!([1, null, 3])) else {
            panic!("expected a sequence");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[1], Payload::Empty);
        assert_eq!(items[2], Payload::Text("3".into()));

        let Some(Payload::Sequence(nested)) = Payload::from_value(json!([[null], []])) else {
            panic!("expected a sequence");
        };
        assert_eq!(
            nested,
            vec![Payload::Sequence(vec![Payload::Empty]), Payload::Sequence(vec![])]
        );
        assert_eq!(Payload::from_value(Value::Null), None);
    }

    #[test]
    fn response_constructors() {
        let ok = ExecutionResponse::success(Some(Payload::Text("5".into())));
        assert!(!ok.is_error());
        assert_eq!(ok.text().as_deref(), Some("5"));

        let err = ExecutionResponse::failure("unknown operation: subtract");
        assert!(err.is_error());
        assert!(err.payload.is_none());
    }

    #[test]
    fn request_ids_are_unique() {
        let a = ExecutionRequest::new("math.add", None);
        let b = ExecutionRequest::new("math.add", None);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn response_serialises_payload_kind() {
        let response = ExecutionResponse::success(Some(Payload::Text("5".into())));
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded, json!({"payload": {"kind": "text", "value": "5"}}));
    }
}
