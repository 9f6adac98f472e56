//! Input schemas and the argument validator.
//!
//! An [`InputSchema`] describes the named fields an operation accepts. The
//! validator extracts the schema's fields from a raw argument map, applies
//! declared defaults, and reports every violation it finds in one
//! [`ValidationFailure`]. There is no partial success: a single violation
//! fails the whole input.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

/// Argument key reserved for the execution context. Never part of a schema.
pub const RESERVED_CONTEXT_KEY: &str = "context";

// ---------------------------------------------------------------------------
// InputSchema
// ---------------------------------------------------------------------------

/// Named set of field definitions accepted by an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSchema {
    /// Schema name, used to match a declared schema against a handler's input.
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Field definitions in declaration order.
    pub fields: Vec<FieldDef>,
}

impl InputSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a field definition.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field_named(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns `true` if the schema declares the reserved `context` field.
    #[must_use]
    pub fn declares_reserved_field(&self) -> bool {
        self.field_named(RESERVED_CONTEXT_KEY).is_some()
    }

    /// Validates raw arguments and returns the extracted, defaulted field map.
    ///
    /// Keys that are not schema fields are ignored, as is the reserved
    /// `context` key.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationFailure` listing every violation found.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<Map<String, Value>, ValidationFailure> {
        let mut violations = Vec::new();
        let extracted = check_object(self, arguments, "", &mut violations);
        if violations.is_empty() {
            Ok(extracted)
        } else {
            Err(ValidationFailure {
                schema: self.name.clone(),
                violations,
            })
        }
    }

    /// Validates raw arguments and deserialises them into `T`.
    ///
    /// # Errors
    ///
    /// Returns the aggregated structural failure, or a single-violation
    /// failure when the validated map does not deserialise into `T`.
    pub fn parse<T: DeserializeOwned>(&self, arguments: &Map<String, Value>) -> Result<T, ValidationFailure> {
        let extracted = self.validate(arguments)?;
        serde_json::from_value(Value::Object(extracted)).map_err(|e| ValidationFailure {
            schema: self.name.clone(),
            violations: vec![Violation::new("", e.to_string())],
        })
    }

    /// Renders a JSON-Schema-like description for operation listings.
    #[must_use]
    pub fn describe_json(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), field.describe_json());
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        let mut schema = json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": required,
        });
        if let (Some(description), Some(obj)) = (&self.description, schema.as_object_mut()) {
            obj.insert("description".to_string(), Value::String(description.clone()));
        }
        schema
    }
}

/// Typed operation input with an associated schema.
///
/// Implemented by the argument structs of operations registered with a typed
/// handler. The schema is built once, when the operation is registered.
pub trait OperationInput: DeserializeOwned + Send + 'static {
    /// Returns the schema describing this input.
    fn input_schema() -> InputSchema;
}

// ---------------------------------------------------------------------------
// FieldDef
// ---------------------------------------------------------------------------

/// Type of a schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    /// Array whose elements all have the given kind.
    Array(Box<FieldKind>),
    /// Object, optionally checked against a nested schema.
    Object(Option<Arc<InputSchema>>),
    /// Any JSON value.
    Any,
}

impl FieldKind {
    fn json_type(&self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Integer => Some("integer"),
            Self::Number => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Array(_) => Some("array"),
            Self::Object(_) => Some("object"),
            Self::Any => None,
        }
    }

    fn describe_json(&self) -> Value {
        let mut out = Map::new();
        if let Some(ty) = self.json_type() {
            out.insert("type".to_string(), Value::from(ty));
        }
        match self {
            Self::Array(elem) => {
                out.insert("items".to_string(), elem.describe_json());
            }
            Self::Object(Some(nested)) => {
                if let Value::Object(nested) = nested.describe_json() {
                    out.extend(nested);
                }
            }
            _ => {}
        }
        Value::Object(out)
    }
}

/// Value constraints attached to a field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    /// Inclusive lower bound for numeric fields.
    pub minimum: Option<f64>,
    /// Inclusive upper bound for numeric fields.
    pub maximum: Option<f64>,
    /// Minimum character count (strings) or item count (arrays).
    pub min_length: Option<usize>,
    /// Maximum character count (strings) or item count (arrays).
    pub max_length: Option<usize>,
    /// Closed set of allowed values.
    pub one_of: Option<Vec<Value>>,
}

/// Single field definition within a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Name of the field (the argument key).
    pub name: String,
    /// Expected type.
    pub kind: FieldKind,
    /// Whether the field must be present.
    pub required: bool,
    /// Value used when an optional field is absent.
    pub default: Option<Value>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Value constraints.
    pub constraints: Constraints,
}

impl FieldDef {
    /// Creates a required field of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
            description: None,
            constraints: Constraints::default(),
        }
    }

    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    #[must_use]
    pub fn array(name: impl Into<String>, items: FieldKind) -> Self {
        Self::new(name, FieldKind::Array(Box::new(items)))
    }

    #[must_use]
    pub fn object(name: impl Into<String>, schema: Option<InputSchema>) -> Self {
        Self::new(name, FieldKind::Object(schema.map(Arc::new)))
    }

    #[must_use]
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Any)
    }

    /// Marks the field as optional without a default.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Marks the field as optional with a default value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn minimum(mut self, minimum: f64) -> Self {
        self.constraints.minimum = Some(minimum);
        self
    }

    #[must_use]
    pub fn maximum(mut self, maximum: f64) -> Self {
        self.constraints.maximum = Some(maximum);
        self
    }

    #[must_use]
    pub fn min_length(mut self, min: usize) -> Self {
        self.constraints.min_length = Some(min);
        self
    }

    #[must_use]
    pub fn max_length(mut self, max: usize) -> Self {
        self.constraints.max_length = Some(max);
        self
    }

    #[must_use]
    pub fn one_of<I, V>(mut self, allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.constraints.one_of = Some(allowed.into_iter().map(Into::into).collect());
        self
    }

    fn describe_json(&self) -> Value {
        let mut out = match self.kind.describe_json() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(description) = &self.description {
            out.insert("description".to_string(), Value::from(description.as_str()));
        }
        if let Some(default) = &self.default {
            out.insert("default".to_string(), default.clone());
        }
        let c = &self.constraints;
        if let Some(min) = c.minimum {
            out.insert("minimum".to_string(), Value::from(min));
        }
        if let Some(max) = c.maximum {
            out.insert("maximum".to_string(), Value::from(max));
        }
        let (min_key, max_key) = match self.kind {
            FieldKind::Array(_) => ("minItems", "maxItems"),
            _ => ("minLength", "maxLength"),
        };
        if let Some(min) = c.min_length {
            out.insert(min_key.to_string(), Value::from(min));
        }
        if let Some(max) = c.max_length {
            out.insert(max_key.to_string(), Value::from(max));
        }
        if let Some(allowed) = &c.one_of {
            out.insert("enum".to_string(), Value::Array(allowed.clone()));
        }
        Value::Object(out)
    }
}

// ---------------------------------------------------------------------------
// Validation results
// ---------------------------------------------------------------------------

/// One field-level problem found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Offending field path, e.g. `y`, `items[2]`, `person.name`.
    pub path: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl Violation {
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "'{}' {}", self.path, self.message)
        }
    }
}

/// Aggregated validation failure for one input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Input validation failed: {}", join_violations(.violations))]
pub struct ValidationFailure {
    /// Name of the schema that rejected the input.
    pub schema: String,
    /// Every violation found, in field declaration order.
    pub violations: Vec<Violation>,
}

impl ValidationFailure {
    /// Returns `true` if some violation concerns `path`.
    #[must_use]
    pub fn mentions(&self, path: &str) -> bool {
        self.violations.iter().any(|v| v.path == path)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn check_object(
    schema: &InputSchema,
    input: &Map<String, Value>,
    prefix: &str,
    violations: &mut Vec<Violation>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for field in &schema.fields {
        if prefix.is_empty() && field.name == RESERVED_CONTEXT_KEY {
            continue;
        }
        let path = join_path(prefix, &field.name);
        match input.get(&field.name) {
            None => {
                if field.required {
                    violations.push(Violation::new(path, "is required"));
                } else if let Some(default) = &field.default {
                    out.insert(field.name.clone(), default.clone());
                }
            }
            Some(Value::Null) => {
                if field.required {
                    violations.push(Violation::new(path, "must not be null"));
                } else {
                    out.insert(field.name.clone(), Value::Null);
                }
            }
            Some(value) => {
                if let Some(checked) = check_value(&field.kind, &field.constraints, value, &path, violations) {
                    out.insert(field.name.clone(), checked);
                }
            }
        }
    }
    out
}

/// Checks one value; returns the normalised value when its type matched.
fn check_value(
    kind: &FieldKind,
    constraints: &Constraints,
    value: &Value,
    path: &str,
    violations: &mut Vec<Violation>,
) -> Option<Value> {
    let checked = match kind {
        FieldKind::String => {
            let Some(s) = value.as_str() else {
                violations.push(Violation::new(path, "must be a string"));
                return None;
            };
            check_length(constraints, s.chars().count(), "characters", path, violations);
            value.clone()
        }
        FieldKind::Integer => {
            let (Some(n), Some(magnitude)) = (as_integer(value), value.as_f64()) else {
                violations.push(Violation::new(path, "must be an integer"));
                return None;
            };
            check_range(constraints, magnitude, path, violations);
            n
        }
        FieldKind::Number => {
            let Some(n) = value.as_f64() else {
                violations.push(Violation::new(path, "must be a number"));
                return None;
            };
            check_range(constraints, n, path, violations);
            value.clone()
        }
        FieldKind::Boolean => {
            if !value.is_boolean() {
                violations.push(Violation::new(path, "must be a boolean"));
                return None;
            }
            value.clone()
        }
        FieldKind::Array(elem) => {
            let Some(items) = value.as_array() else {
                violations.push(Violation::new(path, "must be an array"));
                return None;
            };
            check_length(constraints, items.len(), "items", path, violations);
            let no_constraints = Constraints::default();
            let checked: Vec<Value> = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let item_path = format!("{path}[{i}]");
                    check_value(elem, &no_constraints, item, &item_path, violations)
                        .unwrap_or_else(|| item.clone())
                })
                .collect();
            Value::Array(checked)
        }
        FieldKind::Object(nested) => {
            let Some(map) = value.as_object() else {
                violations.push(Violation::new(path, "must be an object"));
                return None;
            };
            match nested {
                Some(schema) => Value::Object(check_object(schema, map, path, violations)),
                None => value.clone(),
            }
        }
        FieldKind::Any => value.clone(),
    };

    if let Some(allowed) = &constraints.one_of {
        if !allowed.contains(&checked) {
            let rendered: Vec<String> = allowed.iter().map(Value::to_string).collect();
            violations.push(Violation::new(path, format!("must be one of: {}", rendered.join(", "))));
        }
    }
    Some(checked)
}

/// The value as a JSON integer, if it is one exactly.
///
/// Integral floats convert only when they fit `i64` or `u64`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_integer(value: &Value) -> Option<Value> {
    // 2^63 and 2^64, both exact in f64.
    const I64_END: f64 = 9_223_372_036_854_775_808.0;
    const U64_END: f64 = 18_446_744_073_709_551_616.0;

    if value.is_i64() || value.is_u64() {
        return Some(value.clone());
    }
    let f = value.as_f64()?;
    if f.fract() != 0.0 {
        return None;
    }
    if (-I64_END..I64_END).contains(&f) {
        Some(Value::from(f as i64))
    } else if (0.0..U64_END).contains(&f) {
        Some(Value::from(f as u64))
    } else {
        None
    }
}

fn check_range(constraints: &Constraints, n: f64, path: &str, violations: &mut Vec<Violation>) {
    if let Some(min) = constraints.minimum {
        if n < min {
            violations.push(Violation::new(path, format!("must be greater than or equal to {min}")));
        }
    }
    if let Some(max) = constraints.maximum {
        if n > max {
            violations.push(Violation::new(path, format!("must be less than or equal to {max}")));
        }
    }
}

fn check_length(constraints: &Constraints, len: usize, unit: &str, path: &str, violations: &mut Vec<Violation>) {
    if let Some(min) = constraints.min_length {
        if len < min {
            violations.push(Violation::new(path, format!("must contain at least {min} {unit}")));
        }
    }
    if let Some(max) = constraints.max_length {
        if len > max {
            violations.push(Violation::new(path, format!("must contain at most {max} {unit}")));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
