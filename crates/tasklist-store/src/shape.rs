//! Shape validation and repair of decoded records.
//!
//! A [`Shape`] describes what a stored value must look like. Validation never
//! coerces: a collection element that is missing a required field, carries a
//! wrong-typed field, or repeats an identifier is dropped and counted.

use std::collections::HashSet;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// The JSON kind a value or field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Anything, including `null`.
    Any,
    Null,
    Bool,
    /// A number with no fractional part.
    Integer,
    /// A non-negative integer, e.g. a millisecond timestamp.
    Unsigned,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// Whether `value` is of this kind.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Unsigned => value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Unsigned => "unsigned integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// One field of a [`RecordShape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ValueKind,
    /// Optional fields may be absent or `null`.
    pub required: bool,
}

/// Expected shape of a JSON object.
///
/// ```
/// use tasklist_store::{RecordShape, ValueKind};
/// use serde_json::json;
///
/// let shape = RecordShape::new()
///     .required("id", ValueKind::String)
///     .required("done", ValueKind::Bool)
///     .identified_by("id");
///
/// assert!(shape.check(&json!({"id": "1", "done": false})).is_ok());
/// assert!(shape.check(&json!({"id": 1, "done": false})).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordShape {
    fields: Vec<FieldSpec>,
    id_field: Option<String>,
}

impl RecordShape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field that must be present with the given kind.
    pub fn required(mut self, name: &str, kind: ValueKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    /// Add a field that may be absent or `null`, but must otherwise match.
    pub fn optional(mut self, name: &str, kind: ValueKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }

    /// Name the string field that identifies records within a collection.
    pub fn identified_by(mut self, field: &str) -> Self {
        self.id_field = Some(field.to_string());
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn id_field(&self) -> Option<&str> {
        self.id_field.as_deref()
    }

    /// Check a single record. Fields not named by the shape are allowed.
    pub fn check(&self, value: &Value) -> Result<(), ShapeViolation> {
        let object = value.as_object().ok_or(ShapeViolation::WrongKind {
            expected: ValueKind::Object,
            found: ValueKind::of(value),
        })?;
        for field in &self.fields {
            check_field(object, field)?;
        }
        if let Some(id) = &self.id_field {
            if !object.get(id).map_or(false, Value::is_string) {
                return Err(ShapeViolation::MissingId(id.clone()));
            }
        }
        Ok(())
    }
}

fn check_field(object: &Map<String, Value>, field: &FieldSpec) -> Result<(), ShapeViolation> {
    match object.get(&field.name) {
        None | Some(Value::Null) if !field.required => Ok(()),
        None => Err(ShapeViolation::MissingField(field.name.clone())),
        Some(v) if field.kind.matches(v) => Ok(()),
        Some(v) => Err(ShapeViolation::FieldKind {
            field: field.name.clone(),
            expected: field.kind,
            found: ValueKind::of(v),
        }),
    }
}

/// Why a value (or a collection element) was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeViolation {
    #[error("expected {expected}, found {found}")]
    WrongKind { expected: ValueKind, found: ValueKind },
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{field}` should be {expected}, found {found}")]
    FieldKind {
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("identifier field `{0}` is missing or not a string")]
    MissingId(String),
    #[error("duplicate identifier `{0}`")]
    DuplicateId(String),
}

/// Expected shape of a whole stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// A single value of the given kind, e.g. a filter preference.
    Value(ValueKind),
    /// A single object.
    Record(RecordShape),
    /// An array of objects, validated element by element.
    Collection(RecordShape),
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// The repaired value, or `None` when nothing usable remains (the value
    /// as a whole has the wrong shape).
    pub value: Option<Value>,
    /// Number of collection elements dropped.
    pub dropped: usize,
    /// What was wrong, one entry per rejection.
    pub violations: Vec<ShapeViolation>,
}

impl Validated {
    /// `true` when the input needed no repair.
    pub fn is_clean(&self) -> bool {
        self.value.is_some() && self.violations.is_empty()
    }
}

/// Validate `raw` against `shape`, dropping malformed collection elements.
///
/// Idempotent: validating an already-repaired value changes nothing.
pub fn validate(raw: &Value, shape: &Shape) -> Validated {
    match shape {
        Shape::Value(kind) => {
            let outcome = if kind.matches(raw) {
                Ok(())
            } else {
                Err(ShapeViolation::WrongKind {
                    expected: *kind,
                    found: ValueKind::of(raw),
                })
            };
            whole(raw, outcome)
        }
        Shape::Record(record) => whole(raw, record.check(raw)),
        Shape::Collection(record) => collection(raw, record),
    }
}

fn whole(raw: &Value, outcome: Result<(), ShapeViolation>) -> Validated {
    match outcome {
        Ok(()) => Validated {
            value: Some(raw.clone()),
            dropped: 0,
            violations: Vec::new(),
        },
        Err(violation) => Validated {
            value: None,
            dropped: 0,
            violations: vec![violation],
        },
    }
}

fn collection(raw: &Value, record: &RecordShape) -> Validated {
    let Some(items) = raw.as_array() else {
        return whole(
            raw,
            Err(ShapeViolation::WrongKind {
                expected: ValueKind::Array,
                found: ValueKind::of(raw),
            }),
        );
    };

    let mut seen = HashSet::new();
    let mut valid = Vec::with_capacity(items.len());
    let mut violations = Vec::new();

    for item in items {
        if let Err(violation) = record.check(item) {
            violations.push(violation);
            continue;
        }
        if let Some(id) = record.id_field().and_then(|f| item.get(f)).and_then(Value::as_str) {
            if !seen.insert(id.to_string()) {
                violations.push(ShapeViolation::DuplicateId(id.to_string()));
                continue;
            }
        }
        valid.push(item.clone());
    }

    Validated {
        value: Some(Value::Array(valid)),
        dropped: violations.len(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_shape() -> RecordShape {
        RecordShape::new()
            .required("id", ValueKind::String)
            .required("text", ValueKind::String)
            .required("completed", ValueKind::Bool)
            .optional("completedAt", ValueKind::Integer)
            .identified_by("id")
    }

    #[test]
    fn drops_malformed_elements() {
        let raw = json!([
            {"id": "1", "text": "a", "completed": false},
            {"notATask": true},
            {"id": "3", "text": "c", "completed": true}
        ]);
        let out = validate(&raw, &Shape::Collection(task_shape()));

        assert_eq!(out.dropped, 1);
        let kept = out.value.unwrap();
        assert_eq!(kept.as_array().unwrap().len(), 2);
        assert_eq!(kept[1]["id"], "3");
    }

    #[test]
    fn wrong_typed_fields_are_dropped_not_coerced() {
        let raw = json!([
            {"id": "1", "text": "a", "completed": "false"},
            {"id": "2", "text": "b", "completed": false, "completedAt": 1.5},
            {"id": "3", "text": "c", "completed": false, "completedAt": null}
        ]);
        let out = validate(&raw, &Shape::Collection(task_shape()));

        assert_eq!(out.dropped, 2);
        assert_eq!(out.value.unwrap()[0]["id"], "3");
        assert!(matches!(
            out.violations[0],
            ShapeViolation::FieldKind { expected: ValueKind::Bool, .. }
        ));
    }

    #[test]
    fn negative_timestamps_are_not_unsigned() {
        let shape = RecordShape::new()
            .required("id", ValueKind::String)
            .optional("createdAt", ValueKind::Unsigned)
            .identified_by("id");
        let raw = json!([
            {"id": "1", "createdAt": 5},
            {"id": "2", "createdAt": -5},
            {"id": "3", "createdAt": 2.5}
        ]);
        let out = validate(&raw, &Shape::Collection(shape));

        assert_eq!(out.dropped, 2);
        assert_eq!(out.value.unwrap().as_array().unwrap().len(), 1);
        assert!(ValueKind::Integer.matches(&json!(-5)));
        assert!(!ValueKind::Unsigned.matches(&json!(-5)));
    }

    #[test]
    fn later_duplicate_identifiers_are_dropped() {
        let raw = json!([
            {"id": "1", "text": "first", "completed": false},
            {"id": "1", "text": "second", "completed": true}
        ]);
        let out = validate(&raw, &Shape::Collection(task_shape()));

        assert_eq!(out.dropped, 1);
        assert_eq!(out.value.unwrap()[0]["text"], "first");
        assert_eq!(out.violations, vec![ShapeViolation::DuplicateId("1".into())]);
    }

    #[test]
    fn non_array_collection_has_no_usable_value() {
        let out = validate(&json!({"id": "1"}), &Shape::Collection(task_shape()));
        assert!(out.value.is_none());
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn scalar_and_record_shapes_are_all_or_nothing() {
        let filter = Shape::Value(ValueKind::String);
        assert!(validate(&json!("active"), &filter).is_clean());
        assert!(validate(&json!(3), &filter).value.is_none());

        let record = Shape::Record(task_shape());
        assert!(validate(&json!({"id": "1", "text": "a", "completed": true}), &record).is_clean());
        assert!(validate(&json!({"id": "1"}), &record).value.is_none());
    }

    #[test]
    fn revalidating_repaired_output_is_a_no_op() {
        let raw = json!([
            {"id": "1", "text": "a", "completed": false},
            7,
            {"id": "1", "text": "dup", "completed": false}
        ]);
        let shape = Shape::Collection(task_shape());
        let first = validate(&raw, &shape);
        let second = validate(first.value.as_ref().unwrap(), &shape);

        assert!(second.is_clean());
        assert_eq!(second.value, first.value);
    }
}
