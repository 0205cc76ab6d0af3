use crate::error::EngineError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Storage type of an attribute. Relationship and files attributes are
/// markers: files have no column at all, relationships hold the referenced
/// record's primary key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ContentType {
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "bigint")]
    Bigint,
    #[serde(rename = "numeric")]
    Numeric,
    #[serde(rename = "real")]
    Real,
    #[serde(rename = "double precision")]
    Double,
    #[serde(rename = "varchar")]
    Varchar,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "uuid")]
    Uuid,
    #[serde(rename = "regconfig")]
    Regconfig,
    #[serde(rename = "files")]
    Files,
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "n:1")]
    ManyToOne,
}

impl ContentType {
    pub fn is_relationship(self) -> bool {
        matches!(self, ContentType::OneToOne | ContentType::ManyToOne)
    }

    pub fn is_files(self) -> bool {
        matches!(self, ContentType::Files)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Integer => "integer",
            ContentType::Bigint => "bigint",
            ContentType::Numeric => "numeric",
            ContentType::Real => "real",
            ContentType::Double => "double precision",
            ContentType::Varchar => "varchar",
            ContentType::Text => "text",
            ContentType::Boolean => "boolean",
            ContentType::Uuid => "uuid",
            ContentType::Regconfig => "regconfig",
            ContentType::Files => "files",
            ContentType::OneToOne => "1:1",
            ContentType::ManyToOne => "n:1",
        }
    }
}

/// Presentation hint layered on top of the content type. Dates and times are
/// stored as unix seconds in integer columns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentUse {
    #[default]
    Default,
    Date,
    Datetime,
    Time,
    Color,
    Richtext,
    Iframe,
    Barcode,
    Drawing,
}

impl ContentUse {
    pub fn is_calendar(self) -> bool {
        matches!(self, ContentUse::Date | ContentUse::Datetime)
    }
}

/// Value bound to a statement placeholder or read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Arbitrary precision decimal kept in its textual form.
    Numeric(CompactString),
    Text(CompactString),
    Uuid(Uuid),
    Json(JsonValue),
    IntegerArray(Vec<i64>),
    TextArray(Vec<CompactString>),
    UuidArray(Vec<Uuid>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::IntegerArray(_) => "integer[]",
            Value::TextArray(_) => "text[]",
            Value::UuidArray(_) => "uuid[]",
        }
    }

    /// Untyped conversion used for filter literals, where no attribute type
    /// is known. Homogeneous arrays become typed arrays so they can feed
    /// `= ANY` / `<> ALL`.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map_or(Value::Null, Value::Float),
            },
            JsonValue::String(s) => Value::Text(s.as_str().into()),
            JsonValue::Array(items) => {
                if items.iter().all(|v| v.as_i64().is_some()) {
                    Value::IntegerArray(items.iter().filter_map(JsonValue::as_i64).collect())
                } else if items.iter().all(JsonValue::is_string) {
                    Value::TextArray(
                        items
                            .iter()
                            .filter_map(JsonValue::as_str)
                            .map(CompactString::from)
                            .collect(),
                    )
                } else {
                    Value::Json(json.clone())
                }
            }
            JsonValue::Object(_) => Value::Json(json.clone()),
        }
    }

    /// Typed conversion for values written into a column of `content`.
    pub fn from_json_typed(content: ContentType, json: &JsonValue) -> Result<Value, EngineError> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || {
            EngineError::Validation(format!(
                "value {json} does not match content type '{}'",
                content.as_str()
            ))
        };
        match content {
            ContentType::Integer
            | ContentType::Bigint
            | ContentType::OneToOne
            | ContentType::ManyToOne => json.as_i64().map(Value::Integer).ok_or_else(mismatch),
            ContentType::Numeric => match json {
                JsonValue::Number(n) => Ok(Value::Numeric(n.to_string().into())),
                JsonValue::String(s) if is_decimal_literal(s) => Ok(Value::Numeric(s.into())),
                _ => Err(mismatch()),
            },
            ContentType::Real | ContentType::Double => {
                json.as_f64().map(Value::Float).ok_or_else(mismatch)
            }
            ContentType::Varchar | ContentType::Text | ContentType::Regconfig => json
                .as_str()
                .map(|s| Value::Text(s.into()))
                .ok_or_else(mismatch),
            ContentType::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(mismatch),
            ContentType::Uuid => json
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(Value::Uuid)
                .ok_or_else(mismatch),
            ContentType::Files => Err(EngineError::Validation(
                "files attributes have no column value".into(),
            )),
        }
    }

    /// JSON form handed to callers. Decimals are returned as strings so no
    /// precision is lost in transit.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Integer(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Numeric(s) | Value::Text(s) => JsonValue::String(s.to_string()),
            Value::Uuid(u) => JsonValue::String(u.to_string()),
            Value::Json(j) => j.clone(),
            Value::IntegerArray(items) => {
                JsonValue::Array(items.iter().map(|v| JsonValue::from(*v)).collect())
            }
            Value::TextArray(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|v| JsonValue::String(v.to_string()))
                    .collect(),
            ),
            Value::UuidArray(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|v| JsonValue::String(v.to_string()))
                    .collect(),
            ),
        }
    }
}

pub(crate) fn is_decimal_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let int_part = parts.next().unwrap_or_default();
    let frac_part = parts.next();
    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    all_digits(int_part) && frac_part.is_none_or(all_digits)
}
