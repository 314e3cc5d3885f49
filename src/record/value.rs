//! Typed field values

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A parsed field value on a canonical record.
///
/// Raw adapter payloads are `serde_json::Value`; `from_json` is the one
/// place they are narrowed into this shape. Nested objects and nested lists
/// have no canonical representation and are reported as malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Parse a raw JSON value.
    ///
    /// `Ok(None)` means the field is absent (`null`).
    pub fn from_json(value: &Value) -> Result<Option<Self>, String> {
        match value {
            Value::Null => Ok(None),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match Self::scalar_from_json(item)? {
                        Some(v) => out.push(v),
                        None => continue,
                    }
                }
                Ok(Some(Self::List(out)))
            }
            other => Self::scalar_from_json(other),
        }
    }

    fn scalar_from_json(value: &Value) -> Result<Option<Self>, String> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(Self::Bool(*b))),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Some(Self::Integer(i)))
                } else {
                    n.as_f64()
                        .filter(|f| f.is_finite())
                        .map(|f| Some(Self::Float(f)))
                        .ok_or_else(|| format!("unrepresentable number {}", n))
                }
            }
            Value::String(s) => Ok(Some(Self::Text(s.clone()))),
            Value::Array(_) => Err("nested lists are not supported".to_string()),
            Value::Object(_) => Err("nested objects are not supported".to_string()),
        }
    }

    /// Empty values never win a scalar field and are skipped in unions.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.iter().all(|v| v.is_empty()),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Flatten into list members (a scalar is a one-element list).
    pub fn into_members(self) -> Vec<FieldValue> {
        match self {
            Self::List(items) => items,
            scalar => vec![scalar],
        }
    }

    /// Equality key used when de-duplicating set members.
    ///
    /// Text compares exactly; `"doc_2"` and `"Doc_2"` are different members.
    pub fn member_key(&self) -> String {
        match self {
            Self::Bool(b) => format!("b:{}", b),
            Self::Integer(i) => format!("n:{}", i),
            Self::Float(f) => format!("n:{}", f),
            Self::Text(s) => format!("s:{}", s),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.member_key()).collect();
                format!("l:[{}]", inner.join(","))
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Text(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
