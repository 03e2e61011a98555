//! Dynamically typed field values.

use crate::error::{StoreError, StoreResult};
use crate::types::{ModelId, RefKey, StoreId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// The type of a field or key component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Unsigned integer.
    UInt,
    /// Floating point number.
    Float,
    /// UTF-8 text.
    Text,
    /// Nullable reference into the given store.
    Ref(StoreId),
}

impl ValueType {
    /// Returns the value a freshly constructed field of this type holds.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::UInt => Value::UInt(0),
            Self::Float => Value::Float(0.0),
            Self::Text => Value::Text(String::new()),
            Self::Ref(_) => Value::Null,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::UInt => write!(f, "uint"),
            Self::Float => write!(f, "float"),
            Self::Text => write!(f, "text"),
            Self::Ref(store) => write!(f, "ref({store})"),
        }
    }
}

/// A field value.
///
/// Floats compare and hash by bit pattern so values can serve as index keys.
#[derive(Debug, Clone)]
pub enum Value {
    /// Unset reference.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Reference to a stored instance.
    Ref(RefKey),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` if the value may be stored in a slot of the given type.
    #[must_use]
    pub fn matches(&self, value_type: &ValueType) -> bool {
        match (self, value_type) {
            (Self::Bool(_), ValueType::Bool)
            | (Self::Int(_), ValueType::Int)
            | (Self::UInt(_), ValueType::UInt)
            | (Self::Float(_), ValueType::Float)
            | (Self::Text(_), ValueType::Text)
            | (Self::Null, ValueType::Ref(_)) => true,
            (Self::Ref(key), ValueType::Ref(store)) => key.store == *store,
            _ => false,
        }
    }

    /// Returns a short name of the value's type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Ref(_) => "ref",
        }
    }

    /// Returns the referenced id, if this is a reference.
    #[must_use]
    pub fn as_ref_key(&self) -> Option<RefKey> {
        match self {
            Self::Ref(key) => Some(*key),
            _ => None,
        }
    }

    /// Returns the text, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Converts into text.
    pub fn into_text(self) -> StoreResult<String> {
        match self {
            Self::Text(text) => Ok(text),
            other => Err(StoreError::type_mismatch(ValueType::Text, other.type_name())),
        }
    }

    /// Converts into a signed integer.
    pub fn into_int(self) -> StoreResult<i64> {
        match self {
            Self::Int(value) => Ok(value),
            other => Err(StoreError::type_mismatch(ValueType::Int, other.type_name())),
        }
    }

    /// Converts into an unsigned integer.
    pub fn into_uint(self) -> StoreResult<u64> {
        match self {
            Self::UInt(value) => Ok(value),
            other => Err(StoreError::type_mismatch(ValueType::UInt, other.type_name())),
        }
    }

    /// Converts into a boolean.
    pub fn into_bool(self) -> StoreResult<bool> {
        match self {
            Self::Bool(value) => Ok(value),
            other => Err(StoreError::type_mismatch(ValueType::Bool, other.type_name())),
        }
    }

    /// Converts into a float.
    pub fn into_float(self) -> StoreResult<f64> {
        match self {
            Self::Float(value) => Ok(value),
            other => Err(StoreError::type_mismatch(ValueType::Float, other.type_name())),
        }
    }

    /// Encodes the value for export. References are written as bare ids.
    ///
    /// JSON has no encoding for NaN or infinities, so non-finite floats are
    /// rejected rather than written as `null`.
    pub fn to_json(&self) -> StoreResult<serde_json::Value> {
        let json = match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(value) => serde_json::Value::from(*value),
            Self::Int(value) => serde_json::Value::from(*value),
            Self::UInt(value) => serde_json::Value::from(*value),
            Self::Float(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    StoreError::invalid_operation(format!("cannot export non-finite float {value}"))
                })?,
            Self::Text(value) => serde_json::Value::from(value.as_str()),
            Self::Ref(key) => serde_json::Value::from(key.id.as_u64()),
        };
        Ok(json)
    }

    /// Decodes an exported value of the given type.
    ///
    /// JSON `null` decodes to the type's default value.
    pub fn from_json(json: &serde_json::Value, value_type: &ValueType) -> StoreResult<Self> {
        if json.is_null() {
            return Ok(value_type.default_value());
        }
        let decoded = match value_type {
            ValueType::Bool => json.as_bool().map(Self::Bool),
            ValueType::Int => json.as_i64().map(Self::Int),
            ValueType::UInt => json.as_u64().map(Self::UInt),
            ValueType::Float => json.as_f64().map(Self::Float),
            ValueType::Text => json.as_str().map(|text| Self::Text(text.to_string())),
            ValueType::Ref(store) => json
                .as_u64()
                .map(|id| Self::Ref(RefKey::new(*store, ModelId::new(id)))),
        };
        decoded.ok_or_else(|| StoreError::type_mismatch(value_type, json))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(value) => value.hash(state),
            Self::Int(value) => value.hash(state),
            Self::UInt(value) => value.hash(state),
            Self::Float(value) => value.to_bits().hash(state),
            Self::Text(value) => value.hash(state),
            Self::Ref(key) => key.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::UInt(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
            Self::Ref(key) => write!(f, "{key}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<RefKey> for Value {
    fn from(key: RefKey) -> Self {
        Self::Ref(key)
    }
}

impl From<Option<RefKey>> for Value {
    fn from(key: Option<RefKey>) -> Self {
        key.map_or(Self::Null, Self::Ref)
    }
}
