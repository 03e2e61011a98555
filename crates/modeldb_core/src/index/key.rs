//! Index keys.

use crate::model::{Value, ValueType};
use crate::types::RefKey;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Mixes `hash` into `seed`, boost style.
pub fn hash_combine(seed: &mut u64, hash: u64) {
    *seed ^= hash
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(*seed << 6)
        .wrapping_add(*seed >> 2);
}

/// An ordered tuple of values keying a compound index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundKey(Vec<Value>);

impl CompoundKey {
    /// Creates a key from its components.
    #[must_use]
    pub fn new(components: Vec<Value>) -> Self {
        Self(components)
    }

    /// Returns the components in field order.
    #[must_use]
    pub fn components(&self) -> &[Value] {
        &self.0
    }

    /// Consumes the key, returning its components.
    #[must_use]
    pub fn into_components(self) -> Vec<Value> {
        self.0
    }

    /// Returns the hash of the components folded left to right.
    #[must_use]
    pub fn combined_hash(&self) -> u64 {
        let mut seed = 0;
        for component in &self.0 {
            let mut hasher = DefaultHasher::new();
            component.hash(&mut hasher);
            hash_combine(&mut seed, hasher.finish());
        }
        seed
    }
}

impl Hash for CompoundKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.combined_hash());
    }
}

impl fmt::Display for CompoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{component}")?;
        }
        write!(f, ")")
    }
}

/// A lookup key: one value, or a tuple for compound indexes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Single field value.
    Single(Value),
    /// Tuple of field values.
    Compound(CompoundKey),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(value) => write!(f, "{value}"),
            Self::Compound(key) => write!(f, "{key}"),
        }
    }
}

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Self::Single(value)
    }
}

impl From<CompoundKey> for Key {
    fn from(key: CompoundKey) -> Self {
        Self::Compound(key)
    }
}

impl From<Vec<Value>> for Key {
    fn from(components: Vec<Value>) -> Self {
        Self::Compound(CompoundKey::new(components))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<RefKey> for Key {
    fn from(key: RefKey) -> Self {
        Self::Single(Value::Ref(key))
    }
}

/// The shape of keys an index accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    /// Single value of the given type.
    Single(ValueType),
    /// Tuple with one component per field, in field order.
    Compound(Vec<ValueType>),
}

impl KeyType {
    /// Returns `true` if `key` has this shape.
    #[must_use]
    pub fn matches(&self, key: &Key) -> bool {
        match (self, key) {
            (Self::Single(value_type), Key::Single(value)) => value.matches(value_type),
            (Self::Compound(types), Key::Compound(key)) => {
                types.len() == key.components().len()
                    && types
                        .iter()
                        .zip(key.components())
                        .all(|(value_type, value)| value.matches(value_type))
            }
            _ => false,
        }
    }

    /// Returns the key of a freshly constructed instance.
    #[must_use]
    pub fn default_key(&self) -> Key {
        match self {
            Self::Single(value_type) => Key::Single(value_type.default_value()),
            Self::Compound(types) => Key::Compound(CompoundKey::new(
                types.iter().map(ValueType::default_value).collect(),
            )),
        }
    }
}
