//! Core types for the key-value store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed or desired state of a single key.
///
/// When `present` is false the `value` field carries no meaning and is kept
/// empty. Use [`KeyedValue::value`] to read it safely.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyedValue {
    /// The key.
    pub key: String,

    /// The value, meaningful only when `present` is true.
    pub value: String,

    /// Whether the key exists.
    pub present: bool,
}

impl KeyedValue {
    /// A key holding `value`.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            present: true,
        }
    }

    /// A key that does not exist.
    pub fn absent(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            present: false,
        }
    }

    /// Build from the result of a store read.
    pub fn from_read(key: impl Into<String>, value: Option<String>) -> Self {
        match value {
            Some(value) => Self::new(key, value),
            None => Self::absent(key),
        }
    }

    /// The value, or `None` if the key is absent.
    pub fn value(&self) -> Option<&str> {
        if self.present {
            Some(&self.value)
        } else {
            None
        }
    }
}

impl fmt::Debug for KeyedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(value) => write!(f, "{}={:?}", self.key, value),
            None => write!(f, "{}=<absent>", self.key),
        }
    }
}
