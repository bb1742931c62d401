//! Typed document values as stored in the shadow store

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Document fields keyed by field name.
pub type Fields = BTreeMap<String, FieldValue>;

/// A single document field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Map(Fields),
    /// Write-only sentinel replaced by the commit time of the write.
    ServerTimestamp,
}

impl FieldValue {
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer view that also accepts whole doubles, which clients without a
    /// separate integer type write for counters.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn as_whole_number(&self) -> Option<i64> {
        const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
        match self {
            Self::Integer(value) => Some(*value),
            Self::Double(value) if value.fract() == 0.0 && value.abs() <= MAX_EXACT => {
                Some(*value as i64)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    pub const fn as_map(&self) -> Option<&Fields> {
        match self {
            Self::Map(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Fields> for FieldValue {
    fn from(value: Fields) -> Self {
        Self::Map(value)
    }
}

/// Merge `update` into `target`.
///
/// Maps present on both sides are merged recursively; every other value in
/// `update` replaces the one in `target`. Fields absent from `update` are kept.
pub fn merge_fields(target: &mut Fields, update: Fields) {
    for (key, value) in update {
        match (target.get_mut(&key), value) {
            (Some(FieldValue::Map(existing)), FieldValue::Map(incoming)) => {
                merge_fields(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Replace every `ServerTimestamp` sentinel (including nested ones) with `at`.
pub fn resolve_server_timestamps(fields: &mut Fields, at: DateTime<Utc>) {
    for value in fields.values_mut() {
        match value {
            FieldValue::ServerTimestamp => *value = FieldValue::Timestamp(at),
            FieldValue::Map(nested) => resolve_server_timestamps(nested, at),
            _ => {}
        }
    }
}
