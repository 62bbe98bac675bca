//! Scalar values carried by records, filters and projections.
//!
//! # Invariants
//! - Timestamps travel as epoch milliseconds (`Value::Integer`).
//! - `Boolean` is stored as `0`/`1` and decoded back by attribute kind.

use crate::registry::AttributeKind;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One persisted scalar.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns whether this value equals the zero value of `kind`.
    ///
    /// Query-by-example skips these, the same way it skips `Null`.
    pub fn is_default_for(&self, kind: AttributeKind) -> bool {
        match (self, kind) {
            (Self::Null, _) => true,
            (Self::Integer(value), AttributeKind::Integer | AttributeKind::Timestamp) => {
                *value == 0
            }
            (Self::Real(value), AttributeKind::Real) => *value == 0.0,
            (Self::Text(value), AttributeKind::Text) => value.is_empty(),
            (Self::Boolean(value), AttributeKind::Boolean) => !*value,
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Stable textual key used by the scope identity map.
    pub(crate) fn cache_key(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Integer(value) => format!("i:{value}"),
            Self::Real(value) => format!("r:{value}"),
            Self::Text(value) => format!("t:{value}"),
            Self::Boolean(value) => format!("b:{value}"),
        }
    }

    pub(crate) fn to_sql(&self) -> SqlValue {
        match self {
            Self::Null => SqlValue::Null,
            Self::Integer(value) => SqlValue::Integer(*value),
            Self::Real(value) => SqlValue::Real(*value),
            Self::Text(value) => SqlValue::Text(value.clone()),
            Self::Boolean(value) => SqlValue::Integer(i64::from(*value)),
        }
    }

    /// Decodes one SQLite column according to the declared attribute kind.
    pub(crate) fn from_sql(value: SqlValue, kind: AttributeKind) -> Option<Self> {
        let decoded = match (value, kind) {
            (SqlValue::Null, _) => Self::Null,
            (SqlValue::Integer(value), AttributeKind::Boolean) => match value {
                0 => Self::Boolean(false),
                1 => Self::Boolean(true),
                _ => return None,
            },
            (SqlValue::Integer(value), AttributeKind::Real) => Self::Real(value as f64),
            (SqlValue::Integer(value), AttributeKind::Integer | AttributeKind::Timestamp) => {
                Self::Integer(value)
            }
            (SqlValue::Real(value), AttributeKind::Real) => Self::Real(value),
            (SqlValue::Text(value), AttributeKind::Text) => Self::Text(value),
            _ => return None,
        };
        Some(decoded)
    }
}

impl Display for Value {
    /// Renders the value as plain text; `Null` renders empty.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
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

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
