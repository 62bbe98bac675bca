//! Read-only projected values.
//!
//! # Invariants
//! - Views and DTO rows own copies of row values; nothing flows back to
//!   the store.

use crate::error::{RepoError, RepoResult};
use crate::record::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ViewValue {
    Scalar(Value),
    Nested(View),
}

/// Closed or open projection of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    token: String,
    values: Vec<(String, ViewValue)>,
}

impl View {
    pub(crate) fn new(token: &str, values: Vec<(String, ViewValue)>) -> Self {
        Self {
            token: token.to_string(),
            values,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Member names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|(key, _)| key == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.member(name)? {
            ViewValue::Scalar(value) => Some(value),
            ViewValue::Nested(_) => None,
        }
    }

    pub fn nested(&self, name: &str) -> Option<&View> {
        match self.member(name)? {
            ViewValue::Nested(view) => Some(view),
            ViewValue::Scalar(_) => None,
        }
    }

    /// True when every scalar (nested included) is null.
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|(_, value)| match value {
            ViewValue::Scalar(value) => value.is_null(),
            ViewValue::Nested(view) => view.is_blank(),
        })
    }

    pub fn text(&self, name: &str) -> RepoResult<String> {
        self.optional_text(name)?
            .ok_or_else(|| self.invalid(name, "is null"))
    }

    pub fn optional_text(&self, name: &str) -> RepoResult<Option<String>> {
        match self.scalar(name)? {
            Value::Null => Ok(None),
            Value::Text(value) => Ok(Some(value.clone())),
            other => Err(self.invalid(name, &format!("holds {other:?}, expected text"))),
        }
    }

    pub fn integer(&self, name: &str) -> RepoResult<i64> {
        self.optional_integer(name)?
            .ok_or_else(|| self.invalid(name, "is null"))
    }

    pub fn optional_integer(&self, name: &str) -> RepoResult<Option<i64>> {
        match self.scalar(name)? {
            Value::Null => Ok(None),
            Value::Integer(value) => Ok(Some(*value)),
            other => Err(self.invalid(name, &format!("holds {other:?}, expected integer"))),
        }
    }

    fn member(&self, name: &str) -> Option<&ViewValue> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    fn scalar(&self, name: &str) -> RepoResult<&Value> {
        self.get(name)
            .ok_or_else(|| self.invalid(name, "is not a scalar member"))
    }

    fn invalid(&self, name: &str, reason: &str) -> RepoError {
        RepoError::InvalidData(format!("projection `{}` member `{name}` {reason}", self.token))
    }
}

/// DTO constructor arguments in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct DtoRow {
    token: String,
    arguments: Vec<Value>,
}

impl DtoRow {
    pub(crate) fn new(token: &str, arguments: Vec<Value>) -> Self {
        Self {
            token: token.to_string(),
            arguments,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    pub fn text(&self, index: usize) -> RepoResult<String> {
        match self.argument(index)? {
            Value::Text(value) => Ok(value.clone()),
            other => Err(self.invalid(index, &format!("holds {other:?}, expected text"))),
        }
    }

    pub fn optional_text(&self, index: usize) -> RepoResult<Option<String>> {
        match self.argument(index)? {
            Value::Null => Ok(None),
            _ => self.text(index).map(Some),
        }
    }

    pub fn integer(&self, index: usize) -> RepoResult<i64> {
        match self.argument(index)? {
            Value::Integer(value) => Ok(*value),
            other => Err(self.invalid(index, &format!("holds {other:?}, expected integer"))),
        }
    }

    fn argument(&self, index: usize) -> RepoResult<&Value> {
        self.arguments
            .get(index)
            .ok_or_else(|| self.invalid(index, "is out of range"))
    }

    fn invalid(&self, index: usize, reason: &str) -> RepoError {
        RepoError::InvalidData(format!("DTO `{}` argument {index} {reason}", self.token))
    }
}
