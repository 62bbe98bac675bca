//! `{path}` templates for open projections.
//!
//! # Invariants
//! - `{{` and `}}` render literal braces; any other brace is a syntax error.
//! - Substituted values are inserted verbatim and never parsed again.

use crate::error::{RepoError, RepoResult};
use crate::record::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Path(String),
}

/// Parsed template such as `"height: {height}, weight: {weight}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// # Errors
    /// - `InvalidDescriptor` for unbalanced braces or empty/invalid paths.
    pub fn parse(source: &str) -> RepoResult<Self> {
        let invalid = |reason: &str| {
            RepoError::InvalidDescriptor(format!("template `{source}`: {reason}"))
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("unmatched `}`")),
                '{' => {
                    let mut path = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' => {
                                path.push(ch)
                            }
                            Some(ch) if ch.is_whitespace() => {}
                            Some(other) => {
                                return Err(invalid(&format!("unexpected `{other}` in placeholder")))
                            }
                            None => return Err(invalid("unterminated placeholder")),
                        }
                    }
                    if path.is_empty() || path.starts_with('.') || path.ends_with('.') {
                        return Err(invalid("empty placeholder path"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Path(path));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Attribute paths referenced by placeholders, in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Path(path) => Some(path.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Renders the template; `Null` values render empty.
    pub fn render(&self, mut lookup: impl FnMut(&str) -> RepoResult<Value>) -> RepoResult<String> {
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Path(path) => rendered.push_str(&lookup(path)?.to_string()),
            }
        }
        Ok(rendered)
    }
}
