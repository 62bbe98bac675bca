//! Query intent resolution.
//!
//! # Responsibility
//! - Turn pattern-derived names, declared query text and example probes
//!   into one `QueryPlan` shape.
//!
//! # Invariants
//! - Resolution validates every attribute path before execution.
//! - Plans are immutable; execution never re-resolves them.

pub mod declared;
pub mod example;
pub mod pattern;
pub mod plan;

pub use declared::{DeclaredQuery, ParamStyle, Params};
pub use example::Example;
pub use pattern::{Clause, DerivedQuery, PatternCache};
pub use plan::{QueryKind, QueryPlan, Window};
