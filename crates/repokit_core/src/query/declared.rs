//! Declared-text queries with positional (`?1`) or named (`:name`) parameters.
//!
//! # Responsibility
//! - Parse `SELECT a FROM Entity a [JOIN FETCH a.x] [WHERE ...] [ORDER BY ...]`
//!   once, when the repository is built.
//! - Bind caller parameters into a filter specification per call.
//!
//! # Invariants
//! - One placeholder style per query; positional indices are contiguous
//!   from 1.
//! - Positional and named forms of the same predicate produce the same
//!   specification for the same values.

use crate::error::{RepoError, RepoResult};
use crate::fetch::plan_fetch;
use crate::paging::{Direction, Sort};
use crate::query::plan::QueryPlan;
use crate::record::Value;
use crate::registry::EntityRegistry;
use crate::spec::{Comparator, Criteria, Operand, Specification};
use std::collections::BTreeSet;

/// Parameters for one declared-query execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    positional: Vec<Operand>,
    named: Vec<(String, Operand)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next positional value (`?1`, `?2`, ...).
    pub fn arg(mut self, value: impl Into<Operand>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn bind(mut self, name: &str, value: impl Into<Operand>) -> Self {
        self.named.push((name.to_string(), value.into()));
        self
    }

    fn named_value(&self, name: &str) -> Option<&Operand> {
        self.named
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// Placeholder style used by a parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamStyle {
    None,
    Positional(usize),
    Named(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    None,
    Literal(Operand),
    Positional(usize),
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Compare {
        path: String,
        comparator: Comparator,
        term: Term,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Parsed, validated declared query.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredQuery {
    name: String,
    entity: String,
    filter: Option<Expr>,
    fetch: Vec<String>,
    sort: Sort,
    style: ParamStyle,
}

impl DeclaredQuery {
    /// # Errors
    /// - `UnresolvableIntent` for syntax errors, unknown attributes or
    ///   fetch paths, an entity other than `entity`, or mixed placeholder
    ///   styles.
    pub fn parse(
        registry: &EntityRegistry,
        entity: &str,
        name: &str,
        text: &str,
    ) -> RepoResult<Self> {
        let tokens = tokenize(text).map_err(|reason| unresolvable(name, &reason))?;
        let mut parser = Parser {
            registry,
            name,
            tokens,
            position: 0,
            entity: entity.to_string(),
            alias: String::new(),
            positional: BTreeSet::new(),
            named: Vec::new(),
        };
        parser.query()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn style(&self) -> &ParamStyle {
        &self.style
    }

    pub fn fetch_paths(&self) -> &[String] {
        &self.fetch
    }

    /// Binds parameters and produces the plan.
    ///
    /// # Errors
    /// - `UnresolvableIntent` for missing, unknown or mixed parameters.
    pub fn to_plan(&self, registry: &EntityRegistry, params: &Params) -> RepoResult<QueryPlan> {
        self.check_params(params)?;
        let criteria = Criteria::new(registry, &self.entity)?;
        let filter = match &self.filter {
            Some(expr) => Some(self.bind(&criteria, expr, params)?),
            None => None,
        };
        QueryPlan::new(registry, &self.entity, &self.name)?
            .with_filter(filter)?
            .with_sort(self.sort.clone())
            .with_fetch(registry, &self.fetch)
    }

    fn check_params(&self, params: &Params) -> RepoResult<()> {
        if !params.positional.is_empty() && !params.named.is_empty() {
            return Err(unresolvable(&self.name, "mixes positional and named parameters"));
        }
        match &self.style {
            ParamStyle::None if params.positional.is_empty() && params.named.is_empty() => Ok(()),
            ParamStyle::None => Err(unresolvable(&self.name, "takes no parameters")),
            ParamStyle::Positional(count) => {
                if !params.named.is_empty() {
                    return Err(unresolvable(&self.name, "expects positional parameters"));
                }
                if params.positional.len() != *count {
                    return Err(unresolvable(
                        &self.name,
                        &format!(
                            "expects {count} positional parameters, got {}",
                            params.positional.len()
                        ),
                    ));
                }
                Ok(())
            }
            ParamStyle::Named(names) => {
                if !params.positional.is_empty() {
                    return Err(unresolvable(&self.name, "expects named parameters"));
                }
                if let Some(missing) = names.iter().find(|name| params.named_value(name).is_none())
                {
                    return Err(unresolvable(
                        &self.name,
                        &format!("missing parameter `:{missing}`"),
                    ));
                }
                if let Some((unknown, _)) = params
                    .named
                    .iter()
                    .find(|(key, _)| !names.contains(key))
                {
                    return Err(unresolvable(
                        &self.name,
                        &format!("unknown parameter `:{unknown}`"),
                    ));
                }
                Ok(())
            }
        }
    }

    fn bind(&self, criteria: &Criteria<'_>, expr: &Expr, params: &Params) -> RepoResult<Specification> {
        match expr {
            Expr::Compare {
                path,
                comparator,
                term,
            } => {
                let operand = match term {
                    Term::None => Operand::None,
                    Term::Literal(operand) => operand.clone(),
                    Term::Positional(index) => params
                        .positional
                        .get(index - 1)
                        .cloned()
                        .ok_or_else(|| unresolvable(&self.name, &format!("missing `?{index}`")))?,
                    Term::Named(name) => params
                        .named_value(name)
                        .cloned()
                        .ok_or_else(|| unresolvable(&self.name, &format!("missing `:{name}`")))?,
                };
                criteria
                    .leaf(path, *comparator, operand)
                    .map_err(|err| unresolvable(&self.name, &err.to_string()))
            }
            Expr::And(left, right) => Ok(self
                .bind(criteria, left, params)?
                .and(self.bind(criteria, right, params)?)),
            Expr::Or(left, right) => Ok(self
                .bind(criteria, left, params)?
                .or(self.bind(criteria, right, params)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Text(String),
    Integer(i64),
    Real(f64),
    Positional(usize),
    Named(String),
    Operator(&'static str),
    Open,
    Close,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        match ch {
            ch if ch.is_whitespace() => index += 1,
            '(' => {
                tokens.push(Token::Open);
                index += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                index += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                index += 1;
            }
            '=' => {
                tokens.push(Token::Operator("="));
                index += 1;
            }
            '<' | '>' | '!' => {
                let next = chars.get(index + 1).copied();
                let (operator, width) = match (ch, next) {
                    ('<', Some('=')) => ("<=", 2),
                    ('<', Some('>')) => ("<>", 2),
                    ('<', _) => ("<", 1),
                    ('>', Some('=')) => (">=", 2),
                    ('>', _) => (">", 1),
                    ('!', Some('=')) => ("!=", 2),
                    _ => return Err(format!("unexpected `{ch}` at {index}")),
                };
                tokens.push(Token::Operator(operator));
                index += width;
            }
            '\'' => {
                let mut literal = String::new();
                index += 1;
                loop {
                    match chars.get(index) {
                        None => return Err("unterminated string literal".to_string()),
                        Some('\'') if chars.get(index + 1) == Some(&'\'') => {
                            literal.push('\'');
                            index += 2;
                        }
                        Some('\'') => {
                            index += 1;
                            break;
                        }
                        Some(other) => {
                            literal.push(*other);
                            index += 1;
                        }
                    }
                }
                tokens.push(Token::Text(literal));
            }
            '?' => {
                let start = index + 1;
                let end = scan(&chars, start, |ch| ch.is_ascii_digit());
                let digits: String = chars[start..end].iter().collect();
                let position = digits
                    .parse::<usize>()
                    .ok()
                    .filter(|position| *position > 0)
                    .ok_or_else(|| format!("invalid positional placeholder at {index}"))?;
                tokens.push(Token::Positional(position));
                index = end;
            }
            ':' => {
                let start = index + 1;
                let end = scan(&chars, start, |ch| ch.is_ascii_alphanumeric() || ch == '_');
                if end == start {
                    return Err(format!("empty named placeholder at {index}"));
                }
                tokens.push(Token::Named(chars[start..end].iter().collect()));
                index = end;
            }
            ch if ch.is_ascii_digit()
                || (ch == '-' && chars.get(index + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let end = scan(&chars, index + 1, |ch| ch.is_ascii_digit() || ch == '.');
                let literal: String = chars[index..end].iter().collect();
                let token = if literal.contains('.') {
                    literal.parse::<f64>().map(Token::Real).ok()
                } else {
                    literal.parse::<i64>().map(Token::Integer).ok()
                };
                tokens.push(token.ok_or_else(|| format!("invalid number `{literal}`"))?);
                index = end;
            }
            ch if ch.is_ascii_alphabetic() || ch == '_' => {
                let end = scan(&chars, index, |ch| {
                    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
                });
                tokens.push(Token::Word(chars[index..end].iter().collect()));
                index = end;
            }
            other => return Err(format!("unexpected `{other}` at {index}")),
        }
    }
    Ok(tokens)
}

fn scan(chars: &[char], start: usize, accept: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && accept(chars[end]) {
        end += 1;
    }
    end
}

struct Parser<'a> {
    registry: &'a EntityRegistry,
    name: &'a str,
    tokens: Vec<Token>,
    position: usize,
    entity: String,
    alias: String,
    positional: BTreeSet<usize>,
    named: Vec<String>,
}

impl Parser<'_> {
    fn query(&mut self) -> RepoResult<DeclaredQuery> {
        self.keyword("SELECT")?;
        let selected = self.word()?;
        self.keyword("FROM")?;
        let entity = self.word()?;
        if entity != self.entity {
            return Err(self.error(&format!(
                "selects `{entity}` but the repository manages `{}`",
                self.entity
            )));
        }
        self.alias = self.word()?;
        if selected != self.alias {
            return Err(self.error(&format!("selects unknown alias `{selected}`")));
        }

        let mut fetch = Vec::new();
        loop {
            if self.peek_keyword("LEFT") {
                self.position += 1;
            } else if !self.peek_keyword("JOIN") {
                break;
            }
            self.keyword("JOIN")?;
            self.keyword("FETCH")?;
            let path = self.word()?;
            fetch.push(self.strip_alias(&path)?);
        }
        plan_fetch(self.registry, &self.entity, &fetch)
            .map_err(|err| self.error(&err.to_string()))?;

        let filter = if self.peek_keyword("WHERE") {
            self.position += 1;
            Some(self.or_expr()?)
        } else {
            None
        };

        let mut sort = Sort::unsorted();
        if self.peek_keyword("ORDER") {
            self.position += 1;
            self.keyword("BY")?;
            loop {
                let path = self.scalar_path()?;
                let direction = if self.peek_keyword("DESC") {
                    self.position += 1;
                    Direction::Desc
                } else {
                    if self.peek_keyword("ASC") {
                        self.position += 1;
                    }
                    Direction::Asc
                };
                sort = sort.then(direction, &path);
                if self.tokens.get(self.position) != Some(&Token::Comma) {
                    break;
                }
                self.position += 1;
            }
        }

        if let Some(token) = self.tokens.get(self.position) {
            return Err(self.error(&format!("unexpected trailing {token:?}")));
        }

        let style = if !self.named.is_empty() {
            ParamStyle::Named(self.named.clone())
        } else if let Some(max) = self.positional.last().copied() {
            if self.positional.len() != max {
                return Err(self.error("positional placeholders must be contiguous from ?1"));
            }
            ParamStyle::Positional(max)
        } else {
            ParamStyle::None
        };

        Ok(DeclaredQuery {
            name: self.name.to_string(),
            entity: self.entity.clone(),
            filter,
            fetch,
            sort,
            style,
        })
    }

    fn or_expr(&mut self) -> RepoResult<Expr> {
        let mut left = self.and_expr()?;
        while self.peek_keyword("OR") {
            self.position += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> RepoResult<Expr> {
        let mut left = self.primary()?;
        while self.peek_keyword("AND") {
            self.position += 1;
            let right = self.primary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> RepoResult<Expr> {
        if self.tokens.get(self.position) == Some(&Token::Open) {
            self.position += 1;
            let inner = self.or_expr()?;
            self.expect(&Token::Close)?;
            return Ok(inner);
        }

        let path = self.scalar_path()?;
        if self.peek_keyword("IS") {
            self.position += 1;
            let comparator = if self.peek_keyword("NOT") {
                self.position += 1;
                Comparator::IsNotNull
            } else {
                Comparator::IsNull
            };
            self.keyword("NULL")?;
            return Ok(Expr::Compare {
                path,
                comparator,
                term: Term::None,
            });
        }
        if self.peek_keyword("LIKE") {
            self.position += 1;
            let term = self.term()?;
            return Ok(Expr::Compare {
                path,
                comparator: Comparator::Like,
                term,
            });
        }
        if self.peek_keyword("IN") {
            self.position += 1;
            let term = self.in_term()?;
            return Ok(Expr::Compare {
                path,
                comparator: Comparator::In,
                term,
            });
        }

        let comparator = match self.tokens.get(self.position) {
            Some(Token::Operator("=")) => Comparator::Equal,
            Some(Token::Operator("<>")) | Some(Token::Operator("!=")) => Comparator::NotEqual,
            Some(Token::Operator(">")) => Comparator::GreaterThan,
            Some(Token::Operator(">=")) => Comparator::GreaterThanOrEqual,
            Some(Token::Operator("<")) => Comparator::LessThan,
            Some(Token::Operator("<=")) => Comparator::LessThanOrEqual,
            other => return Err(self.error(&format!("expected comparison after `{path}`, found {other:?}"))),
        };
        self.position += 1;
        let term = self.term()?;
        Ok(Expr::Compare {
            path,
            comparator,
            term,
        })
    }

    fn in_term(&mut self) -> RepoResult<Term> {
        if self.tokens.get(self.position) != Some(&Token::Open) {
            return self.placeholder();
        }
        self.position += 1;
        if matches!(
            self.tokens.get(self.position),
            Some(Token::Positional(_)) | Some(Token::Named(_))
        ) {
            let term = self.placeholder()?;
            self.expect(&Token::Close)?;
            return Ok(term);
        }

        let mut values = Vec::new();
        loop {
            values.push(self.literal()?);
            match self.tokens.get(self.position) {
                Some(Token::Comma) => self.position += 1,
                Some(Token::Close) => {
                    self.position += 1;
                    break;
                }
                other => return Err(self.error(&format!("expected `,` or `)`, found {other:?}"))),
            }
        }
        Ok(Term::Literal(Operand::List(values)))
    }

    fn term(&mut self) -> RepoResult<Term> {
        match self.tokens.get(self.position) {
            Some(Token::Positional(_)) | Some(Token::Named(_)) => self.placeholder(),
            _ => Ok(Term::Literal(Operand::Value(self.literal()?))),
        }
    }

    fn placeholder(&mut self) -> RepoResult<Term> {
        let term = match self.tokens.get(self.position).cloned() {
            Some(Token::Positional(index)) => {
                if !self.named.is_empty() {
                    return Err(self.error("mixes positional and named placeholders"));
                }
                self.positional.insert(index);
                Term::Positional(index)
            }
            Some(Token::Named(name)) => {
                if !self.positional.is_empty() {
                    return Err(self.error("mixes positional and named placeholders"));
                }
                if !self.named.contains(&name) {
                    self.named.push(name.clone());
                }
                Term::Named(name)
            }
            other => return Err(self.error(&format!("expected placeholder, found {other:?}"))),
        };
        self.position += 1;
        Ok(term)
    }

    fn literal(&mut self) -> RepoResult<Value> {
        let value = match self.tokens.get(self.position) {
            Some(Token::Text(text)) => Value::Text(text.clone()),
            Some(Token::Integer(value)) => Value::Integer(*value),
            Some(Token::Real(value)) => Value::Real(*value),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("TRUE") => Value::Boolean(true),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("FALSE") => Value::Boolean(false),
            other => return Err(self.error(&format!("expected literal, found {other:?}"))),
        };
        self.position += 1;
        Ok(value)
    }

    fn scalar_path(&mut self) -> RepoResult<String> {
        let raw = self.word()?;
        let path = self.strip_alias(&raw)?;
        self.registry
            .resolve_scalar(&self.entity, &path)
            .map_err(|err| self.error(&err.to_string()))?;
        Ok(path)
    }

    fn strip_alias(&self, raw: &str) -> RepoResult<String> {
        raw.strip_prefix(self.alias.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
            .ok_or_else(|| self.error(&format!("path `{raw}` does not start with `{}.`", self.alias)))
    }

    fn word(&mut self) -> RepoResult<String> {
        match self.tokens.get(self.position) {
            Some(Token::Word(word)) => {
                let word = word.clone();
                self.position += 1;
                Ok(word)
            }
            other => Err(self.error(&format!("expected identifier, found {other:?}"))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(
            self.tokens.get(self.position),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword)
        )
    }

    fn keyword(&mut self, keyword: &str) -> RepoResult<()> {
        if !self.peek_keyword(keyword) {
            let found = self.tokens.get(self.position).cloned();
            return Err(self.error(&format!("expected `{keyword}`, found {found:?}")));
        }
        self.position += 1;
        Ok(())
    }

    fn expect(&mut self, token: &Token) -> RepoResult<()> {
        if self.tokens.get(self.position) != Some(token) {
            let found = self.tokens.get(self.position).cloned();
            return Err(self.error(&format!("expected {token:?}, found {found:?}")));
        }
        self.position += 1;
        Ok(())
    }

    fn error(&self, reason: &str) -> RepoError {
        unresolvable(self.name, reason)
    }
}

fn unresolvable(name: &str, reason: &str) -> RepoError {
    RepoError::UnresolvableIntent(format!("declared query `{name}`: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::{DeclaredQuery, ParamStyle, Params};
    use crate::error::RepoError;
    use crate::registry::{AttributeKind, EntityDescriptor, EntityRegistry};
    use crate::spec::Operand;

    fn registry() -> EntityRegistry {
        EntityRegistry::builder()
            .register(
                EntityDescriptor::builder("Side", "sides")
                    .generated_id("id", "side_id")
                    .attribute("name", AttributeKind::Text)
                    .build()
                    .expect("side"),
            )
            .register(
                EntityDescriptor::builder("Player", "players")
                    .generated_id("id", "player_id")
                    .attribute("name", AttributeKind::Text)
                    .attribute("height", AttributeKind::Integer)
                    .many_to_one("side", "Side", "side_id")
                    .build()
                    .expect("player"),
            )
            .build()
            .expect("registry")
    }

    #[test]
    fn positional_and_named_forms_bind_to_the_same_filter() {
        let registry = registry();
        let positional = DeclaredQuery::parse(
            &registry,
            "Player",
            "byPosition",
            "SELECT p FROM Player p WHERE p.name = ?1 AND p.height > ?2",
        )
        .expect("positional");
        let named = DeclaredQuery::parse(
            &registry,
            "Player",
            "byName",
            "select p from Player p where p.name = :name and p.height > :height",
        )
        .expect("named");

        assert_eq!(positional.style(), &ParamStyle::Positional(2));
        assert_eq!(
            named.style(),
            &ParamStyle::Named(vec!["name".to_string(), "height".to_string()])
        );

        let by_position = positional
            .to_plan(&registry, &Params::new().arg("Roy").arg(180))
            .expect("bind positional");
        let by_name = named
            .to_plan(&registry, &Params::new().bind("height", 180).bind("name", "Roy"))
            .expect("bind named");
        assert_eq!(by_position.filter(), by_name.filter());
    }

    #[test]
    fn in_accepts_placeholders_and_literal_lists() {
        let registry = registry();
        let query = DeclaredQuery::parse(
            &registry,
            "Player",
            "byIds",
            "SELECT p FROM Player p WHERE p.id IN :ids",
        )
        .expect("placeholder");
        let plan = query
            .to_plan(&registry, &Params::new().bind("ids", Operand::list([1, 2])))
            .expect("bind");
        assert!(plan.filter().is_some());

        DeclaredQuery::parse(
            &registry,
            "Player",
            "literal",
            "SELECT p FROM Player p WHERE (p.id IN (1, 2) OR p.name LIKE 'R%') ORDER BY p.height DESC, p.name",
        )
        .expect("literal list");
    }

    #[test]
    fn fetch_joins_become_fetch_paths() {
        let registry = registry();
        let query = DeclaredQuery::parse(
            &registry,
            "Player",
            "withSide",
            "SELECT p FROM Player p LEFT JOIN FETCH p.side WHERE p.side.name = 'TeamA'",
        )
        .expect("fetch");
        assert_eq!(query.fetch_paths(), ["side".to_string()]);
        let plan = query.to_plan(&registry, &Params::new()).expect("plan");
        assert_eq!(plan.fetch_paths().len(), 1);
    }

    #[test]
    fn malformed_queries_are_unresolvable() {
        let registry = registry();
        let cases = [
            "SELECT p FROM Player p WHERE p.name = ?1 AND p.height > :height",
            "SELECT p FROM Side p",
            "SELECT p FROM Player p WHERE p.weight = 3",
            "SELECT p FROM Player p WHERE p.name = ?2",
            "SELECT p FROM Player p WHERE p.name = 'open",
            "SELECT x FROM Player p",
        ];
        for text in cases {
            let err = DeclaredQuery::parse(&registry, "Player", "bad", text).unwrap_err();
            assert!(matches!(err, RepoError::UnresolvableIntent(_)), "{text}");
        }
    }

    #[test]
    fn parameter_mismatches_are_unresolvable() {
        let registry = registry();
        let query = DeclaredQuery::parse(
            &registry,
            "Player",
            "byName",
            "SELECT p FROM Player p WHERE p.name = :name",
        )
        .expect("parse");

        for params in [
            Params::new(),
            Params::new().arg("Roy"),
            Params::new().bind("name", "Roy").bind("height", 3),
        ] {
            let err = query.to_plan(&registry, &params).unwrap_err();
            assert!(matches!(err, RepoError::UnresolvableIntent(_)));
        }
    }

    #[test]
    fn unknown_fetch_path_fails_at_parse_time() {
        let registry = registry();
        let err = DeclaredQuery::parse(
            &registry,
            "Player",
            "withClub",
            "SELECT p FROM Player p JOIN FETCH p.club",
        )
        .unwrap_err();
        assert!(matches!(err, RepoError::UnresolvableIntent(_)));

        let query = DeclaredQuery::parse(
            &registry,
            "Player",
            "withSide",
            "SELECT p FROM Player p JOIN FETCH p.side",
        )
        .expect("parse");
        assert_eq!(query.fetch_paths(), ["side".to_string()]);
    }
}
