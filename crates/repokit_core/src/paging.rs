//! Pagination and slicing primitives.
//!
//! # Responsibility
//! - Translate a page request into offset/limit windows.
//! - Wrap query content with page metadata (`Page`) or a one-row lookahead
//!   (`Slice`).
//!
//! # Invariants
//! - Page size is at least 1.
//! - `map` transforms content element-wise and never touches metadata.

use crate::error::{RepoError, RepoResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One ordering key: an attribute path and its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub path: String,
    pub direction: Direction,
}

/// Ordered list of ordering keys; empty means store order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(direction: Direction, path: &str) -> Self {
        Self::unsorted().then(direction, path)
    }

    pub fn asc(path: &str) -> Self {
        Self::by(Direction::Asc, path)
    }

    pub fn desc(path: &str) -> Self {
        Self::by(Direction::Desc, path)
    }

    pub fn then(mut self, direction: Direction, path: &str) -> Self {
        self.orders.push(Order {
            path: path.to_string(),
            direction,
        });
        self
    }

    pub fn and(mut self, other: Sort) -> Self {
        self.orders.extend(other.orders);
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Zero-based page index plus page size and optional ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    size: u64,
    sort: Sort,
}

impl PageRequest {
    /// # Errors
    /// - `InvalidPageRequest` when `size` is zero.
    pub fn of(page: u64, size: u64) -> RepoResult<Self> {
        Self::of_sorted(page, size, Sort::unsorted())
    }

    pub fn of_sorted(page: u64, size: u64, sort: Sort) -> RepoResult<Self> {
        if size == 0 {
            return Err(RepoError::InvalidPageRequest(
                "page size must be at least 1".to_string(),
            ));
        }
        if page.checked_mul(size).is_none() {
            return Err(RepoError::InvalidPageRequest(format!(
                "page {page} of size {size} overflows the row offset"
            )));
        }
        Ok(Self { page, size, sort })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }

    /// Request for the following page with the same size and ordering.
    ///
    /// # Errors
    /// - `InvalidPageRequest` when the next page index or its row offset
    ///   overflows.
    pub fn next(&self) -> RepoResult<Self> {
        let page = self.page.checked_add(1).ok_or_else(|| {
            RepoError::InvalidPageRequest(format!("page {} has no successor", self.page))
        })?;
        Self::of_sorted(page, self.size, self.sort.clone())
    }
}

/// One page of content plus the total row count of the whole query.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    content: Vec<T>,
    page: u64,
    size: u64,
    total_elements: u64,
}

impl<T> Page<T> {
    pub(crate) fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            page: request.page,
            size: request.size,
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(self.size)
    }

    pub fn is_first(&self) -> bool {
        self.page == 0
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages().saturating_sub(1)
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn has_previous(&self) -> bool {
        self.page > 0
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
        }
    }

    /// Fallible element-wise conversion; metadata is kept on success.
    pub fn try_map<U>(self, f: impl FnMut(T) -> RepoResult<U>) -> RepoResult<Page<U>> {
        Ok(Page {
            content: self.content.into_iter().map(f).collect::<RepoResult<Vec<_>>>()?,
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
        })
    }
}

/// One page of content that only knows whether another page follows.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice<T> {
    content: Vec<T>,
    page: u64,
    size: u64,
    has_next: bool,
}

impl<T> Slice<T> {
    /// Builds a slice from up to `size + 1` fetched rows.
    pub(crate) fn from_lookahead(mut fetched: Vec<T>, request: &PageRequest) -> Self {
        let limit = usize::try_from(request.size).unwrap_or(usize::MAX);
        let has_next = fetched.len() > limit;
        fetched.truncate(limit);
        Self {
            content: fetched,
            page: request.page,
            size: request.size,
            has_next,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn is_first(&self) -> bool {
        self.page == 0
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn is_last(&self) -> bool {
        !self.has_next
    }

    pub fn has_previous(&self) -> bool {
        self.page > 0
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Slice<U> {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            has_next: self.has_next,
        }
    }

    pub fn try_map<U>(self, f: impl FnMut(T) -> RepoResult<U>) -> RepoResult<Slice<U>> {
        Ok(Slice {
            content: self.content.into_iter().map(f).collect::<RepoResult<Vec<_>>>()?,
            page: self.page,
            size: self.size,
            has_next: self.has_next,
        })
    }
}
