//! Backend-neutral filters over the `authorizations` and `tokens` tables.
//!
//! A [`Filter`] is a conjunction of [`Predicate`]s. The empty filter matches
//! every row: callers that omit all criteria get the whole table, never an
//! empty result. Stores either compile a filter to SQL (`PgStore`) or
//! evaluate it directly (`MemoryStore`) via [`Filter::matches`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Authorization, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Id(Uuid),
    /// An empty list matches nothing.
    IdIn(Vec<Uuid>),
    Subject(String),
    ApplicationId(Uuid),
    /// Compared against the stored string, so unknown values match nothing.
    Status(String),
    StatusNot(String),
    Type(String),
    /// Strictly older than the cutoff. Rows without a creation date never match.
    CreatedBefore(DateTime<Utc>),
    /// No token row references the authorization.
    WithoutTokens,
    /// Logical OR. An empty `Any` matches nothing.
    Any(Vec<Predicate>),
    /// Logical AND, for grouping inside `Any`. An empty `All` matches everything.
    All(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, auth: &Authorization, has_tokens: &dyn Fn(Uuid) -> bool) -> bool {
        match self {
            Predicate::Id(id) => auth.id == *id,
            Predicate::IdIn(ids) => ids.contains(&auth.id),
            Predicate::Subject(subject) => auth.subject == *subject,
            Predicate::ApplicationId(app) => auth.application_id == Some(*app),
            Predicate::Status(status) => auth.status.as_str() == status,
            Predicate::StatusNot(status) => auth.status.as_str() != status,
            Predicate::Type(kind) => auth.kind.as_str() == kind,
            Predicate::CreatedBefore(cutoff) => auth.creation_date.is_some_and(|d| d < *cutoff),
            Predicate::WithoutTokens => !has_tokens(auth.id),
            Predicate::Any(any) => any.iter().any(|p| p.matches(auth, has_tokens)),
            Predicate::All(all) => all.iter().all(|p| p.matches(auth, has_tokens)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds `ctor(value)` only when `value` is present.
    pub fn and_if<T>(self, value: Option<T>, ctor: impl FnOnce(T) -> Predicate) -> Self {
        match value {
            Some(v) => self.and(ctor(v)),
            None => self,
        }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, auth: &Authorization, has_tokens: &dyn Fn(Uuid) -> bool) -> bool {
        self.predicates.iter().all(|p| p.matches(auth, has_tokens))
    }
}

/// Skip/take window over an id-ordered listing. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: Option<u64>,
    pub count: Option<u64>,
}

impl Page {
    pub fn new(count: Option<u64>, offset: Option<u64>) -> Self {
        Self { offset, count }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn first(count: u64) -> Self {
        Self {
            offset: None,
            count: Some(count),
        }
    }

    /// Applies skip then take to an already ordered sequence.
    pub fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        let skipped = items.skip(self.offset.unwrap_or(0) as usize);
        match self.count {
            Some(count) => skipped.take(count as usize).collect(),
            None => skipped.collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenFilter {
    AuthorizationId(Uuid),
    /// Tokens whose authorization id is in the list. Detached tokens never match.
    AuthorizationIdIn(Vec<Uuid>),
}

impl TokenFilter {
    pub fn matches(&self, token: &Token) -> bool {
        match (self, token.authorization_id) {
            (_, None) => false,
            (TokenFilter::AuthorizationId(id), Some(owner)) => owner == *id,
            (TokenFilter::AuthorizationIdIn(ids), Some(owner)) => ids.contains(&owner),
        }
    }
}

/// Treats null, empty and whitespace-only input as an omitted criterion.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}
