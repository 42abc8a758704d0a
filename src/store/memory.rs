//! In-process store with the same statement semantics as `PgStore`.
//!
//! Both tables live behind one lock, so each call behaves like a single
//! atomic statement. The `tokens -> authorizations` foreign key is enforced
//! without cascade, like the Postgres schema.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::query::{Filter, Page, TokenFilter};
use super::{AuthorizationStore, TokenStore};
use crate::errors::{StoreError, StoreResult};
use crate::models::{Authorization, NewAuthorization, NewToken, Status, Token};

#[derive(Default)]
struct Tables {
    // BTreeMap keeps authorizations in ascending id order.
    authorizations: BTreeMap<Uuid, Authorization>,
    tokens: BTreeMap<Uuid, Token>,
}

impl Tables {
    fn has_tokens(&self, authorization_id: Uuid) -> bool {
        self.tokens
            .values()
            .any(|t| t.authorization_id == Some(authorization_id))
    }

    fn matching<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Authorization> + 'a {
        let has_tokens = move |id: Uuid| self.has_tokens(id);
        self.authorizations
            .values()
            .filter(move |a| filter.matches(a, &has_tokens))
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Total number of token rows, attached or not.
    pub fn token_count(&self) -> StoreResult<usize> {
        Ok(self.lock()?.tokens.len())
    }
}

#[async_trait]
impl AuthorizationStore for MemoryStore {
    async fn query(&self, filter: &Filter, page: Page) -> StoreResult<Vec<Authorization>> {
        let tables = self.lock()?;
        Ok(page.apply(tables.matching(filter).cloned()))
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        let tables = self.lock()?;
        Ok(tables.matching(filter).count() as u64)
    }

    async fn select_ids(&self, filter: &Filter) -> StoreResult<Vec<Uuid>> {
        let tables = self.lock()?;
        Ok(tables.matching(filter).map(|a| a.id).collect())
    }

    async fn update_status(&self, filter: &Filter, status: Status) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let ids: Vec<Uuid> = tables.matching(filter).map(|a| a.id).collect();
        for id in &ids {
            if let Some(auth) = tables.authorizations.get_mut(id) {
                auth.status = status;
            }
        }
        Ok(ids.len() as u64)
    }

    async fn delete(&self, filter: &Filter) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let ids: Vec<Uuid> = tables.matching(filter).map(|a| a.id).collect();
        if let Some(owner) = ids.iter().find(|id| tables.has_tokens(**id)) {
            return Err(StoreError::ForeignKey(format!(
                "authorization {} is still referenced by tokens",
                owner
            )));
        }
        for id in &ids {
            tables.authorizations.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn insert(&self, new: &NewAuthorization) -> StoreResult<Authorization> {
        let mut tables = self.lock()?;
        if tables.authorizations.contains_key(&new.id) {
            return Err(StoreError::Duplicate(new.id));
        }
        let auth = new.clone().into_authorization();
        tables.authorizations.insert(auth.id, auth.clone());
        Ok(auth)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, new: &NewToken) -> StoreResult<Token> {
        let mut tables = self.lock()?;
        if tables.tokens.contains_key(&new.id) {
            return Err(StoreError::Duplicate(new.id));
        }
        if let Some(owner) = new.authorization_id {
            if !tables.authorizations.contains_key(&owner) {
                return Err(StoreError::ForeignKey(format!(
                    "authorization {} does not exist",
                    owner
                )));
            }
        }
        let token = new.clone().into_token();
        tables.tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn query_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<Token>> {
        let tables = self.lock()?;
        Ok(tables
            .tokens
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn delete_tokens(&self, filter: &TokenFilter) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| !filter.matches(t));
        Ok((before - tables.tokens.len()) as u64)
    }
}
