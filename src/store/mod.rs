pub mod memory;
pub mod postgres;
pub mod query;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::StoreResult;
use crate::models::{Authorization, NewAuthorization, NewToken, Status, Token};
use query::{Filter, Page, TokenFilter};

/// Storage capabilities over the `authorizations` table.
///
/// Every write is a single set-based statement; implementations must not
/// load rows to mutate them one by one.
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Rows matching `filter`, ordered by ascending id, windowed by `page`.
    async fn query(&self, filter: &Filter, page: Page) -> StoreResult<Vec<Authorization>>;

    async fn count(&self, filter: &Filter) -> StoreResult<u64>;

    /// Ids only, for callers that feed them into a follow-up bulk statement.
    async fn select_ids(&self, filter: &Filter) -> StoreResult<Vec<Uuid>>;

    /// Sets `status` on every matching row. Returns the affected row count.
    async fn update_status(&self, filter: &Filter, status: Status) -> StoreResult<u64>;

    async fn delete(&self, filter: &Filter) -> StoreResult<u64>;

    async fn insert(&self, new: &NewAuthorization) -> StoreResult<Authorization>;
}

/// Storage capabilities over the `tokens` table.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, new: &NewToken) -> StoreResult<Token>;

    async fn query_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<Token>>;

    async fn delete_tokens(&self, filter: &TokenFilter) -> StoreResult<u64>;
}
