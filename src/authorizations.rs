//! Authorization lookups, bulk revocation and pruning.
//!
//! `AuthorizationManager` holds no state of its own. Reads return detached
//! snapshots and every write is a set-based statement issued through the
//! store, so nothing here needs locking.

use std::future::Future;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};
use crate::models::{Authorization, AuthorizationType, NewAuthorization, Status, Token};
use crate::store::query::{non_blank, Filter, Page, Predicate, TokenFilter};
use crate::store::{AuthorizationStore, TokenStore};

/// Optional lookup criteria, combined with AND.
///
/// Blank strings count as omitted. With nothing set the criteria match
/// every authorization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub subject: Option<String>,
    pub application_id: Option<Uuid>,
    pub status: Option<String>,
    pub kind: Option<String>,
}

impl Criteria {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn application_id(mut self, application_id: Uuid) -> Self {
        self.application_id = Some(application_id);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn to_filter(&self) -> Filter {
        Filter::all()
            .and_if(non_blank(self.subject.as_deref()), Predicate::Subject)
            .and_if(self.application_id, Predicate::ApplicationId)
            .and_if(non_blank(self.status.as_deref()), Predicate::Status)
            .and_if(non_blank(self.kind.as_deref()), Predicate::Type)
    }
}

/// Authorizations that pruning removes: created strictly before `cutoff`, and
/// either no longer valid or ad-hoc with no token left referencing them.
///
/// Permanent valid authorizations are kept even when they have no tokens.
pub fn stale_filter(cutoff: DateTime<Utc>) -> Filter {
    Filter::all()
        .and(Predicate::CreatedBefore(cutoff))
        .and(Predicate::Any(vec![
            Predicate::StatusNot(Status::Valid.as_str().to_string()),
            Predicate::All(vec![
                Predicate::Type(AuthorizationType::AdHoc.as_str().to_string()),
                Predicate::WithoutTokens,
            ]),
        ]))
}

/// Races `fut` against `cancel`; a fired token wins and nothing is awaited further.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        result = fut => result,
    }
}

pub struct AuthorizationManager<S> {
    store: S,
}

impl<S> AuthorizationManager<S>
where
    S: AuthorizationStore + TokenStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -- Lookups --

    pub async fn find(
        &self,
        criteria: &Criteria,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Authorization>> {
        let filter = criteria.to_filter();
        cancellable(cancel, self.store.query(&filter, Page::unbounded())).await
    }

    pub async fn find_by_application_id(
        &self,
        application_id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Authorization>> {
        let filter = Filter::all().and(Predicate::ApplicationId(application_id));
        cancellable(cancel, self.store.query(&filter, Page::unbounded())).await
    }

    /// `Ok(None)` when no authorization has this id.
    pub async fn find_by_id(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<Authorization>> {
        let filter = Filter::all().and(Predicate::Id(id));
        let rows = cancellable(cancel, self.store.query(&filter, Page::first(1))).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_by_subject(
        &self,
        subject: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Authorization>> {
        let filter = Filter::all().and(Predicate::Subject(subject.to_string()));
        cancellable(cancel, self.store.query(&filter, Page::unbounded())).await
    }

    /// All authorizations in ascending id order, `offset` skipped before `count` is taken.
    pub async fn list(
        &self,
        count: Option<u64>,
        offset: Option<u64>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Authorization>> {
        cancellable(
            cancel,
            self.store.query(&Filter::all(), Page::new(count, offset)),
        )
        .await
    }

    pub async fn count(&self, criteria: &Criteria, cancel: &CancellationToken) -> StoreResult<u64> {
        cancellable(cancel, self.store.count(&criteria.to_filter())).await
    }

    /// Tokens currently referencing `authorization_id`.
    pub async fn tokens_for(
        &self,
        authorization_id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Token>> {
        let filter = TokenFilter::AuthorizationId(authorization_id);
        cancellable(cancel, self.store.query_tokens(&filter)).await
    }

    pub async fn create(
        &self,
        new: NewAuthorization,
        cancel: &CancellationToken,
    ) -> StoreResult<Authorization> {
        let created = cancellable(cancel, self.store.insert(&new)).await?;
        debug!(id = %created.id, subject = %created.subject, kind = %created.kind, "authorization created");
        Ok(created)
    }

    // -- Revocation --

    /// Marks every matching authorization revoked in one statement.
    ///
    /// Rows that are already revoked are left alone, so the count reports
    /// only actual transitions and a repeated call returns 0.
    pub async fn revoke(&self, criteria: &Criteria, cancel: &CancellationToken) -> StoreResult<u64> {
        self.revoke_where(criteria.to_filter(), cancel).await
    }

    pub async fn revoke_by_application_id(
        &self,
        application_id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        self.revoke_where(Filter::all().and(Predicate::ApplicationId(application_id)), cancel)
            .await
    }

    pub async fn revoke_by_subject(
        &self,
        subject: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        self.revoke_where(
            Filter::all().and(Predicate::Subject(subject.to_string())),
            cancel,
        )
        .await
    }

    async fn revoke_where(&self, filter: Filter, cancel: &CancellationToken) -> StoreResult<u64> {
        let filter = filter.and(Predicate::StatusNot(Status::Revoked.as_str().to_string()));
        let rows = cancellable(cancel, self.store.update_status(&filter, Status::Revoked)).await?;
        info!(rows, "revoked authorizations");
        Ok(rows)
    }

    // -- Pruning --

    /// Deletes stale authorizations created before `cutoff` together with their tokens.
    ///
    /// Tokens go first so the foreign key never dangles. If the second
    /// statement fails or is cancelled, the tokenless authorizations remain
    /// stale and the next run removes them. Returns tokens + authorizations deleted.
    pub async fn prune(&self, cutoff: DateTime<Utc>, cancel: &CancellationToken) -> StoreResult<u64> {
        let stale = stale_filter(cutoff);
        let ids = cancellable(cancel, self.store.select_ids(&stale)).await?;
        if ids.is_empty() {
            debug!(%cutoff, "no stale authorizations to prune");
            return Ok(0);
        }

        let tokens = cancellable(
            cancel,
            self.store
                .delete_tokens(&TokenFilter::AuthorizationIdIn(ids.clone())),
        )
        .await?;

        // Re-checking staleness skips ad-hoc rows that gained a token in the meantime.
        let owners = stale.and(Predicate::IdIn(ids));
        let authorizations = cancellable(cancel, self.store.delete(&owners)).await?;

        info!(
            %cutoff,
            tokens,
            authorizations,
            "pruned stale authorizations"
        );
        Ok(tokens + authorizations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn test_blank_criteria_become_match_all() {
        let criteria = Criteria {
            subject: Some("  ".into()),
            application_id: None,
            status: Some(String::new()),
            kind: None,
        };
        assert!(criteria.to_filter().is_empty());
        assert!(Criteria::any().to_filter().is_empty());
    }

    #[test]
    fn test_criteria_keep_declared_order() {
        let app = Uuid::new_v4();
        let filter = Criteria::any()
            .kind("ad-hoc")
            .subject("alice")
            .application_id(app)
            .to_filter();
        assert_eq!(
            filter.predicates(),
            &[
                Predicate::Subject("alice".into()),
                Predicate::ApplicationId(app),
                Predicate::Type("ad-hoc".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let manager = AuthorizationManager::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = manager.list(None, None, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());

        let err = manager
            .create(
                NewAuthorization::new("alice", Uuid::new_v4(), AuthorizationType::AdHoc),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(
            manager.count(&Criteria::any(), &CancellationToken::new()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_cancellable_passes_through_errors() {
        let cancel = CancellationToken::new();
        let result: StoreResult<()> = cancellable(&cancel, async {
            Err(StoreError::Unavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
