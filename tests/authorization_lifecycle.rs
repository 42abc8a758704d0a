//! Lifecycle tests for authorization lookups, revocation and pruning.
//!
//! Everything runs against `MemoryStore`, so no database is required.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use authz_lifecycle::models::{
    Authorization, AuthorizationType, NewAuthorization, NewToken, Status, Token,
};
use authz_lifecycle::store::memory::MemoryStore;
use authz_lifecycle::store::query::{Filter, Page, TokenFilter};
use authz_lifecycle::store::{AuthorizationStore, TokenStore};
use authz_lifecycle::{AuthorizationManager, Criteria, StoreError, StoreResult};
use chrono::{DateTime, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

fn ids(rows: &[Authorization]) -> BTreeSet<Uuid> {
    rows.iter().map(|a| a.id).collect()
}

async fn seed(
    manager: &AuthorizationManager<impl AuthorizationStore + TokenStore>,
    new: NewAuthorization,
) -> Authorization {
    manager.create(new, &CancellationToken::new()).await.unwrap()
}

// ═══════════════════════════════════════════════════════════════════
//  Lookups
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_empty_criteria_find_returns_whole_table() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    for subject in ["alice", "bob", "carol"] {
        seed(
            &manager,
            NewAuthorization::new(subject, Uuid::new_v4(), AuthorizationType::Permanent),
        )
        .await;
    }

    let all = manager.find(&Criteria::any(), &cancel).await.unwrap();
    assert_eq!(all.len(), 3, "omitted filters must match everything");

    let blank = Criteria::any().subject(" ").status("").kind("\t");
    assert_eq!(manager.find(&blank, &cancel).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_criteria_combine_as_intersection() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let apps = [Uuid::new_v4(), Uuid::new_v4()];

    for subject in ["alice", "bob"] {
        for app in apps {
            for status in [Status::Valid, Status::Revoked] {
                for kind in [AuthorizationType::AdHoc, AuthorizationType::Permanent] {
                    seed(
                        &manager,
                        NewAuthorization::new(subject, app, kind).with_status(status),
                    )
                    .await;
                }
            }
        }
    }

    let singles = [
        Criteria::any().subject("alice"),
        Criteria::any().application_id(apps[1]),
        Criteria::any().status("revoked"),
        Criteria::any().kind("ad-hoc"),
    ];
    let mut single_sets = Vec::new();
    for c in &singles {
        single_sets.push(ids(&manager.find(c, &cancel).await.unwrap()));
    }

    // Every non-empty subset of the four criteria.
    for mask in 1u8..16 {
        let mut combined = Criteria::any();
        let mut expected: Option<BTreeSet<Uuid>> = None;
        for (bit, single) in singles.iter().enumerate() {
            if mask & (1 << bit) == 0 {
                continue;
            }
            combined.subject = single.subject.clone().or(combined.subject);
            combined.application_id = single.application_id.or(combined.application_id);
            combined.status = single.status.clone().or(combined.status);
            combined.kind = single.kind.clone().or(combined.kind);
            expected = Some(match expected {
                None => single_sets[bit].clone(),
                Some(acc) => acc.intersection(&single_sets[bit]).cloned().collect(),
            });
        }

        let found = ids(&manager.find(&combined, &cancel).await.unwrap());
        assert_eq!(Some(found), expected, "mismatch for criteria mask {:04b}", mask);
    }
}

#[tokio::test]
async fn test_find_by_keys_and_missing_id() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let app = Uuid::new_v4();
    let other_app = Uuid::new_v4();

    let a = seed(
        &manager,
        NewAuthorization::new("alice", app, AuthorizationType::Permanent),
    )
    .await;
    seed(
        &manager,
        NewAuthorization::new("alice", other_app, AuthorizationType::AdHoc),
    )
    .await;
    seed(
        &manager,
        NewAuthorization::new("bob", app, AuthorizationType::AdHoc),
    )
    .await;

    assert_eq!(manager.find_by_subject("alice", &cancel).await.unwrap().len(), 2);
    assert_eq!(
        manager.find_by_application_id(app, &cancel).await.unwrap().len(),
        2
    );
    assert_eq!(manager.find_by_id(a.id, &cancel).await.unwrap(), Some(a));
    assert_eq!(
        manager.find_by_id(Uuid::new_v4(), &cancel).await.unwrap(),
        None,
        "absence is a normal outcome, not an error"
    );
    assert!(manager.find_by_subject("nobody", &cancel).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_enum_values_match_nothing() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    seed(
        &manager,
        NewAuthorization::new("alice", Uuid::new_v4(), AuthorizationType::AdHoc),
    )
    .await;

    let bogus = Criteria::any().status("Valid");
    assert!(manager.find(&bogus, &cancel).await.unwrap().is_empty());
    assert_eq!(
        manager.revoke(&Criteria::any().kind("temporary"), &cancel).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_list_pages_are_contiguous_and_stable() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let app = Uuid::new_v4();
    for i in 0..23 {
        seed(
            &manager,
            NewAuthorization::new(format!("user-{}", i), app, AuthorizationType::Permanent),
        )
        .await;
    }

    let everything = manager.list(None, None, &cancel).await.unwrap();
    assert_eq!(everything.len(), 23);
    assert!(everything.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(everything, manager.list(None, None, &cancel).await.unwrap());

    let k = 5;
    let mut paged = Vec::new();
    let mut offset = 0;
    loop {
        let page = manager.list(Some(k), Some(offset), &cancel).await.unwrap();
        if page.is_empty() {
            break;
        }
        assert!(page.len() as u64 <= k);
        paged.extend(page);
        offset += k;
    }
    assert_eq!(paged, everything);

    assert_eq!(manager.list(Some(3), None, &cancel).await.unwrap(), &everything[..3]);
    assert_eq!(manager.list(None, Some(20), &cancel).await.unwrap(), &everything[20..]);
    assert!(manager.list(Some(0), None, &cancel).await.unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════
//  Revocation
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_revoke_with_no_criteria_revokes_everything() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    for subject in ["alice", "bob", "carol", "dave"] {
        seed(
            &manager,
            NewAuthorization::new(subject, Uuid::new_v4(), AuthorizationType::AdHoc),
        )
        .await;
    }

    assert_eq!(manager.revoke(&Criteria::any(), &cancel).await.unwrap(), 4);
    let remaining_valid = manager
        .count(&Criteria::any().status("valid"), &cancel)
        .await
        .unwrap();
    assert_eq!(remaining_valid, 0);
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let app = Uuid::new_v4();
    seed(&manager, NewAuthorization::new("alice", app, AuthorizationType::AdHoc)).await;
    seed(&manager, NewAuthorization::new("alice", app, AuthorizationType::Permanent)).await;
    seed(&manager, NewAuthorization::new("bob", app, AuthorizationType::Permanent)).await;

    let criteria = Criteria::any().subject("alice");
    assert_eq!(manager.revoke(&criteria, &cancel).await.unwrap(), 2);
    let after_first = manager.list(None, None, &cancel).await.unwrap();

    assert_eq!(manager.revoke(&criteria, &cancel).await.unwrap(), 0);
    let after_second = manager.list(None, None, &cancel).await.unwrap();
    assert_eq!(after_first, after_second);

    let bob = manager.find_by_subject("bob", &cancel).await.unwrap();
    assert_eq!(bob[0].status, Status::Valid, "other subjects are untouched");
}

#[tokio::test]
async fn test_revoke_by_application_and_subject() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let app = Uuid::new_v4();
    let other = Uuid::new_v4();
    seed(&manager, NewAuthorization::new("alice", app, AuthorizationType::AdHoc)).await;
    seed(&manager, NewAuthorization::new("bob", app, AuthorizationType::AdHoc)).await;
    seed(&manager, NewAuthorization::new("carol", other, AuthorizationType::AdHoc)).await;

    assert_eq!(manager.revoke_by_application_id(app, &cancel).await.unwrap(), 2);
    assert_eq!(manager.revoke_by_application_id(app, &cancel).await.unwrap(), 0);
    assert_eq!(manager.revoke_by_subject("carol", &cancel).await.unwrap(), 1);
    assert_eq!(manager.revoke_by_subject("nobody", &cancel).await.unwrap(), 0);

    let valid = manager
        .count(&Criteria::any().status("valid"), &cancel)
        .await
        .unwrap();
    assert_eq!(valid, 0);
}

#[tokio::test]
async fn test_revoke_does_not_touch_tokens() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let a = seed(
        &manager,
        NewAuthorization::new("alice", Uuid::new_v4(), AuthorizationType::Permanent),
    )
    .await;
    manager
        .store()
        .insert_token(&NewToken::for_authorization(a.id))
        .await
        .unwrap();

    manager.revoke_by_subject("alice", &cancel).await.unwrap();
    let tokens = manager.tokens_for(a.id, &cancel).await.unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].status, Status::Valid);
}

// ═══════════════════════════════════════════════════════════════════
//  Pruning
// ═══════════════════════════════════════════════════════════════════

struct Scenario {
    a1: Authorization,
    a2: Authorization,
    a3: Authorization,
    t1: Token,
}

/// A1 valid/permanent with a token, A2 valid/ad-hoc without tokens,
/// A3 revoked/permanent without tokens. All created 2020-01-01.
async fn scenario<S: AuthorizationStore + TokenStore>(manager: &AuthorizationManager<S>) -> Scenario {
    let app = Uuid::new_v4();
    let created = Some(at(2020, 1, 1));
    let a1 = seed(
        manager,
        NewAuthorization::new("alice", app, AuthorizationType::Permanent).created_at(created),
    )
    .await;
    let a2 = seed(
        manager,
        NewAuthorization::new("alice", app, AuthorizationType::AdHoc).created_at(created),
    )
    .await;
    let a3 = seed(
        manager,
        NewAuthorization::new("bob", app, AuthorizationType::Permanent)
            .with_status(Status::Revoked)
            .created_at(created),
    )
    .await;
    let t1 = manager
        .store()
        .insert_token(&NewToken::for_authorization(a1.id))
        .await
        .unwrap();
    Scenario { a1, a2, a3, t1 }
}

#[tokio::test]
async fn test_prune_removes_revoked_and_orphaned_ad_hoc() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let s = scenario(&manager).await;

    let removed = manager.prune(at(2021, 1, 1), &cancel).await.unwrap();
    assert_eq!(removed, 2);

    let left = ids(&manager.list(None, None, &cancel).await.unwrap());
    assert_eq!(left, BTreeSet::from([s.a1.id]));
    assert!(manager.find_by_id(s.a2.id, &cancel).await.unwrap().is_none());
    assert!(manager.find_by_id(s.a3.id, &cancel).await.unwrap().is_none());

    let tokens = manager.tokens_for(s.a1.id, &cancel).await.unwrap();
    assert_eq!(tokens, vec![s.t1]);
}

#[tokio::test]
async fn test_prune_cutoff_is_strict() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    scenario(&manager).await;

    assert_eq!(manager.prune(at(2020, 1, 1), &cancel).await.unwrap(), 0);
    assert_eq!(manager.count(&Criteria::any(), &cancel).await.unwrap(), 3);
}

#[tokio::test]
async fn test_prune_counts_deleted_tokens() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let revoked = seed(
        &manager,
        NewAuthorization::new("alice", Uuid::new_v4(), AuthorizationType::Permanent)
            .with_status(Status::Revoked)
            .created_at(Some(at(2020, 6, 1))),
    )
    .await;
    for _ in 0..2 {
        manager
            .store()
            .insert_token(&NewToken::for_authorization(revoked.id))
            .await
            .unwrap();
    }
    manager.store().insert_token(&NewToken::detached()).await.unwrap();

    assert_eq!(manager.prune(at(2021, 1, 1), &cancel).await.unwrap(), 3);
    assert_eq!(
        manager.store().token_count().unwrap(),
        1,
        "detached tokens are not pruned"
    );
}

#[tokio::test]
async fn test_prune_keeps_unused_permanent_and_undated_rows() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let app = Uuid::new_v4();
    seed(
        &manager,
        NewAuthorization::new("alice", app, AuthorizationType::Permanent)
            .created_at(Some(at(2019, 1, 1))),
    )
    .await;
    seed(
        &manager,
        NewAuthorization::new("bob", app, AuthorizationType::AdHoc)
            .with_status(Status::Rejected)
            .created_at(None),
    )
    .await;

    assert_eq!(manager.prune(at(2021, 1, 1), &cancel).await.unwrap(), 0);
    assert_eq!(manager.count(&Criteria::any(), &cancel).await.unwrap(), 2);
}

#[tokio::test]
async fn test_prune_with_nothing_stale_is_a_no_op() {
    let manager = AuthorizationManager::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    assert_eq!(manager.prune(Utc::now(), &cancel).await.unwrap(), 0);
}

// ═══════════════════════════════════════════════════════════════════
//  Failure between the two prune phases
// ═══════════════════════════════════════════════════════════════════

/// Delegates to a `MemoryStore`, failing or cancelling around the
/// authorization delete on demand.
struct FaultyStore {
    inner: MemoryStore,
    fail_next_delete: AtomicBool,
    cancel_after_token_delete: Option<CancellationToken>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_next_delete: AtomicBool::new(false),
            cancel_after_token_delete: None,
        }
    }
}

#[async_trait]
impl AuthorizationStore for FaultyStore {
    async fn query(&self, filter: &Filter, page: Page) -> StoreResult<Vec<Authorization>> {
        self.inner.query(filter, page).await
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.inner.count(filter).await
    }

    async fn select_ids(&self, filter: &Filter) -> StoreResult<Vec<Uuid>> {
        self.inner.select_ids(filter).await
    }

    async fn update_status(&self, filter: &Filter, status: Status) -> StoreResult<u64> {
        self.inner.update_status(filter, status).await
    }

    async fn delete(&self, filter: &Filter) -> StoreResult<u64> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.delete(filter).await
    }

    async fn insert(&self, new: &NewAuthorization) -> StoreResult<Authorization> {
        self.inner.insert(new).await
    }
}

#[async_trait]
impl TokenStore for FaultyStore {
    async fn insert_token(&self, new: &NewToken) -> StoreResult<Token> {
        self.inner.insert_token(new).await
    }

    async fn query_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<Token>> {
        self.inner.query_tokens(filter).await
    }

    async fn delete_tokens(&self, filter: &TokenFilter) -> StoreResult<u64> {
        let deleted = self.inner.delete_tokens(filter).await?;
        if let Some(cancel) = &self.cancel_after_token_delete {
            cancel.cancel();
        }
        Ok(deleted)
    }
}

#[tokio::test]
async fn test_prune_recovers_after_fault_between_phases() {
    let manager = AuthorizationManager::new(FaultyStore::new());
    let cancel = CancellationToken::new();
    let s = scenario(&manager).await;
    for _ in 0..2 {
        manager
            .store()
            .insert_token(&NewToken::for_authorization(s.a3.id))
            .await
            .unwrap();
    }

    manager.store().fail_next_delete.store(true, Ordering::SeqCst);
    let err = assert_err!(manager.prune(at(2021, 1, 1), &cancel).await);
    assert!(matches!(err, StoreError::Unavailable(_)));

    // Tokens of the candidates are gone, the authorizations are not.
    assert!(manager.tokens_for(s.a3.id, &cancel).await.unwrap().is_empty());
    assert_eq!(manager.count(&Criteria::any(), &cancel).await.unwrap(), 3);
    assert_eq!(manager.tokens_for(s.a1.id, &cancel).await.unwrap().len(), 1);

    // The rerun finds the same, now tokenless, candidates and only counts them.
    let removed = assert_ok!(manager.prune(at(2021, 1, 1), &cancel).await);
    assert_eq!(removed, 2);
    let left = ids(&manager.list(None, None, &cancel).await.unwrap());
    assert_eq!(left, BTreeSet::from([s.a1.id]));
}

#[tokio::test]
async fn test_prune_stops_when_cancelled_between_phases() {
    let cancel = CancellationToken::new();
    let mut store = FaultyStore::new();
    store.cancel_after_token_delete = Some(cancel.clone());
    let manager = AuthorizationManager::new(store);
    let s = scenario(&manager).await;
    manager
        .store()
        .insert_token(&NewToken::for_authorization(s.a3.id))
        .await
        .unwrap();

    let err = assert_err!(manager.prune(at(2021, 1, 1), &cancel).await);
    assert!(err.is_cancelled());

    let fresh = CancellationToken::new();
    assert_eq!(manager.count(&Criteria::any(), &fresh).await.unwrap(), 3);
    assert!(manager.tokens_for(s.a3.id, &fresh).await.unwrap().is_empty());

    assert_eq!(manager.prune(at(2021, 1, 1), &fresh).await.unwrap(), 2);
}
