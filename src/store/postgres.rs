use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use super::query::{Filter, Page, Predicate, TokenFilter};
use super::{AuthorizationStore, TokenStore};
use crate::errors::{StoreError, StoreResult};
use crate::models::{Authorization, ModelError, NewAuthorization, NewToken, Status, Token};

const AUTHORIZATION_COLUMNS: &str =
    r#"a.id, a.application_id, a.subject, a.status, a."type", a.scopes, a.creation_date"#;

const TOKEN_COLUMNS: &str = "id, authorization_id, application_id, subject, status, token_type, creation_date, expiration_date";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// -- Rows --

/// `authorizations` row as stored. Enum columns stay text until validated.
#[derive(Debug, sqlx::FromRow)]
struct AuthorizationRow {
    id: Uuid,
    application_id: Option<Uuid>,
    subject: String,
    status: String,
    #[sqlx(rename = "type")]
    kind: String,
    scopes: Vec<String>,
    creation_date: Option<DateTime<Utc>>,
}

impl TryFrom<AuthorizationRow> for Authorization {
    type Error = ModelError;

    fn try_from(row: AuthorizationRow) -> Result<Self, Self::Error> {
        Ok(Authorization {
            id: row.id,
            application_id: row.application_id,
            subject: row.subject,
            status: row.status.parse()?,
            kind: row.kind.parse()?,
            scopes: row.scopes,
            creation_date: row.creation_date,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    authorization_id: Option<Uuid>,
    application_id: Option<Uuid>,
    subject: Option<String>,
    status: String,
    token_type: String,
    creation_date: Option<DateTime<Utc>>,
    expiration_date: Option<DateTime<Utc>>,
}

impl TryFrom<TokenRow> for Token {
    type Error = ModelError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        Ok(Token {
            id: row.id,
            authorization_id: row.authorization_id,
            application_id: row.application_id,
            subject: row.subject,
            status: row.status.parse()?,
            token_type: row.token_type,
            creation_date: row.creation_date,
            expiration_date: row.expiration_date,
        })
    }
}

/// Converts fetched rows, failing with `StoreError::Model` on the first corrupt one.
fn decode_rows<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = ModelError>,
{
    rows.into_iter()
        .map(|row| T::try_from(row).map_err(StoreError::from))
        .collect()
}

/// Maps constraint violations onto the same variants `MemoryStore` returns.
/// `inserted` is the primary key of the row being written, if any.
fn map_write_error(err: sqlx::Error, inserted: Option<Uuid>) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if let (true, Some(id)) = (db.is_unique_violation(), inserted) {
            return StoreError::Duplicate(id);
        }
        if db.is_foreign_key_violation() {
            return StoreError::ForeignKey(db.message().to_string());
        }
    }
    StoreError::Database(err)
}

// -- SQL compilation --

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    // No predicates means no WHERE clause: the statement covers the whole table.
    if filter.is_empty() {
        return;
    }
    qb.push(" WHERE ");
    for (i, predicate) in filter.predicates().iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        push_predicate(qb, predicate);
    }
}

fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, predicate: &Predicate) {
    match predicate {
        Predicate::Id(id) => {
            qb.push("a.id = ").push_bind(*id);
        }
        Predicate::IdIn(ids) => {
            qb.push("a.id = ANY(").push_bind(ids.clone()).push(")");
        }
        Predicate::Subject(subject) => {
            qb.push("a.subject = ").push_bind(subject.clone());
        }
        Predicate::ApplicationId(app) => {
            qb.push("a.application_id = ").push_bind(*app);
        }
        Predicate::Status(status) => {
            qb.push("a.status = ").push_bind(status.clone());
        }
        Predicate::StatusNot(status) => {
            qb.push("a.status <> ").push_bind(status.clone());
        }
        Predicate::Type(kind) => {
            qb.push(r#"a."type" = "#).push_bind(kind.clone());
        }
        Predicate::CreatedBefore(cutoff) => {
            qb.push("a.creation_date < ").push_bind(*cutoff);
        }
        // Anti-join; also valid inside UPDATE and DELETE.
        Predicate::WithoutTokens => {
            qb.push("NOT EXISTS (SELECT 1 FROM tokens t WHERE t.authorization_id = a.id)");
        }
        Predicate::Any(any) if any.is_empty() => {
            qb.push("FALSE");
        }
        Predicate::Any(any) => push_group(qb, any, " OR "),
        Predicate::All(all) if all.is_empty() => {
            qb.push("TRUE");
        }
        Predicate::All(all) => push_group(qb, all, " AND "),
    }
}

fn push_group(qb: &mut QueryBuilder<'_, Postgres>, predicates: &[Predicate], separator: &str) {
    qb.push("(");
    for (i, inner) in predicates.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        push_predicate(qb, inner);
    }
    qb.push(")");
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: Page) {
    if let Some(offset) = page.offset {
        qb.push(" OFFSET ").push_bind(clamp_i64(offset));
    }
    if let Some(count) = page.count {
        qb.push(" LIMIT ").push_bind(clamp_i64(count));
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn select_authorizations<'a>(filter: &Filter, page: Page) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM authorizations a",
        AUTHORIZATION_COLUMNS
    ));
    push_where(&mut qb, filter);
    qb.push(" ORDER BY a.id ASC");
    push_page(&mut qb, page);
    qb
}

fn update_status_statement<'a>(filter: &Filter, status: Status) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new("UPDATE authorizations AS a SET status = ");
    qb.push_bind(status);
    push_where(&mut qb, filter);
    qb
}

fn delete_statement<'a>(filter: &Filter) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new("DELETE FROM authorizations AS a");
    push_where(&mut qb, filter);
    qb
}

fn push_token_where(qb: &mut QueryBuilder<'_, Postgres>, filter: &TokenFilter) {
    match filter {
        TokenFilter::AuthorizationId(id) => {
            qb.push(" WHERE authorization_id = ").push_bind(*id);
        }
        TokenFilter::AuthorizationIdIn(ids) => {
            qb.push(" WHERE authorization_id = ANY(")
                .push_bind(ids.clone())
                .push(")");
        }
    }
}

#[async_trait]
impl AuthorizationStore for PgStore {
    async fn query(&self, filter: &Filter, page: Page) -> StoreResult<Vec<Authorization>> {
        let rows = select_authorizations(filter, page)
            .build_query_as::<AuthorizationRow>()
            .fetch_all(&self.pool)
            .await?;
        decode_rows(rows)
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM authorizations a");
        push_where(&mut qb, filter);
        let count: i64 = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn select_ids(&self, filter: &Filter) -> StoreResult<Vec<Uuid>> {
        let mut qb = QueryBuilder::new("SELECT a.id FROM authorizations a");
        push_where(&mut qb, filter);
        let ids = qb.build_query_scalar::<Uuid>().fetch_all(&self.pool).await?;
        Ok(ids)
    }

    async fn update_status(&self, filter: &Filter, status: Status) -> StoreResult<u64> {
        let result = update_status_statement(filter, status)
            .build()
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, filter: &Filter) -> StoreResult<u64> {
        let result = delete_statement(filter)
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, None))?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, new: &NewAuthorization) -> StoreResult<Authorization> {
        let row = sqlx::query_as::<_, AuthorizationRow>(
            r#"INSERT INTO authorizations (id, application_id, subject, status, "type", scopes, creation_date)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id, application_id, subject, status, "type", scopes, creation_date"#,
        )
        .bind(new.id)
        .bind(new.application_id)
        .bind(&new.subject)
        .bind(new.status)
        .bind(new.kind)
        .bind(&new.scopes)
        .bind(new.creation_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, Some(new.id)))?;
        Ok(Authorization::try_from(row)?)
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn insert_token(&self, new: &NewToken) -> StoreResult<Token> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            r#"INSERT INTO tokens ({TOKEN_COLUMNS})
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING {TOKEN_COLUMNS}"#
        ))
        .bind(new.id)
        .bind(new.authorization_id)
        .bind(new.application_id)
        .bind(&new.subject)
        .bind(new.status)
        .bind(&new.token_type)
        .bind(new.creation_date)
        .bind(new.expiration_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, Some(new.id)))?;
        Ok(Token::try_from(row)?)
    }

    async fn query_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<Token>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM tokens", TOKEN_COLUMNS));
        push_token_where(&mut qb, filter);
        qb.push(" ORDER BY id ASC");
        let rows = qb.build_query_as::<TokenRow>().fetch_all(&self.pool).await?;
        decode_rows(rows)
    }

    async fn delete_tokens(&self, filter: &TokenFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::new("DELETE FROM tokens");
        push_token_where(&mut qb, filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
