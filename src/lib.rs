//! Authorization lifecycle bookkeeping for an OAuth/OpenID authorization server.
//!
//! Lookups, bulk revocation and pruning over the `authorizations` and
//! `tokens` tables. Token issuance and protocol handling live elsewhere.

pub mod authorizations;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod store;

pub use authorizations::{AuthorizationManager, Criteria};
pub use errors::{StoreError, StoreResult};
