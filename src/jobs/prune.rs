//! Background job: prune stale authorizations and their tokens.
//!
//! Runs every `interval` (hourly by default). Each run deletes authorizations
//! older than `min_age` that are no longer valid, or ad-hoc with no tokens.
//! A failed run is logged and retried on the next tick.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::authorizations::AuthorizationManager;
use crate::config::PruneConfig;
use crate::errors::StoreResult;
use crate::store::{AuthorizationStore, TokenStore};

/// Spawn the background prune task. It stops once `shutdown` is cancelled.
pub fn spawn<S>(
    manager: Arc<AuthorizationManager<S>>,
    config: PruneConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    S: AuthorizationStore + TokenStore + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval(config.interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("prune job stopping");
                    break;
                }
                _ = interval.tick() => {}
            }

            match run_once(&manager, &config, &shutdown).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => {
                    tracing::info!("prune run interrupted by shutdown");
                    break;
                }
                Err(e) => {
                    tracing::error!(code = e.code(), "prune job failed: {}", e);
                }
            }
        }
    })
}

/// Prune once with the cutoff `now - min_age`. Returns the rows deleted.
pub async fn run_once<S>(
    manager: &AuthorizationManager<S>,
    config: &PruneConfig,
    cancel: &CancellationToken,
) -> StoreResult<u64>
where
    S: AuthorizationStore + TokenStore,
{
    let cutoff = Utc::now() - config.min_age();
    let rows = manager.prune(cutoff, cancel).await?;
    if rows > 0 {
        tracing::info!(rows, %cutoff, "prune job removed stale records");
    } else {
        tracing::debug!(%cutoff, "prune job found nothing to remove");
    }
    Ok(rows)
}
