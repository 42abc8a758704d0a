use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use authz_lifecycle::cli::{self, Commands};
use authz_lifecycle::config::{self, Config, LogFormat, StoreKind};
use authz_lifecycle::jobs;
use authz_lifecycle::models::Authorization;
use authz_lifecycle::store::memory::MemoryStore;
use authz_lifecycle::store::postgres::PgStore;
use authz_lifecycle::store::{AuthorizationStore, TokenStore};
use authz_lifecycle::{AuthorizationManager, Criteria};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(cfg.log_format);
    let args = cli::Cli::parse();

    let result = match cfg.store {
        StoreKind::Postgres => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(&cfg.database_url, cfg.max_connections)
                .await
                .context("failed to connect to DATABASE_URL")?;
            if matches!(args.command, Some(Commands::Migrate) | Some(Commands::Serve) | None) {
                tracing::info!("Running migrations...");
                db.migrate().await?;
            }
            run(Arc::new(AuthorizationManager::new(db)), &cfg, args).await
        }
        StoreKind::Memory => {
            if args.command.as_ref().is_some_and(Commands::needs_persistent_store) {
                anyhow::bail!(
                    "this command needs AUTHZ_STORE=postgres: the in-memory store starts empty on every run"
                );
            }
            tracing::warn!("AUTHZ_STORE=memory: records are not persisted");
            run(Arc::new(AuthorizationManager::new(MemoryStore::new())), &cfg, args).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "authz_lifecycle=info,authzctl=info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run<S>(
    manager: Arc<AuthorizationManager<S>>,
    cfg: &Config,
    args: cli::Cli,
) -> anyhow::Result<()>
where
    S: AuthorizationStore + TokenStore + 'static,
{
    let cancel = CancellationToken::new();
    let json = args.json;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(manager, cfg).await?,
        Commands::Migrate => {
            if cfg.store == StoreKind::Memory {
                println!("Nothing to migrate for the in-memory store.");
            } else {
                println!("Migrations applied.");
            }
        }
        Commands::List { count, offset } => {
            let rows = manager.list(count, offset, &cancel).await?;
            print_authorizations(&rows, json)?;
        }
        Commands::Find { filter } => {
            let rows = manager.find(&Criteria::from(filter), &cancel).await?;
            print_authorizations(&rows, json)?;
        }
        Commands::Show { id } => match manager.find_by_id(id, &cancel).await? {
            Some(auth) => {
                let tokens = manager.tokens_for(id, &cancel).await?;
                if json {
                    let out = serde_json::json!({ "authorization": auth, "tokens": tokens });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                } else {
                    print_authorizations(std::slice::from_ref(&auth), false)?;
                    println!("\n{} token(s)", tokens.len());
                    for t in tokens {
                        println!("  {:<38} {:<14} {}", t.id, t.token_type, t.status);
                    }
                }
            }
            None => println!("Authorization {} not found.", id),
        },
        Commands::Revoke { filter } => {
            let criteria = Criteria::from(filter);
            let rows = manager.revoke(&criteria, &cancel).await?;
            println!("Revoked {} authorization(s).", rows);
        }
        Commands::Prune {
            before,
            min_age_days,
        } => {
            let cutoff = match (before, min_age_days) {
                (Some(at), _) => at,
                (None, Some(days)) => Utc::now() - chrono::Duration::days(i64::from(days)),
                (None, None) => Utc::now() - cfg.prune.min_age(),
            };
            let rows = manager.prune(cutoff, &cancel).await?;
            println!(
                "Pruned {} row(s) created before {}.",
                rows,
                cutoff.to_rfc3339()
            );
        }
    }
    Ok(())
}

async fn serve<S>(manager: Arc<AuthorizationManager<S>>, cfg: &Config) -> anyhow::Result<()>
where
    S: AuthorizationStore + TokenStore + 'static,
{
    if !cfg.prune.enabled {
        tracing::warn!("AUTHZ_PRUNE_ENABLED is off; nothing to run");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let handle = jobs::prune::spawn(manager, cfg.prune.clone(), shutdown.clone());
    tracing::info!(
        interval_secs = cfg.prune.interval_secs,
        min_age_days = cfg.prune.min_age_days,
        "Background prune job started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();
    handle.await?;
    Ok(())
}

fn print_authorizations(rows: &[Authorization], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No authorizations found.");
        return Ok(());
    }
    println!(
        "{:<38} {:<24} {:<10} {:<10} CREATED",
        "ID", "SUBJECT", "STATUS", "TYPE"
    );
    for a in rows {
        let created = a
            .creation_date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<38} {:<24} {:<10} {:<10} {}",
            a.id, a.subject, a.status, a.kind, created
        );
    }
    Ok(())
}
