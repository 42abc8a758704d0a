use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::authorizations::Criteria;

/// authzctl: inspect, revoke and prune stored OAuth authorizations
#[derive(Parser)]
#[command(name = "authzctl", version, about)]
pub struct Cli {
    /// Print results as JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the periodic prune job until interrupted. The only command
    /// supported with AUTHZ_STORE=memory besides migrate.
    Serve,

    /// Apply pending database migrations
    Migrate,

    /// List authorizations ordered by id
    List {
        #[arg(long)]
        count: Option<u64>,
        #[arg(long)]
        offset: Option<u64>,
    },

    /// Find authorizations matching every given filter
    Find {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show one authorization and its tokens
    Show { id: Uuid },

    /// Revoke authorizations matching every given filter
    Revoke {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Delete stale authorizations and their tokens
    Prune {
        /// Cutoff as RFC 3339 (e.g. 2024-01-01T00:00:00Z)
        #[arg(long, conflicts_with = "min_age_days")]
        before: Option<DateTime<Utc>>,
        /// Cutoff as an age in days; defaults to AUTHZ_PRUNE_MIN_AGE_DAYS
        #[arg(long)]
        min_age_days: Option<u32>,
    },
}

impl Commands {
    /// One-shot commands work on records left by earlier runs, which an
    /// in-memory store never has.
    pub fn needs_persistent_store(&self) -> bool {
        matches!(
            self,
            Commands::List { .. }
                | Commands::Find { .. }
                | Commands::Show { .. }
                | Commands::Revoke { .. }
                | Commands::Prune { .. }
        )
    }
}

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub application_id: Option<Uuid>,
    /// valid, inactive, redeemed, rejected or revoked
    #[arg(long)]
    pub status: Option<String>,
    /// ad-hoc or permanent
    #[arg(long = "type")]
    pub kind: Option<String>,
}

impl From<FilterArgs> for Criteria {
    fn from(args: FilterArgs) -> Self {
        Criteria {
            subject: args.subject,
            application_id: args.application_id,
            status: args.status,
            kind: args.kind,
        }
    }
}
