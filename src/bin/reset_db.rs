//! Development helper: drop the authorization tables and re-run migrations.

use sqlx::postgres::PgPoolOptions;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/authz".to_string());

    println!("Connecting to {}", database_url);

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    println!("Dropping authorization tables...");
    // tokens first: it holds the foreign key.
    for table in ["tokens", "authorizations", "_sqlx_migrations"] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", table))
            .execute(&pool)
            .await?;
    }

    println!("Running migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    println!("Database reset successfully.");
    Ok(())
}
