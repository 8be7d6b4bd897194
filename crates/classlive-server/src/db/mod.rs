//! Database module
//!
//! One PostgreSQL database holds everything: teachers, templates, runs,
//! join codes, enrollments and activity logs. All multi-row invariants
//! (one active code per value, one enrollment per run+name, one log per
//! run+student+activity+turn) live in the schema as unique constraints.

pub mod queries;
pub mod schema;

use anyhow::Result;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

pub type DbPool = Pool;

/// Initialize the classlive database: create it if missing, run migrations.
pub async fn init_db(base_url: &str) -> Result<DbPool> {
    let db_name = "classlive";

    // Accepts the URL with or without a trailing database name
    let base_url = strip_db_name(base_url);

    let admin_pool = create_pool(&format!("{}/postgres", base_url)).await?;
    let admin_client = admin_pool.get().await?;

    let row = admin_client
        .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&db_name])
        .await?;

    if row.is_none() {
        admin_client
            .execute(&format!("CREATE DATABASE {}", db_name), &[])
            .await?;
        info!("Created database: {}", db_name);
    }

    let pool = create_pool(&format!("{}/{}", base_url, db_name)).await?;

    let client = pool.get().await?;
    schema::run_migrations(&client).await?;

    info!("Database initialized: {}", db_name);
    Ok(pool)
}

async fn create_pool(database_url: &str) -> Result<DbPool> {
    let mut cfg = Config::new();
    cfg.url = Some(database_url.to_string());
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(pool)
}

/// Strip a trailing database name (e.g. `/postgres`) from a connection URL.
/// The `//` of the scheme is not a path separator.
fn strip_db_name(url: &str) -> &str {
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    match url[authority_start..].find('/') {
        Some(rel) => &url[..authority_start + rel],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_db_name() {
        assert_eq!(
            strip_db_name("postgres://u:p@localhost:5432/postgres"),
            "postgres://u:p@localhost:5432"
        );
        assert_eq!(
            strip_db_name("postgres://u:p@localhost:5432"),
            "postgres://u:p@localhost:5432"
        );
        assert_eq!(
            strip_db_name("postgres://u:p@localhost:5432/classlive"),
            "postgres://u:p@localhost:5432"
        );
    }
}
