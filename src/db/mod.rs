pub mod account_repo;
pub mod copier_repo;
pub mod log_repo;
pub mod mapping_repo;
pub mod trade_repo;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Each copier worker plus the API share this pool; fan-out writes are
/// short, so a modest cap outlasts a burst of concurrent followers.
const MAX_POOL_CONNECTIONS: u32 = 10;

/// Open the connection pool and fail fast on an unreachable or
/// misconfigured database rather than at the first copier start.
pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_POOL_CONNECTIONS)
        .connect(database_url)
        .await?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    Ok(pool)
}

/// True when `err` is a Postgres unique-constraint violation. On the
/// trade-mapping and follower-binding inserts this is the idempotency /
/// conflict signal rather than a failure.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}
