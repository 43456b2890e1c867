use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub mod row_parsers;
pub mod sqlite_store;

pub use sqlite_store::SqliteRoleGrantStore;

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
	SqlitePoolOptions::new()
		.max_connections(10)
		.min_connections(1)
		.acquire_timeout(Duration::from_secs(10))
		.connect(database_url)
		.await
		.context("failed to connect to database")
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
	sqlx::migrate!()
		.run(pool)
		.await
		.context("failed to run migrations")
}

/// Connects and applies the schema and catalog seed.
pub async fn init(database_url: &str) -> anyhow::Result<SqlitePool> {
	let pool = connect(database_url).await?;
	migrate(&pool).await?;
	Ok(pool)
}
