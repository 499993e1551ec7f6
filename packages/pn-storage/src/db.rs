use std::{future::Future, time::Duration};

use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{Error, Result, schema};

pub struct Db {
	pub pool: PgPool,
	pub delegation_table: String,
	pub query_timeout: Duration,
}
impl Db {
	pub async fn connect(cfg: &pn_config::Storage) -> Result<Self> {
		let query_timeout = Duration::from_millis(cfg.postgres.query_timeout_ms);
		let pool = PgPoolOptions::new()
			.max_connections(cfg.postgres.pool_max_conns)
			.acquire_timeout(query_timeout)
			.connect(&cfg.postgres.dsn)
			.await?;

		Ok(Self::from_pool(pool, &cfg.tables.delegation_metadata, query_timeout))
	}

	pub fn from_pool(pool: PgPool, delegation_table: &str, query_timeout: Duration) -> Self {
		Self { pool, delegation_table: delegation_table.to_string(), query_timeout }
	}

	pub async fn ensure_schema(&self) -> Result<()> {
		let sql = schema::render_schema(&self.delegation_table);
		let lock_id: i64 = 4_210_337;
		// Advisory locks are held per connection. Use a single transaction so the lock is scoped to
		// one connection and automatically released when the transaction ends.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(lock_id).execute(&mut *tx).await?;

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}

	pub(crate) async fn timed<F, T>(&self, label: &str, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T, sqlx::Error>>,
	{
		match tokio::time::timeout(self.query_timeout, fut).await {
			Ok(result) => Ok(result?),
			Err(_) => Err(Error::Timeout(format!(
				"{label} exceeded {} ms.",
				self.query_timeout.as_millis()
			))),
		}
	}
}
