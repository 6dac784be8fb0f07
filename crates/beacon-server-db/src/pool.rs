// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;

use crate::error::DbError;

/// Create a SqlitePool with WAL mode.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./beacon.db")
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	if !database_url.starts_with("sqlite:") {
		return Err(DbError::Internal(
			"Invalid database URL: expected a sqlite: URL".to_string(),
		));
	}

	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("Database pool created");
	Ok(pool)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn creates_database_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("beacon.db");
		let url = format!("sqlite:{}", path.display());

		let pool = create_pool(&url).await.unwrap();
		sqlx::query("SELECT 1").execute(&pool).await.unwrap();
		assert!(path.exists());
	}

	#[tokio::test]
	async fn rejects_invalid_url() {
		assert!(matches!(
			create_pool("postgres://nope").await,
			Err(DbError::Internal(_))
		));
		assert!(matches!(
			create_pool("beacon.db").await,
			Err(DbError::Internal(_))
		));
	}

	#[tokio::test]
	async fn accepts_in_memory_url() {
		let pool = create_pool("sqlite::memory:").await.unwrap();
		sqlx::query("SELECT 1").execute(&pool).await.unwrap();
	}
}
