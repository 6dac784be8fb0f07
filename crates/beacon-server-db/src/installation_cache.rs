// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Key-value store with expiry for installation-id lookups.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

fn timestamp(at: DateTime<Utc>) -> String {
	at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct InstallationCacheRepository {
	pool: SqlitePool,
}

impl InstallationCacheRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Return the stored value for `key` unless it has expired.
	#[tracing::instrument(skip(self))]
	pub async fn get(&self, key: &str) -> Result<Option<String>> {
		let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
			"SELECT value, expires_at FROM installation_cache WHERE cache_key = ?",
		)
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.and_then(|(value, expires_at)| (expires_at > Utc::now()).then_some(value)))
	}

	/// Insert or replace `key`; the entry expires `ttl` from now.
	#[tracing::instrument(skip(self, value))]
	pub async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
		let now = Utc::now();
		let ttl = chrono::Duration::from_std(ttl)
			.map_err(|e| DbError::Internal(format!("Invalid cache TTL: {e}")))?;

		sqlx::query(
			r#"
			INSERT INTO installation_cache (cache_key, value, expires_at, updated_at)
			VALUES (?, ?, ?, ?)
			ON CONFLICT(cache_key) DO UPDATE SET
				value = excluded.value,
				expires_at = excluded.expires_at,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(key)
		.bind(value)
		.bind(timestamp(now + ttl))
		.bind(timestamp(now))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete(&self, key: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM installation_cache WHERE cache_key = ?")
			.bind(key)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	/// Remove every expired entry, returning how many were dropped.
	#[tracing::instrument(skip(self))]
	pub async fn purge_expired(&self) -> Result<u64> {
		let result = sqlx::query("DELETE FROM installation_cache WHERE expires_at <= ?")
			.bind(timestamp(Utc::now()))
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn put_then_get() {
		let repo = InstallationCacheRepository::new(create_test_pool().await);

		repo
			.put("acme/widgets", "991", Duration::from_secs(1800))
			.await
			.unwrap();
		assert_eq!(repo.get("acme/widgets").await.unwrap().as_deref(), Some("991"));
		assert_eq!(repo.get("acme/other").await.unwrap(), None);
	}

	#[tokio::test]
	async fn last_write_wins() {
		let repo = InstallationCacheRepository::new(create_test_pool().await);

		repo.put("acme/widgets", "1", Duration::from_secs(60)).await.unwrap();
		repo.put("acme/widgets", "2", Duration::from_secs(60)).await.unwrap();
		assert_eq!(repo.get("acme/widgets").await.unwrap().as_deref(), Some("2"));
	}

	#[tokio::test]
	async fn expired_entries_are_invisible_and_purged() {
		let repo = InstallationCacheRepository::new(create_test_pool().await);

		repo.put("acme/widgets", "991", Duration::ZERO).await.unwrap();
		repo.put("acme/tools", "992", Duration::from_secs(60)).await.unwrap();

		assert_eq!(repo.get("acme/widgets").await.unwrap(), None);
		assert_eq!(repo.purge_expired().await.unwrap(), 1);
		assert_eq!(repo.get("acme/tools").await.unwrap().as_deref(), Some("992"));
	}

	#[tokio::test]
	async fn delete_reports_presence() {
		let repo = InstallationCacheRepository::new(create_test_pool().await);

		repo.put("acme/widgets", "991", Duration::from_secs(60)).await.unwrap();
		assert!(repo.delete("acme/widgets").await.unwrap());
		assert!(!repo.delete("acme/widgets").await.unwrap());
	}
}
