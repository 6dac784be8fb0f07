// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Installation-id cache abstraction.
//!
//! Keys are `"{owner}/{repo}"` and values are decimal installation ids.
//! Writes are last-writer-wins; concurrent writers store the same id.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use beacon_server_db::{DbError, InstallationCacheRepository};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Error)]
#[error("installation cache error: {0}")]
pub struct CacheError(pub String);

impl From<DbError> for CacheError {
	fn from(err: DbError) -> Self {
		CacheError(err.to_string())
	}
}

#[async_trait]
pub trait InstallationCache: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
	async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
	async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl InstallationCache for InstallationCacheRepository {
	async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
		Ok(InstallationCacheRepository::get(self, key).await?)
	}

	async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
		Ok(InstallationCacheRepository::put(self, key, value, ttl).await?)
	}

	async fn delete(&self, key: &str) -> Result<(), CacheError> {
		InstallationCacheRepository::delete(self, key).await?;
		Ok(())
	}
}

/// Process-local cache; entries vanish on restart.
#[derive(Default)]
pub struct MemoryInstallationCache {
	entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryInstallationCache {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl InstallationCache for MemoryInstallationCache {
	async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
		let entries = self.entries.read().await;
		Ok(entries
			.get(key)
			.filter(|(_, expires_at)| Instant::now() < *expires_at)
			.map(|(value, _)| value.clone()))
	}

	async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
		let mut entries = self.entries.write().await;
		entries.retain(|_, (_, expires_at)| Instant::now() < *expires_at);
		entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), CacheError> {
		self.entries.write().await.remove(key);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_server_db::testing::create_test_pool;

	#[tokio::test(start_paused = true)]
	async fn memory_entries_expire_after_ttl() {
		let cache = MemoryInstallationCache::new();
		cache
			.put("acme/widgets", "991", Duration::from_secs(1800))
			.await
			.unwrap();

		tokio::time::advance(Duration::from_secs(1799)).await;
		assert_eq!(cache.get("acme/widgets").await.unwrap().as_deref(), Some("991"));

		tokio::time::advance(Duration::from_secs(1)).await;
		assert_eq!(cache.get("acme/widgets").await.unwrap(), None);
	}

	#[tokio::test]
	async fn memory_delete_removes_entry() {
		let cache = MemoryInstallationCache::new();
		cache.put("acme/widgets", "991", Duration::from_secs(60)).await.unwrap();
		cache.delete("acme/widgets").await.unwrap();
		assert_eq!(cache.get("acme/widgets").await.unwrap(), None);
	}

	#[tokio::test]
	async fn sqlite_repository_behaves_as_cache() {
		let cache: Box<dyn InstallationCache> =
			Box::new(InstallationCacheRepository::new(create_test_pool().await));

		cache.put("acme/widgets", "991", Duration::from_secs(60)).await.unwrap();
		assert_eq!(cache.get("acme/widgets").await.unwrap().as_deref(), Some("991"));
		cache.delete("acme/widgets").await.unwrap();
		assert_eq!(cache.get("acme/widgets").await.unwrap(), None);
	}
}
