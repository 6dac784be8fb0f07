// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Resolving which GitHub App installation covers a repository.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::cache::InstallationCache;
use crate::error::{BrokerError, Result};
use crate::github::AppApi;

/// How long a resolved installation id is trusted.
pub const DEFAULT_INSTALLATION_TTL: Duration = Duration::from_secs(30 * 60);

pub fn cache_key(owner: &str, repo: &str) -> String {
	format!("{owner}/{repo}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationSource {
	Cache,
	FreshLookup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallationRecord {
	pub id: u64,
	pub source: InstallationSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationLookup {
	Found(InstallationRecord),
	NotInstalled,
}

/// Cache-first installation lookup with self-healing on stale ids.
///
/// Negative results are never cached so a fresh install is picked up
/// immediately.
pub struct InstallationResolver {
	cache: Arc<dyn InstallationCache>,
	api: Arc<dyn AppApi>,
	ttl: Duration,
}

impl InstallationResolver {
	pub fn new(cache: Arc<dyn InstallationCache>, api: Arc<dyn AppApi>) -> Self {
		Self {
			cache,
			api,
			ttl: DEFAULT_INSTALLATION_TTL,
		}
	}

	pub fn with_ttl(mut self, ttl: Duration) -> Self {
		self.ttl = ttl;
		self
	}

	#[instrument(skip(self))]
	pub async fn resolve(&self, owner: &str, repo: &str) -> Result<InstallationLookup> {
		let key = cache_key(owner, repo);
		match self.cache.get(&key).await {
			Ok(Some(value)) => match value.parse::<u64>() {
				Ok(id) => {
					debug!(installation_id = id, "Installation cache hit");
					return Ok(InstallationLookup::Found(InstallationRecord {
						id,
						source: InstallationSource::Cache,
					}));
				}
				Err(_) => warn!(%key, value = %value, "Ignoring unparseable cached installation id"),
			},
			Ok(None) => {}
			Err(e) => warn!(%key, error = %e, "Installation cache read failed"),
		}

		self.resolve_fresh(owner, repo).await
	}

	/// Bypass the cache, ask GitHub, and cache a positive answer.
	#[instrument(skip(self))]
	pub async fn resolve_fresh(&self, owner: &str, repo: &str) -> Result<InstallationLookup> {
		let Some(id) = self.api.find_installation(owner, repo).await? else {
			debug!("App is not installed on repository");
			return Ok(InstallationLookup::NotInstalled);
		};

		let key = cache_key(owner, repo);
		if let Err(e) = self.cache.put(&key, &id.to_string(), self.ttl).await {
			warn!(%key, error = %e, "Installation cache write failed");
		}

		Ok(InstallationLookup::Found(InstallationRecord {
			id,
			source: InstallationSource::FreshLookup,
		}))
	}

	pub async fn invalidate(&self, owner: &str, repo: &str) {
		let key = cache_key(owner, repo);
		if let Err(e) = self.cache.delete(&key).await {
			warn!(%key, error = %e, "Installation cache delete failed");
		}
	}

	/// Run `op` against the repository's installation.
	///
	/// When `op` reports a 404 for an id that came from the cache, the entry
	/// is dropped, the installation is looked up again and `op` is retried
	/// once with the new id. Other errors, and any error on the retry, are
	/// returned as-is.
	pub async fn with_installation<T, F, Fut>(&self, owner: &str, repo: &str, mut op: F) -> Result<T>
	where
		F: FnMut(u64) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let record = match self.resolve(owner, repo).await? {
			InstallationLookup::Found(record) => record,
			InstallationLookup::NotInstalled => {
				return Err(BrokerError::installation_not_found(owner, repo))
			}
		};

		match op(record.id).await {
			Err(e) if e.is_not_found() && record.source == InstallationSource::Cache => {
				info!(
					owner,
					repo,
					stale_installation_id = record.id,
					"Cached installation id is stale, refreshing"
				);
				self.invalidate(owner, repo).await;
				match self.resolve_fresh(owner, repo).await? {
					InstallationLookup::Found(fresh) => op(fresh.id).await,
					InstallationLookup::NotInstalled => {
						Err(BrokerError::installation_not_found(owner, repo))
					}
				}
			}
			other => other,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cache::{CacheError, MemoryInstallationCache};
	use crate::testing::FakeAppApi;
	use async_trait::async_trait;
	use beacon_server_github_app::InstallationPermissions;

	fn resolver(api: &Arc<FakeAppApi>) -> (InstallationResolver, Arc<MemoryInstallationCache>) {
		let cache = Arc::new(MemoryInstallationCache::new());
		(
			InstallationResolver::new(cache.clone(), api.clone()),
			cache,
		)
	}

	#[tokio::test]
	async fn second_lookup_is_served_from_cache() {
		let api = Arc::new(FakeAppApi::new());
		api.install("acme", "widgets", 11);
		let (resolver, _) = resolver(&api);

		let first = resolver.resolve("acme", "widgets").await.unwrap();
		let second = resolver.resolve("acme", "widgets").await.unwrap();

		assert_eq!(
			first,
			InstallationLookup::Found(InstallationRecord {
				id: 11,
				source: InstallationSource::FreshLookup
			})
		);
		assert_eq!(
			second,
			InstallationLookup::Found(InstallationRecord {
				id: 11,
				source: InstallationSource::Cache
			})
		);
		assert_eq!(api.lookup_count(), 1);
	}

	#[tokio::test]
	async fn not_installed_is_not_cached() {
		let api = Arc::new(FakeAppApi::new());
		let (resolver, cache) = resolver(&api);

		assert_eq!(
			resolver.resolve("acme", "widgets").await.unwrap(),
			InstallationLookup::NotInstalled
		);
		assert_eq!(cache.get("acme/widgets").await.unwrap(), None);

		api.install("acme", "widgets", 12);
		assert!(matches!(
			resolver.resolve("acme", "widgets").await.unwrap(),
			InstallationLookup::Found(InstallationRecord { id: 12, .. })
		));
	}

	#[tokio::test]
	async fn garbage_cache_entry_is_treated_as_miss() {
		let api = Arc::new(FakeAppApi::new());
		api.install("acme", "widgets", 13);
		let (resolver, cache) = resolver(&api);
		cache
			.put("acme/widgets", "not-a-number", Duration::from_secs(60))
			.await
			.unwrap();

		assert!(matches!(
			resolver.resolve("acme", "widgets").await.unwrap(),
			InstallationLookup::Found(InstallationRecord {
				id: 13,
				source: InstallationSource::FreshLookup
			})
		));
		assert_eq!(cache.get("acme/widgets").await.unwrap().as_deref(), Some("13"));
	}

	#[tokio::test]
	async fn lookup_errors_propagate() {
		let api = Arc::new(FakeAppApi::new());
		api.fail_lookups(true);
		let (resolver, _) = resolver(&api);

		let err = resolver.resolve("acme", "widgets").await.unwrap_err();
		assert!(matches!(err, BrokerError::GitHubApi { status: Some(503), .. }));
	}

	#[tokio::test]
	async fn stale_cached_id_heals_once() {
		let api = Arc::new(FakeAppApi::new());
		api.install("acme", "widgets", 20);
		let (resolver, cache) = resolver(&api);
		resolver.resolve("acme", "widgets").await.unwrap();

		api.reinstall("acme", "widgets", 21);
		let api_for_op = api.clone();
		let token = resolver
			.with_installation("acme", "widgets", |id| {
				let api = api_for_op.clone();
				async move {
					Ok(api
						.create_scoped_token(id, "widgets", &InstallationPermissions::metadata_read())
						.await?)
				}
			})
			.await
			.unwrap();

		assert!(token.token.expose().starts_with("ghs_21_"));
		assert_eq!(cache.get("acme/widgets").await.unwrap().as_deref(), Some("21"));
		assert_eq!(api.lookup_count(), 2);
	}

	#[tokio::test]
	async fn fresh_id_that_404s_is_not_retried() {
		let api = Arc::new(FakeAppApi::new());
		api.install("acme", "widgets", 30);
		let (resolver, _) = resolver(&api);

		let mut calls = 0;
		let err = resolver
			.with_installation("acme", "widgets", |_| {
				calls += 1;
				async {
					Err::<(), _>(BrokerError::GitHubApi {
						status: Some(404),
						message: "gone".into(),
					})
				}
			})
			.await
			.unwrap_err();

		assert!(err.is_not_found());
		assert_eq!(calls, 1);
	}

	#[tokio::test]
	async fn uninstalled_after_caching_surfaces_not_found() {
		let api = Arc::new(FakeAppApi::new());
		api.install("acme", "widgets", 40);
		let (resolver, _) = resolver(&api);
		resolver.resolve("acme", "widgets").await.unwrap();
		api.uninstall("acme", "widgets");

		let api_for_op = api.clone();
		let err = resolver
			.with_installation("acme", "widgets", |id| {
				let api = api_for_op.clone();
				async move {
					Ok(api
						.create_scoped_token(id, "widgets", &InstallationPermissions::metadata_read())
						.await?)
				}
			})
			.await
			.unwrap_err();

		assert!(matches!(err, BrokerError::InstallationNotFound { .. }));
	}

	struct BrokenCache;

	#[async_trait]
	impl InstallationCache for BrokenCache {
		async fn get(&self, _key: &str) -> std::result::Result<Option<String>, CacheError> {
			Err(CacheError("disk on fire".into()))
		}

		async fn put(&self, _key: &str, _value: &str, _ttl: Duration) -> std::result::Result<(), CacheError> {
			Err(CacheError("disk on fire".into()))
		}

		async fn delete(&self, _key: &str) -> std::result::Result<(), CacheError> {
			Err(CacheError("disk on fire".into()))
		}
	}

	#[tokio::test]
	async fn cache_failures_fall_back_to_github() {
		let api = Arc::new(FakeAppApi::new());
		api.install("acme", "widgets", 50);
		let resolver = InstallationResolver::new(Arc::new(BrokenCache), api.clone());

		assert!(matches!(
			resolver.resolve("acme", "widgets").await.unwrap(),
			InstallationLookup::Found(InstallationRecord { id: 50, .. })
		));
	}
}
