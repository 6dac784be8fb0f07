// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Configuration for GitHub App client.

use beacon_common_config::SecretString;
use beacon_common_http::RetryConfig;
use reqwest::Url;

use crate::error::GithubAppError;

pub const DEFAULT_BASE_URL: &str = "https://api.github.com/";
const DEFAULT_APP_SLUG: &str = "beacon";

/// Configuration for the GitHub App client.
///
/// The private key and webhook secret are held as [`SecretString`] so the
/// config can be logged.
#[derive(Clone)]
pub struct GithubAppConfig {
	app_id: u64,
	private_key_pem: SecretString,
	webhook_secret: Option<SecretString>,
	app_slug: String,
	base_url: Url,
	pub retry_config: RetryConfig,
}

impl std::fmt::Debug for GithubAppConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GithubAppConfig")
			.field("app_id", &self.app_id)
			.field("private_key_pem", &self.private_key_pem)
			.field("webhook_secret", &self.webhook_secret)
			.field("app_slug", &self.app_slug)
			.field("base_url", &self.base_url.as_str())
			.field("retry_config", &self.retry_config)
			.finish()
	}
}

impl GithubAppConfig {
	/// Parse a GitHub API base URL.
	///
	/// Must be HTTPS, must not point at localhost, and is normalized to end
	/// in `/` so relative paths join under it (GitHub Enterprise serves the
	/// API below `/api/v3`).
	pub fn validate_base_url(raw: &str) -> Result<Url, GithubAppError> {
		let mut url = Url::parse(raw)
			.map_err(|e| GithubAppError::Config(format!("Invalid GitHub base URL '{raw}': {e}")))?;

		if url.scheme() != "https" {
			return Err(GithubAppError::Config(format!(
				"GitHub base URL must use https, got '{}'",
				url.scheme()
			)));
		}

		let host = url
			.host_str()
			.ok_or_else(|| GithubAppError::Config("GitHub base URL must include a host".to_string()))?;

		if host == "localhost" || host == "127.0.0.1" || host == "[::1]" {
			return Err(GithubAppError::Config(
				"GitHub base URL must not be localhost".to_string(),
			));
		}

		if !url.path().ends_with('/') {
			let path = format!("{}/", url.path());
			url.set_path(&path);
		}

		Ok(url)
	}

	/// Create a configuration pointing at api.github.com.
	pub fn new(app_id: u64, private_key_pem: SecretString) -> Self {
		Self {
			app_id,
			private_key_pem,
			webhook_secret: None,
			app_slug: DEFAULT_APP_SLUG.to_string(),
			base_url: default_base_url(),
			retry_config: RetryConfig::default(),
		}
	}

	/// Point the client at GitHub Enterprise.
	pub fn with_base_url(mut self, url: &str) -> Result<Self, GithubAppError> {
		self.base_url = Self::validate_base_url(url)?;
		Ok(self)
	}

	pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
		self.retry_config = config;
		self
	}

	pub fn with_webhook_secret(mut self, secret: SecretString) -> Self {
		self.webhook_secret = Some(secret);
		self
	}

	pub fn with_app_slug(mut self, slug: impl Into<String>) -> Self {
		self.app_slug = slug.into();
		self
	}

	/// Test-only escape hatch for pointing the client at a local mock server.
	#[cfg(test)]
	pub(crate) fn with_unvalidated_base_url(mut self, url: &str) -> Self {
		let mut url = Url::parse(url).expect("mock server url");
		if !url.path().ends_with('/') {
			let path = format!("{}/", url.path());
			url.set_path(&path);
		}
		self.base_url = url;
		self
	}

	pub fn app_id(&self) -> u64 {
		self.app_id
	}

	pub(crate) fn private_key_pem(&self) -> &str {
		self.private_key_pem.expose()
	}

	pub fn webhook_secret(&self) -> Option<&str> {
		self.webhook_secret.as_ref().map(|s| s.expose().as_str())
	}

	pub fn app_slug(&self) -> &str {
		&self.app_slug
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}
}

fn default_base_url() -> Url {
	Url::parse(DEFAULT_BASE_URL).expect("default URL is valid")
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_common_config::Secret;

	fn key() -> SecretString {
		Secret::new("test-private-key".to_string())
	}

	#[test]
	fn defaults_to_public_github() {
		let config = GithubAppConfig::new(12345, key());
		assert_eq!(config.app_id(), 12345);
		assert_eq!(config.private_key_pem(), "test-private-key");
		assert_eq!(config.base_url().as_str(), DEFAULT_BASE_URL);
		assert_eq!(config.app_slug(), DEFAULT_APP_SLUG);
		assert!(config.webhook_secret().is_none());
	}

	#[test]
	fn enterprise_base_url_is_normalized() {
		let config = GithubAppConfig::new(1, key())
			.with_base_url("https://github.example.com/api/v3")
			.unwrap();
		assert_eq!(config.base_url().as_str(), "https://github.example.com/api/v3/");
		assert_eq!(
			config.base_url().join("repos/a/b").unwrap().as_str(),
			"https://github.example.com/api/v3/repos/a/b"
		);
	}

	#[test]
	fn rejects_insecure_base_urls() {
		assert!(GithubAppConfig::validate_base_url("http://api.github.com").is_err());
		assert!(GithubAppConfig::validate_base_url("https://localhost/api").is_err());
		assert!(GithubAppConfig::validate_base_url("https://127.0.0.1").is_err());
		assert!(GithubAppConfig::validate_base_url("not a url").is_err());
	}

	#[test]
	fn debug_redacts_secrets() {
		let config = GithubAppConfig::new(1, Secret::new("PRIVATE-PEM".to_string()))
			.with_webhook_secret(Secret::new("hook-secret".to_string()));
		let debug = format!("{config:?}");
		assert!(!debug.contains("PRIVATE-PEM"));
		assert!(!debug.contains("hook-secret"));
		assert!(debug.contains("[REDACTED]"));
	}
}
