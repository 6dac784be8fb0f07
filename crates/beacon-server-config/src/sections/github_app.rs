// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! GitHub App credentials.

use beacon_common_config::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Resolved GitHub App settings. Only present when both the app id and the
/// private key are configured.
#[derive(Debug, Clone)]
pub struct GithubAppSettings {
	pub app_id: u64,
	pub private_key_pem: SecretString,
	pub webhook_secret: Option<SecretString>,
	pub app_slug: String,
	pub base_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubAppConfigLayer {
	#[serde(default)]
	pub app_id: Option<u64>,
	#[serde(default)]
	pub private_key_pem: Option<SecretString>,
	#[serde(default)]
	pub webhook_secret: Option<SecretString>,
	#[serde(default)]
	pub app_slug: Option<String>,
	#[serde(default)]
	pub base_url: Option<String>,
}

/// The API base must be HTTPS and must not point at the local machine.
fn validate_base_url(url: &str) -> Result<(), ConfigError> {
	let invalid = |message: &str| ConfigError::InvalidValue {
		key: "github_app.base_url".to_string(),
		message: message.to_string(),
	};

	let rest = url
		.strip_prefix("https://")
		.ok_or_else(|| invalid("must use https"))?;
	let authority = rest.split('/').next().unwrap_or_default();
	let host = authority
		.rsplit_once('@')
		.map(|(_, host)| host)
		.unwrap_or(authority);
	let host = if host.starts_with('[') {
		host.split(']').next().map(|h| h.trim_start_matches('[')).unwrap_or(host)
	} else {
		host.split(':').next().unwrap_or(host)
	};

	if host.is_empty() {
		return Err(invalid("missing host"));
	}
	let lowered = host.to_ascii_lowercase();
	if lowered == "localhost"
		|| lowered.ends_with(".localhost")
		|| lowered.starts_with("127.")
		|| lowered == "::1"
		|| lowered == "0.0.0.0"
	{
		return Err(invalid("must not point at localhost"));
	}
	Ok(())
}

impl GithubAppConfigLayer {
	pub fn merge(&mut self, other: GithubAppConfigLayer) {
		if other.app_id.is_some() {
			self.app_id = other.app_id;
		}
		if other.private_key_pem.is_some() {
			self.private_key_pem = other.private_key_pem;
		}
		if other.webhook_secret.is_some() {
			self.webhook_secret = other.webhook_secret;
		}
		if other.app_slug.is_some() {
			self.app_slug = other.app_slug;
		}
		if other.base_url.is_some() {
			self.base_url = other.base_url;
		}
	}

	pub fn finalize(self) -> Result<Option<GithubAppSettings>, ConfigError> {
		let (Some(app_id), Some(private_key_pem)) = (self.app_id, self.private_key_pem) else {
			return Ok(None);
		};

		let base_url = self
			.base_url
			.unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string());
		validate_base_url(&base_url)?;

		Ok(Some(GithubAppSettings {
			app_id,
			private_key_pem,
			webhook_secret: self.webhook_secret,
			app_slug: self.app_slug.unwrap_or_else(|| "beacon".to_string()),
			base_url,
		}))
	}
}
