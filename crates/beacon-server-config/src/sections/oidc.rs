// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Identity token validation settings.

use serde::Deserialize;

const DEFAULT_ISSUER: &str = "https://token.actions.githubusercontent.com";
const DEFAULT_JWKS_URL: &str = "https://token.actions.githubusercontent.com/.well-known/jwks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcSettings {
	pub issuer: String,
	pub audience: String,
	pub jwks_url: String,
	pub key_set_ttl_secs: u64,
	pub leeway_secs: u64,
}

impl Default for OidcSettings {
	fn default() -> Self {
		Self {
			issuer: DEFAULT_ISSUER.to_string(),
			audience: "beacon".to_string(),
			jwks_url: DEFAULT_JWKS_URL.to_string(),
			key_set_ttl_secs: 600,
			leeway_secs: 60,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OidcConfigLayer {
	#[serde(default)]
	pub issuer: Option<String>,
	#[serde(default)]
	pub audience: Option<String>,
	#[serde(default)]
	pub jwks_url: Option<String>,
	#[serde(default)]
	pub key_set_ttl_secs: Option<u64>,
	#[serde(default)]
	pub leeway_secs: Option<u64>,
}

impl OidcConfigLayer {
	pub fn merge(&mut self, other: OidcConfigLayer) {
		if other.issuer.is_some() {
			self.issuer = other.issuer;
		}
		if other.audience.is_some() {
			self.audience = other.audience;
		}
		if other.jwks_url.is_some() {
			self.jwks_url = other.jwks_url;
		}
		if other.key_set_ttl_secs.is_some() {
			self.key_set_ttl_secs = other.key_set_ttl_secs;
		}
		if other.leeway_secs.is_some() {
			self.leeway_secs = other.leeway_secs;
		}
	}

	pub fn finalize(self) -> OidcSettings {
		let defaults = OidcSettings::default();
		OidcSettings {
			issuer: self.issuer.unwrap_or(defaults.issuer),
			audience: self.audience.unwrap_or(defaults.audience),
			jwks_url: self.jwks_url.unwrap_or(defaults.jwks_url),
			key_set_ttl_secs: self.key_set_ttl_secs.unwrap_or(defaults.key_set_ttl_secs),
			leeway_secs: self.leeway_secs.unwrap_or(defaults.leeway_secs),
		}
	}
}
