// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Credential broker settings.

use std::time::Duration;

use beacon_common_http::RetryConfig;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
	pub installation_cache_ttl_secs: u64,
	/// Personal-token exchange; off unless explicitly enabled.
	pub personal_tokens_enabled: bool,
	pub retry: RetryConfig,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			installation_cache_ttl_secs: 30 * 60,
			personal_tokens_enabled: false,
			retry: RetryConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfigLayer {
	#[serde(default)]
	pub installation_cache_ttl_secs: Option<u64>,
	#[serde(default)]
	pub personal_tokens_enabled: Option<bool>,
	#[serde(default)]
	pub retry_max_attempts: Option<u32>,
	#[serde(default)]
	pub retry_base_delay_ms: Option<u64>,
	#[serde(default)]
	pub retry_max_delay_ms: Option<u64>,
}

impl BrokerConfigLayer {
	pub fn merge(&mut self, other: BrokerConfigLayer) {
		if other.installation_cache_ttl_secs.is_some() {
			self.installation_cache_ttl_secs = other.installation_cache_ttl_secs;
		}
		if other.personal_tokens_enabled.is_some() {
			self.personal_tokens_enabled = other.personal_tokens_enabled;
		}
		if other.retry_max_attempts.is_some() {
			self.retry_max_attempts = other.retry_max_attempts;
		}
		if other.retry_base_delay_ms.is_some() {
			self.retry_base_delay_ms = other.retry_base_delay_ms;
		}
		if other.retry_max_delay_ms.is_some() {
			self.retry_max_delay_ms = other.retry_max_delay_ms;
		}
	}

	pub fn finalize(self) -> BrokerConfig {
		let defaults = BrokerConfig::default();
		let retry = RetryConfig {
			max_attempts: self
				.retry_max_attempts
				.unwrap_or(defaults.retry.max_attempts)
				.max(1),
			base_delay: self
				.retry_base_delay_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.retry.base_delay),
			max_delay: self
				.retry_max_delay_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.retry.max_delay),
			..defaults.retry
		};

		BrokerConfig {
			installation_cache_ttl_secs: self
				.installation_cache_ttl_secs
				.unwrap_or(defaults.installation_cache_ttl_secs),
			personal_tokens_enabled: self.personal_tokens_enabled.unwrap_or(false),
			retry,
		}
	}
}
