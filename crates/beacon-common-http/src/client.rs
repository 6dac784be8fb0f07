// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP client with consistent User-Agent header.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// Creates a new HTTP client builder with the standard Beacon User-Agent header.
///
/// Use this when you need to customize the client (e.g., set timeout).
///
/// # Example
/// ```ignore
/// let client = beacon_common_http::builder()
///     .timeout(Duration::from_secs(30))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Creates a new HTTP client with a custom timeout and the standard User-Agent.
pub fn new_client_with_timeout(timeout: Duration) -> reqwest::Result<Client> {
	builder().timeout(timeout).build()
}

/// Returns the standard Beacon User-Agent string.
///
/// Format: `beacon/{version}`
pub fn user_agent() -> String {
	format!("beacon/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_agent_has_correct_format() {
		let ua = user_agent();
		let parts: Vec<&str> = ua.split('/').collect();
		assert_eq!(parts.len(), 2);
		assert_eq!(parts[0], "beacon");
		assert!(!parts[1].is_empty());
	}

	#[test]
	fn client_builds_with_timeout() {
		assert!(new_client_with_timeout(Duration::from_secs(5)).is_ok());
	}
}
