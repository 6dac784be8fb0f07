// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Retry logic with exponential backoff for GitHub API calls.

use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

/// Backoff policy applied to transient upstream failures.
///
/// The default is three total attempts, waiting 5s and then 10s between
/// them. Client errors (4xx) are never retried; that decision belongs to the
/// error type through [`RetryableError`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_secs(5),
			max_delay: Duration::from_secs(20),
			backoff_factor: 2.0,
			jitter: false,
		}
	}
}

pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

const RETRYABLE_STATUSES: [StatusCode; 6] = [
	StatusCode::TOO_MANY_REQUESTS,
	StatusCode::REQUEST_TIMEOUT,
	StatusCode::INTERNAL_SERVER_ERROR,
	StatusCode::BAD_GATEWAY,
	StatusCode::SERVICE_UNAVAILABLE,
	StatusCode::GATEWAY_TIMEOUT,
];

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		if self.is_timeout() || self.is_connect() {
			return true;
		}

		if let Some(status) = self.status() {
			return RETRYABLE_STATUSES.contains(&status);
		}

		false
	}
}

fn calculate_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
	let exponential_delay = cfg.base_delay.as_secs_f64() * cfg.backoff_factor.powi(attempt as i32);
	let capped_delay = exponential_delay.min(cfg.max_delay.as_secs_f64());

	let final_delay = if cfg.jitter {
		let jitter_factor = 0.5 + fastrand::f64();
		capped_delay * jitter_factor
	} else {
		capped_delay
	};

	Duration::from_secs_f64(final_delay)
}

pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Debug,
{
	let mut attempt = 0;

	loop {
		match f().await {
			Ok(result) => return Ok(result),
			Err(err) => {
				attempt += 1;

				if !err.is_retryable() {
					return Err(err);
				}

				if attempt >= cfg.max_attempts {
					warn!(
						error = ?err,
						attempt = attempt,
						max_attempts = cfg.max_attempts,
						"Max retry attempts exhausted"
					);
					return Err(err);
				}

				let delay = calculate_delay(cfg, attempt - 1);
				warn!(
					error = ?err,
					attempt = attempt,
					max_attempts = cfg.max_attempts,
					delay_ms = delay.as_millis() as u64,
					"Retrying after transient error"
				);

				tokio::time::sleep(delay).await;
			}
		}
	}
}
