// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Error types for GitHub App client.

use beacon_common_http::RetryableError;
use thiserror::Error;

/// Errors that can occur when interacting with the GitHub App API.
#[derive(Debug, Error)]
pub enum GithubAppError {
	#[error("Network error: {0}")]
	Network(#[from] reqwest::Error),

	#[error("Request timed out")]
	Timeout,

	#[error("Unauthorized or invalid app configuration")]
	Unauthorized,

	#[error("Forbidden or insufficient permissions")]
	Forbidden,

	#[error("Rate limit exceeded")]
	RateLimited,

	/// The addressed resource does not exist, or is invisible to the token
	/// that asked for it.
	#[error("Not found: {0}")]
	NotFound(String),

	#[error("GitHub API error: {status} - {message}")]
	ApiError { status: u16, message: String },

	#[error("Invalid response from GitHub: {0}")]
	InvalidResponse(String),

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("JWT error: {0}")]
	Jwt(String),

	#[error("GitHub App not installed for {owner}/{repo}")]
	InstallationNotFound { owner: String, repo: String },

	#[error("Invalid webhook signature")]
	InvalidWebhookSignature,
}

impl RetryableError for GithubAppError {
	fn is_retryable(&self) -> bool {
		match self {
			GithubAppError::Network(e) => e.is_retryable(),
			GithubAppError::Timeout => true,
			GithubAppError::RateLimited => true,
			GithubAppError::ApiError { status, .. } => *status >= 500,
			_ => false,
		}
	}
}

impl GithubAppError {
	pub fn api_error(status: u16, message: impl Into<String>) -> Self {
		Self::ApiError {
			status,
			message: message.into(),
		}
	}

	pub fn installation_not_found(owner: impl Into<String>, repo: impl Into<String>) -> Self {
		Self::InstallationNotFound {
			owner: owner.into(),
			repo: repo.into(),
		}
	}

	/// True when GitHub answered 404 for the request.
	pub fn is_not_found(&self) -> bool {
		matches!(
			self,
			GithubAppError::NotFound(_)
				| GithubAppError::InstallationNotFound { .. }
				| GithubAppError::ApiError { status: 404, .. }
		)
	}

	/// HTTP status GitHub returned, when the failure came from a response.
	pub fn status(&self) -> Option<u16> {
		match self {
			GithubAppError::Unauthorized => Some(401),
			GithubAppError::Forbidden | GithubAppError::RateLimited => Some(403),
			GithubAppError::NotFound(_) | GithubAppError::InstallationNotFound { .. } => Some(404),
			GithubAppError::ApiError { status, .. } => Some(*status),
			GithubAppError::Network(e) => e.status().map(|s| s.as_u16()),
			_ => None,
		}
	}
}
