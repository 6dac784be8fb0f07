// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Error taxonomy for broker operations.

use std::fmt;

use beacon_server_github_app::GithubAppError;
use thiserror::Error;

/// Why a caller was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationFailure {
	MissingHeader,
	MalformedHeader,
	CrossOrganization,
	InsufficientPermission,
	PersonalTokensDisabled,
	/// The identity token belongs to a different workflow run.
	RunMismatch,
}

impl AuthorizationFailure {
	/// Stable machine-readable reason.
	pub fn reason(&self) -> &'static str {
		match self {
			AuthorizationFailure::MissingHeader => "missing_header",
			AuthorizationFailure::MalformedHeader => "malformed_header",
			AuthorizationFailure::CrossOrganization => "cross_org",
			AuthorizationFailure::InsufficientPermission => "insufficient_permission",
			AuthorizationFailure::PersonalTokensDisabled => "personal_tokens_disabled",
			AuthorizationFailure::RunMismatch => "run_mismatch",
		}
	}
}

impl fmt::Display for AuthorizationFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let message = match self {
			AuthorizationFailure::MissingHeader => "authorization header is missing",
			AuthorizationFailure::MalformedHeader => "authorization header must be 'Bearer <token>'",
			AuthorizationFailure::CrossOrganization => {
				"target repository belongs to a different owner than the calling workflow"
			}
			AuthorizationFailure::InsufficientPermission => {
				"caller lacks write access to the target repository"
			}
			AuthorizationFailure::PersonalTokensDisabled => "personal token exchange is disabled",
			AuthorizationFailure::RunMismatch => "identity token was issued to a different workflow run",
		};
		f.write_str(message)
	}
}

#[derive(Debug, Error)]
pub enum BrokerError {
	/// The request itself is invalid; nothing external was contacted.
	#[error("Invalid request: {0}")]
	Validation(String),

	#[error("Identity token rejected: {0}")]
	OidcValidation(String),

	#[error("Not authorized: {0}")]
	Authorization(AuthorizationFailure),

	#[error("GitHub App not installed for {owner}/{repo}")]
	InstallationNotFound { owner: String, repo: String },

	#[error("GitHub API error: {message}")]
	GitHubApi { status: Option<u16>, message: String },
}

pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
	pub fn installation_not_found(owner: impl Into<String>, repo: impl Into<String>) -> Self {
		Self::InstallationNotFound {
			owner: owner.into(),
			repo: repo.into(),
		}
	}

	/// Stable discriminant used in HTTP error bodies.
	pub fn error_code(&self) -> &'static str {
		match self {
			BrokerError::Validation(_) => "validation_error",
			BrokerError::OidcValidation(_) => "oidc_validation_error",
			BrokerError::Authorization(_) => "authorization_error",
			BrokerError::InstallationNotFound { .. } => "installation_not_found",
			BrokerError::GitHubApi { .. } => "github_api_error",
		}
	}

	/// A downstream 404, the signal that a cached installation id may be stale.
	pub fn is_not_found(&self) -> bool {
		matches!(self, BrokerError::GitHubApi { status: Some(404), .. })
	}
}

impl From<GithubAppError> for BrokerError {
	fn from(err: GithubAppError) -> Self {
		match err {
			GithubAppError::InstallationNotFound { owner, repo } => {
				BrokerError::InstallationNotFound { owner, repo }
			}
			other => BrokerError::GitHubApi {
				status: other.status(),
				message: other.to_string(),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_codes_are_stable() {
		assert_eq!(
			BrokerError::Validation("x".into()).error_code(),
			"validation_error"
		);
		assert_eq!(
			BrokerError::OidcValidation("x".into()).error_code(),
			"oidc_validation_error"
		);
		assert_eq!(
			BrokerError::Authorization(AuthorizationFailure::CrossOrganization).error_code(),
			"authorization_error"
		);
		assert_eq!(
			BrokerError::installation_not_found("o", "r").error_code(),
			"installation_not_found"
		);
		assert_eq!(
			BrokerError::GitHubApi {
				status: Some(502),
				message: "x".into()
			}
			.error_code(),
			"github_api_error"
		);
	}

	#[test]
	fn authorization_reasons() {
		assert_eq!(AuthorizationFailure::CrossOrganization.reason(), "cross_org");
		assert_eq!(
			AuthorizationFailure::InsufficientPermission.reason(),
			"insufficient_permission"
		);
		assert_eq!(AuthorizationFailure::RunMismatch.reason(), "run_mismatch");
	}

	#[test]
	fn github_errors_keep_their_status() {
		let err: BrokerError = GithubAppError::NotFound("/app/installations/1".into()).into();
		assert!(err.is_not_found());

		let err: BrokerError = GithubAppError::installation_not_found("acme", "widgets").into();
		assert!(matches!(err, BrokerError::InstallationNotFound { .. }));
		assert!(!err.is_not_found());

		let err: BrokerError = GithubAppError::Timeout.into();
		assert!(matches!(err, BrokerError::GitHubApi { status: None, .. }));
	}

	#[test]
	fn insufficient_permission_message_does_not_list_permissions() {
		let message = BrokerError::Authorization(AuthorizationFailure::InsufficientPermission).to_string();
		assert!(!message.contains("read"));
		assert!(!message.contains("admin"));
	}
}
