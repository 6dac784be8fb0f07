// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Server error types and HTTP response conversions.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use beacon_server_broker::{AuthorizationFailure, BrokerError};
use beacon_server_tracker::TrackerError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error(transparent)]
	Broker(#[from] BrokerError),

	#[error(transparent)]
	Tracker(#[from] TrackerError),

	#[error("Invalid request: {0}")]
	BadRequest(String),

	#[error("Unauthorized: {0}")]
	Unauthorized(String),

	/// A dependency of the endpoint (GitHub App, tracker, secret) is not
	/// configured on this server.
	#[error("Not configured: {0}")]
	NotConfigured(String),

	#[error("Internal error: {0}")]
	Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
	/// Machine-readable authorization failure, when that is the cause.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

impl ErrorResponse {
	fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			error: error.into(),
			message: message.into(),
			reason: None,
		}
	}
}

fn authorization_status(failure: AuthorizationFailure) -> StatusCode {
	match failure {
		AuthorizationFailure::MissingHeader | AuthorizationFailure::MalformedHeader => {
			StatusCode::UNAUTHORIZED
		}
		AuthorizationFailure::CrossOrganization
		| AuthorizationFailure::InsufficientPermission
		| AuthorizationFailure::PersonalTokensDisabled
		| AuthorizationFailure::RunMismatch => StatusCode::FORBIDDEN,
	}
}

fn broker_response(err: &BrokerError) -> (StatusCode, ErrorResponse) {
	let status = match err {
		BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
		BrokerError::OidcValidation(_) => StatusCode::UNAUTHORIZED,
		BrokerError::Authorization(failure) => authorization_status(*failure),
		BrokerError::InstallationNotFound { .. } => StatusCode::NOT_FOUND,
		BrokerError::GitHubApi { .. } => StatusCode::BAD_GATEWAY,
	};

	if status == StatusCode::BAD_GATEWAY {
		tracing::error!(error = %err, "GitHub API error");
	} else {
		tracing::debug!(error = %err, status = status.as_u16(), "Broker refused request");
	}

	let mut body = ErrorResponse::new(err.error_code(), err.to_string());
	if let BrokerError::Authorization(failure) = err {
		body.reason = Some(failure.reason().to_string());
	}
	(status, body)
}

fn tracker_response(err: &TrackerError) -> (StatusCode, ErrorResponse) {
	match err {
		TrackerError::AlreadyFinalized { .. } => (
			StatusCode::CONFLICT,
			ErrorResponse::new("already_finalized", err.to_string()),
		),
		TrackerError::Invalid(message) => (
			StatusCode::BAD_REQUEST,
			ErrorResponse::new("validation_error", message.clone()),
		),
		TrackerError::Store(message) => {
			tracing::error!(error = %message, "tracker store error");
			(
				StatusCode::INTERNAL_SERVER_ERROR,
				ErrorResponse::new("store_error", "A storage error occurred"),
			)
		}
		TrackerError::Broker(inner) => broker_response(inner),
		TrackerError::GitHub(inner) => {
			tracing::error!(error = %inner, "GitHub API error");
			(
				StatusCode::BAD_GATEWAY,
				ErrorResponse::new("github_api_error", inner.to_string()),
			)
		}
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let (status, body) = match &self {
			ServerError::Broker(err) => broker_response(err),
			ServerError::Tracker(err) => tracker_response(err),
			ServerError::BadRequest(message) => (
				StatusCode::BAD_REQUEST,
				ErrorResponse::new("bad_request", message.clone()),
			),
			ServerError::Unauthorized(message) => (
				StatusCode::UNAUTHORIZED,
				ErrorResponse::new("unauthorized", message.clone()),
			),
			ServerError::NotConfigured(message) => (
				StatusCode::SERVICE_UNAVAILABLE,
				ErrorResponse::new("not_configured", message.clone()),
			),
			ServerError::Internal(message) => {
				tracing::error!(error = %message, "internal error");
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					ErrorResponse::new("internal_error", "An internal error occurred"),
				)
			}
		};

		(status, Json(body)).into_response()
	}
}
