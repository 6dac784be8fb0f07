// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Run tracking HTTP handlers.

use axum::{
	body::Bytes,
	extract::State,
	http::{HeaderMap, StatusCode},
	Json,
};
use beacon_server_broker::{bearer::parse_bearer, AuthorizationFailure, BrokerError, RepoTarget};
use beacon_server_tracker::{FinalizeOutcome, FinalizeStatus, ReactionTarget, RepoKey, StartTracking};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use utoipa::ToSchema;

use super::{authorization, parse_json};
use crate::{api::AppState, error::ServerError};

#[derive(Debug, Deserialize, ToSchema)]
pub struct FinalizeRunRequest {
	pub run_id: u64,
	/// One of `success`, `failure`, `cancelled`, `skipped`.
	#[schema(value_type = String)]
	pub status: FinalizeStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FinalizeRunResponse {
	pub run_id: u64,
	/// `finalized`, or `already_finalized` when the run was no longer active.
	pub outcome: String,
	pub notified: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartTrackingRequest {
	pub owner: String,
	pub repo: String,
	pub run_id: u64,
	pub run_url: String,
	pub issue_number: u64,
	#[serde(default)]
	#[schema(value_type = Option<Object>)]
	pub reaction_target: Option<ReactionTarget>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartTrackingResponse {
	pub run_id: u64,
	pub tracking: bool,
}

fn token_matches(expected: &str, presented: &str) -> bool {
	Sha256::digest(expected.as_bytes()) == Sha256::digest(presented.as_bytes())
}

#[utoipa::path(
    post,
    path = "/runs/finalize",
    request_body = FinalizeRunRequest,
    responses(
        (status = 200, description = "Run finalized or already finalized", body = FinalizeRunResponse),
        (status = 400, description = "Unknown status", body = crate::error::ErrorResponse),
        (status = 401, description = "Missing, malformed or invalid identity token", body = crate::error::ErrorResponse),
        (status = 403, description = "Identity token belongs to another run", body = crate::error::ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
/// POST /runs/finalize - A run reports its own completion.
///
/// The repository and run both come from the validated identity token, so a
/// workflow can only finalize itself.
pub async fn finalize_run(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Json<FinalizeRunResponse>, ServerError> {
	let broker = state.broker()?;
	let tracker = state.tracker()?;

	let claims = broker.identity_from_header(authorization(&headers)).await?;
	let request: FinalizeRunRequest = parse_json(&body)?;
	let run_id = request.run_id.to_string();
	if claims.run_id() != Some(run_id.as_str()) {
		warn!(
			claimed_run_id = ?claims.run_id(),
			run_id = request.run_id,
			"Rejected finalize for a run the token was not issued to"
		);
		return Err(BrokerError::Authorization(AuthorizationFailure::RunMismatch).into());
	}
	let repo = RepoKey::new(claims.repository_owner(), claims.repository_name());

	let outcome = tracker
		.finalize_run(&repo, request.run_id, request.status)
		.await?;

	let (outcome, notified) = match outcome {
		FinalizeOutcome::Finalized { notified } => ("finalized", notified),
		FinalizeOutcome::AlreadyFinalized => ("already_finalized", false),
	};
	Ok(Json(FinalizeRunResponse {
		run_id: request.run_id,
		outcome: outcome.to_string(),
		notified,
	}))
}

#[utoipa::path(
    post,
    path = "/internal/runs",
    request_body = StartTrackingRequest,
    responses(
        (status = 202, description = "Run is being tracked", body = StartTrackingResponse),
        (status = 401, description = "Missing or wrong internal token", body = crate::error::ErrorResponse),
        (status = 409, description = "Run already reached a terminal state", body = crate::error::ErrorResponse),
        (status = 503, description = "Internal API disabled", body = crate::error::ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
/// POST /internal/runs - Begin tracking a run on behalf of the webhook ingress.
pub async fn start_tracking(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<(StatusCode, Json<StartTrackingResponse>), ServerError> {
	let expected = state
		.internal_token
		.as_ref()
		.ok_or_else(|| ServerError::NotConfigured("internal API is disabled".to_string()))?;
	let presented = parse_bearer(authorization(&headers))?;
	if !token_matches(expected.expose(), presented) {
		warn!("Rejected internal request with wrong token");
		return Err(ServerError::Unauthorized("invalid internal token".to_string()));
	}

	let tracker = state.tracker()?;
	let request: StartTrackingRequest = parse_json(&body)?;
	RepoTarget::new(request.owner.as_str(), request.repo.as_str()).validate()?;
	if request.run_url.trim().is_empty() {
		return Err(ServerError::BadRequest("run_url must not be empty".to_string()));
	}

	let repo = RepoKey::new(request.owner, request.repo);
	let run_id = request.run_id;
	tracker
		.start_tracking(
			&repo,
			StartTracking {
				run_id,
				run_url: request.run_url,
				issue_number: request.issue_number,
				reaction_target: request.reaction_target,
			},
		)
		.await?;

	Ok((
		StatusCode::ACCEPTED,
		Json(StartTrackingResponse {
			run_id,
			tracking: true,
		}),
	))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn token_comparison() {
		assert!(token_matches("s3cret", "s3cret"));
		assert!(!token_matches("s3cret", "s3cre"));
		assert!(!token_matches("s3cret", ""));
	}

	#[test]
	fn finalize_request_rejects_unknown_status() {
		let err = serde_json::from_str::<FinalizeRunRequest>(r#"{"run_id":1,"status":"exploded"}"#);
		assert!(err.is_err());
		let ok: FinalizeRunRequest =
			serde_json::from_str(r#"{"run_id":1,"status":"cancelled"}"#).unwrap();
		assert_eq!(ok.status, FinalizeStatus::Cancelled);
	}
}
