// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Token exchange HTTP handlers.

use axum::{
	body::Bytes,
	extract::State,
	http::HeaderMap,
	Json,
};
use beacon_server_broker::{PermissionRequest, RepoTarget};
use beacon_server_github_app::{InstallationPermissions, ScopedAccessToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{authorization, parse_json, parse_optional_json};
use crate::{api::AppState, error::ServerError};

/// Optional body of `POST /token/exchange`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ExchangeRequest {
	/// Subset of the broker's permission ceiling, e.g. `{"contents": "read"}`.
	/// Omitted means the full ceiling.
	#[serde(default)]
	#[schema(value_type = Option<Object>)]
	pub permissions: Option<PermissionRequest>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RepoExchangeRequest {
	pub owner: String,
	pub repo: String,
	#[serde(default)]
	#[schema(value_type = Option<Object>)]
	pub permissions: Option<PermissionRequest>,
}

impl RepoExchangeRequest {
	fn target(&self) -> RepoTarget {
		RepoTarget::new(self.owner.as_str(), self.repo.as_str())
	}
}

/// A minted installation token. Not `Debug`: the token is live.
#[derive(Serialize, ToSchema)]
pub struct TokenResponse {
	pub token: String,
	pub expires_at: DateTime<Utc>,
	pub repository: String,
	#[schema(value_type = Object)]
	pub permissions: InstallationPermissions,
}

impl From<ScopedAccessToken> for TokenResponse {
	fn from(minted: ScopedAccessToken) -> Self {
		Self {
			token: minted.token.expose().clone(),
			expires_at: minted.expires_at,
			repository: minted.repository,
			permissions: minted.permissions,
		}
	}
}

#[utoipa::path(
    post,
    path = "/token/exchange",
    request_body(content = ExchangeRequest, description = "Optional permission subset"),
    responses(
        (status = 200, description = "Token for the calling workflow's repository", body = TokenResponse),
        (status = 400, description = "Permissions outside the ceiling", body = crate::error::ErrorResponse),
        (status = 401, description = "Missing, malformed or invalid identity token", body = crate::error::ErrorResponse),
        (status = 404, description = "App not installed on the repository", body = crate::error::ErrorResponse),
        (status = 502, description = "GitHub API error", body = crate::error::ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "broker"
)]
/// POST /token/exchange - Identity token for a same-repository token.
pub async fn exchange_token(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Json<TokenResponse>, ServerError> {
	let broker = state.broker()?;
	let request: ExchangeRequest = parse_optional_json(&body)?;
	let minted = broker
		.exchange_token(authorization(&headers), request.permissions.as_ref())
		.await?;
	Ok(Json(minted.into()))
}

#[utoipa::path(
    post,
    path = "/token/exchange/repo",
    request_body = RepoExchangeRequest,
    responses(
        (status = 200, description = "Token for the target repository", body = TokenResponse),
        (status = 401, description = "Missing, malformed or invalid identity token", body = crate::error::ErrorResponse),
        (status = 403, description = "Cross-organization request or actor lacks write access", body = crate::error::ErrorResponse),
        (status = 404, description = "App not installed on the target", body = crate::error::ErrorResponse),
        (status = 502, description = "GitHub API error", body = crate::error::ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "broker"
)]
/// POST /token/exchange/repo - Identity token for a token on a sibling repository.
pub async fn exchange_token_for_repo(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Json<TokenResponse>, ServerError> {
	let broker = state.broker()?;
	let request: RepoExchangeRequest = parse_json(&body)?;
	let minted = broker
		.exchange_token_for_repo(
			authorization(&headers),
			&request.target(),
			request.permissions.as_ref(),
		)
		.await?;
	Ok(Json(minted.into()))
}

#[utoipa::path(
    post,
    path = "/token/exchange/personal",
    request_body = RepoExchangeRequest,
    responses(
        (status = 200, description = "Token for the target repository", body = TokenResponse),
        (status = 401, description = "Missing or malformed credential", body = crate::error::ErrorResponse),
        (status = 403, description = "Exchange disabled or credential lacks write access", body = crate::error::ErrorResponse),
        (status = 404, description = "App not installed on the target", body = crate::error::ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "broker"
)]
/// POST /token/exchange/personal - Personal credential for an installation token.
pub async fn exchange_personal_token(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Json<TokenResponse>, ServerError> {
	let broker = state.broker()?;
	let request: RepoExchangeRequest = parse_json(&body)?;
	let minted = broker
		.exchange_personal_token(
			authorization(&headers),
			&request.target(),
			request.permissions.as_ref(),
		)
		.await?;
	Ok(Json(minted.into()))
}
