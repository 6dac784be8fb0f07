// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use axum::{
	extract::{Path, State},
	Json,
};
use beacon_server_broker::RepoTarget;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{api::AppState, error::ServerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InstallationRef {
	pub id: u64,
}

/// `installation` is `null` when the app is not installed on the repository.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InstallationResponse {
	pub installation: Option<InstallationRef>,
}

#[utoipa::path(
    get,
    path = "/installation/{owner}/{repo}",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name")
    ),
    responses(
        (status = 200, description = "Installation lookup result", body = InstallationResponse),
        (status = 400, description = "Invalid owner or repository", body = crate::error::ErrorResponse),
        (status = 502, description = "GitHub API error", body = crate::error::ErrorResponse),
        (status = 503, description = "GitHub App not configured", body = crate::error::ErrorResponse)
    ),
    tag = "broker"
)]
/// GET /installation/{owner}/{repo} - Installation covering a repository.
pub async fn get_installation(
	State(state): State<AppState>,
	Path((owner, repo)): Path<(String, String)>,
) -> Result<Json<InstallationResponse>, ServerError> {
	let broker = state.broker()?;
	RepoTarget::new(owner.as_str(), repo.as_str()).validate()?;

	let installation = broker
		.get_installation(&owner, &repo)
		.await?
		.map(|id| InstallationRef { id });
	Ok(Json(InstallationResponse { installation }))
}
