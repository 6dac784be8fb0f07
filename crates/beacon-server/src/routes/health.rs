// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Health HTTP handler.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
	pub status: String,
	pub version: String,
	pub github_app_configured: bool,
	pub tracker_configured: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    ),
    tag = "health"
)]
/// GET /health - Liveness and configuration summary.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
	Json(HealthResponse {
		status: "ok".to_string(),
		version: env!("CARGO_PKG_VERSION").to_string(),
		github_app_configured: state.broker.is_some(),
		tracker_configured: state.tracker.is_some(),
	})
}
