// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! OpenAPI documentation for beacon-server, served at `/api/openapi.json`.

use axum::Json;
use utoipa::{
	openapi::security::{Http, HttpAuthScheme, SecurityScheme},
	Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Beacon Server API",
        description = "Exchanges CI identity tokens for repository-scoped GitHub App tokens and tracks workflow runs to completion.",
        license(name = "Proprietary")
    ),
    tags(
        (name = "health", description = "Health checks"),
        (name = "broker", description = "Installation lookup and token exchange"),
        (name = "runs", description = "Workflow run tracking"),
        (name = "webhooks", description = "GitHub App webhook ingress")
    ),
    paths(
        crate::routes::health::health_check,
        crate::routes::installation::get_installation,
        crate::routes::token::exchange_token,
        crate::routes::token::exchange_token_for_repo,
        crate::routes::token::exchange_personal_token,
        crate::routes::runs::finalize_run,
        crate::routes::runs::start_tracking,
        crate::routes::webhooks::github_webhook,
    ),
    components(
        schemas(
            crate::routes::health::HealthResponse,
            crate::routes::installation::InstallationRef,
            crate::routes::installation::InstallationResponse,
            crate::routes::token::ExchangeRequest,
            crate::routes::token::RepoExchangeRequest,
            crate::routes::token::TokenResponse,
            crate::routes::runs::FinalizeRunRequest,
            crate::routes::runs::FinalizeRunResponse,
            crate::routes::runs::StartTrackingRequest,
            crate::routes::runs::StartTrackingResponse,
            crate::routes::webhooks::WebhookResponse,
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
	fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
		if let Some(components) = openapi.components.as_mut() {
			components.add_security_scheme(
				"bearer",
				SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
			);
		}
	}
}

/// GET /api/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
	Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_openapi_spec_has_documented_paths() {
		let json = serde_json::to_string(&ApiDoc::openapi()).expect("should serialize");

		for path in [
			"/health",
			"/installation/{owner}/{repo}",
			"/token/exchange",
			"/token/exchange/repo",
			"/token/exchange/personal",
			"/runs/finalize",
			"/internal/runs",
			"/webhooks/github",
		] {
			assert!(json.contains(path), "Missing path: {path}");
		}
		assert!(json.contains("Beacon Server API"));
	}
}
