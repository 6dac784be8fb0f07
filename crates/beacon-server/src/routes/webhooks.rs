// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! GitHub webhook ingress.

use axum::{
	body::Bytes,
	extract::State,
	http::HeaderMap,
	Json,
};
use beacon_server_github_app::verify_webhook_signature;
use beacon_server_tracker::{SafetyNetAction, WorkflowRunEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::parse_json;
use crate::{api::AppState, error::ServerError};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
	pub event: String,
	/// What was done with the event, e.g. `ignored`, `finalized`, `notified`.
	pub result: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub issue_number: Option<u64>,
}

impl WebhookResponse {
	fn new(event: &str, result: &str) -> Self {
		Self {
			event: event.to_string(),
			result: result.to_string(),
			issue_number: None,
		}
	}
}

fn describe(action: SafetyNetAction) -> (&'static str, Option<u64>) {
	match action {
		SafetyNetAction::Ignored => ("ignored", None),
		SafetyNetAction::Finalized(_) => ("finalized", None),
		SafetyNetAction::AlreadyHandled => ("already_handled", None),
		SafetyNetAction::Notified { issue_number } => ("notified", Some(issue_number)),
		SafetyNetAction::Unrecoverable => ("unrecoverable", None),
	}
}

#[utoipa::path(
    post,
    path = "/webhooks/github",
    request_body(content = String, description = "Raw webhook payload, verified against X-Hub-Signature-256", content_type = "application/json"),
    responses(
        (status = 200, description = "Event processed or ignored", body = WebhookResponse),
        (status = 400, description = "Malformed payload", body = crate::error::ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = crate::error::ErrorResponse),
        (status = 503, description = "Webhook secret not configured", body = crate::error::ErrorResponse)
    ),
    tag = "webhooks"
)]
/// POST /webhooks/github - Signed GitHub App webhook deliveries.
pub async fn github_webhook(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Json<WebhookResponse>, ServerError> {
	let event_type = headers
		.get("X-GitHub-Event")
		.and_then(|v| v.to_str().ok())
		.unwrap_or("unknown");

	debug!(event_type = %event_type, "github_webhook: received event");

	let secret = state.webhook_secret.as_ref().ok_or_else(|| {
		warn!("github_webhook: webhook secret not configured");
		ServerError::NotConfigured("webhook secret is not configured".to_string())
	})?;

	let signature = headers
		.get("X-Hub-Signature-256")
		.and_then(|v| v.to_str().ok())
		.ok_or_else(|| {
			warn!("github_webhook: missing X-Hub-Signature-256 header");
			ServerError::Unauthorized("Missing X-Hub-Signature-256 header".to_string())
		})?;

	if let Err(e) = verify_webhook_signature(secret.expose(), signature, &body) {
		warn!(error = %e, "github_webhook: signature verification failed");
		return Err(ServerError::Unauthorized("Invalid webhook signature".to_string()));
	}

	match event_type {
		"workflow_run" => {
			let event: WorkflowRunEvent = parse_json(&body)?;
			let action = state.safety_net()?.handle_workflow_run(&event).await?;
			let (result, issue_number) = describe(action);
			info!(
				repository = %event.repository.full_name,
				run_id = event.workflow_run.id,
				action = %event.action,
				result,
				"github_webhook: workflow_run handled"
			);
			Ok(Json(WebhookResponse {
				issue_number,
				..WebhookResponse::new(event_type, result)
			}))
		}
		_ => {
			debug!(event_type = %event_type, "github_webhook: ignoring event");
			Ok(Json(WebhookResponse::new(event_type, "ignored")))
		}
	}
}
