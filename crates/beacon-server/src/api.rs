// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Application state and router construction.

use std::sync::Arc;
use std::time::Duration;

use axum::{
	routing::{get, post},
	Router,
};
use beacon_common_config::SecretString;
use beacon_server_broker::{
	CredentialBroker, HttpKeySetSource, InstallationResolver, OidcConfig, OidcValidator,
};
use beacon_server_config::{OidcSettings, ServerConfig};
use beacon_server_db::{InstallationCacheRepository, TrackedRunRepository};
use beacon_server_github_app::{GithubAppClient, GithubAppConfig};
use beacon_server_tracker::{
	GithubNotifier, GithubRunStatusSource, Notifier, SafetyNet, SqliteTrackerStore, SystemClock,
	TrackerDeps, TrackerHost, TrackerSettings,
};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{api_docs, error::ServerError, routes};

/// Shared state for all handlers.
///
/// Every component is optional so the server can start (and report its
/// health) without a GitHub App; endpoints that need a missing component
/// answer 503.
#[derive(Clone, Default)]
pub struct AppState {
	pub broker: Option<Arc<CredentialBroker>>,
	pub tracker: Option<TrackerHost>,
	pub safety_net: Option<Arc<SafetyNet>>,
	/// Bearer token accepted by `POST /internal/runs`.
	pub internal_token: Option<SecretString>,
	/// Secret for `X-Hub-Signature-256` verification.
	pub webhook_secret: Option<SecretString>,
}

impl AppState {
	pub fn broker(&self) -> Result<&Arc<CredentialBroker>, ServerError> {
		self
			.broker
			.as_ref()
			.ok_or_else(|| ServerError::NotConfigured("GitHub App is not configured".to_string()))
	}

	pub fn tracker(&self) -> Result<&TrackerHost, ServerError> {
		self
			.tracker
			.as_ref()
			.ok_or_else(|| ServerError::NotConfigured("run tracking is not configured".to_string()))
	}

	pub fn safety_net(&self) -> Result<&Arc<SafetyNet>, ServerError> {
		self
			.safety_net
			.as_ref()
			.ok_or_else(|| ServerError::NotConfigured("run tracking is not configured".to_string()))
	}
}

fn oidc_config(settings: &OidcSettings) -> OidcConfig {
	OidcConfig {
		issuer: settings.issuer.clone(),
		audience: settings.audience.clone(),
		jwks_url: settings.jwks_url.clone(),
		key_set_ttl: Duration::from_secs(settings.key_set_ttl_secs),
		leeway: Duration::from_secs(settings.leeway_secs),
		..OidcConfig::default()
	}
}

/// Build the application state from resolved configuration.
///
/// Without a GitHub App only the health endpoint is functional.
pub async fn create_app_state(
	pool: SqlitePool,
	config: &ServerConfig,
) -> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
	let Some(app) = &config.github_app else {
		warn!("GitHub App not configured; broker and run tracking are disabled");
		return Ok(AppState::default());
	};

	let mut app_config = GithubAppConfig::new(app.app_id, app.private_key_pem.clone())
		.with_base_url(&app.base_url)?
		.with_app_slug(app.app_slug.clone())
		.with_retry_config(config.broker.retry.clone());
	if let Some(secret) = &app.webhook_secret {
		app_config = app_config.with_webhook_secret(secret.clone());
	}
	let client = Arc::new(GithubAppClient::new(app_config)?);

	let key_source = Arc::new(HttpKeySetSource::new(config.oidc.jwks_url.clone())?);
	let validator = Arc::new(OidcValidator::new(oidc_config(&config.oidc), key_source));

	let resolver = InstallationResolver::new(
		Arc::new(InstallationCacheRepository::new(pool.clone())),
		client.clone(),
	)
	.with_ttl(Duration::from_secs(config.broker.installation_cache_ttl_secs));

	let broker = Arc::new(CredentialBroker::new(
		validator,
		resolver,
		client.clone(),
		beacon_server_broker::BrokerConfig {
			personal_tokens_enabled: config.broker.personal_tokens_enabled,
		},
	));

	let notifier: Arc<dyn Notifier> = Arc::new(GithubNotifier::new(broker.clone(), client.clone()));
	let deps = TrackerDeps {
		store: Arc::new(SqliteTrackerStore::new(TrackedRunRepository::new(pool))),
		status: Arc::new(GithubRunStatusSource::new(broker.clone(), client)),
		notifier: notifier.clone(),
		clock: Arc::new(SystemClock),
		settings: TrackerSettings {
			poll_interval: Duration::from_secs(config.tracker.poll_interval_secs),
			max_tracking_duration: Duration::from_secs(config.tracker.max_tracking_secs),
		},
	};
	let tracker = TrackerHost::new(deps);

	let mut safety_net = SafetyNet::new(tracker.clone(), notifier);
	match &config.tracker.workflow_name {
		Some(name) => safety_net = safety_net.with_workflow_name(name.clone()),
		None => warn!("No tracker workflow name configured; failures of untracked runs will not be reported"),
	}

	info!(
		app_id = app.app_id,
		personal_tokens_enabled = config.broker.personal_tokens_enabled,
		internal_api_enabled = config.tracker.internal_token.is_some(),
		webhooks_enabled = app.webhook_secret.is_some(),
		"Broker and run tracker initialised"
	);

	Ok(AppState {
		broker: Some(broker),
		tracker: Some(tracker),
		safety_net: Some(Arc::new(safety_net)),
		internal_token: config.tracker.internal_token.clone(),
		webhook_secret: app.webhook_secret.clone(),
	})
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health::health_check))
		.route(
			"/installation/{owner}/{repo}",
			get(routes::installation::get_installation),
		)
		.route("/token/exchange", post(routes::token::exchange_token))
		.route("/token/exchange/repo", post(routes::token::exchange_token_for_repo))
		.route(
			"/token/exchange/personal",
			post(routes::token::exchange_personal_token),
		)
		.route("/runs/finalize", post(routes::runs::finalize_run))
		.route("/internal/runs", post(routes::runs::start_tracking))
		.route("/webhooks/github", post(routes::webhooks::github_webhook))
		.route("/api/openapi.json", get(api_docs::openapi_json))
		.with_state(state)
}
