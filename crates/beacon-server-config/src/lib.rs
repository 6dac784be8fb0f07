// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Layered configuration for the Beacon server.
//!
//! Sources are merged in precedence order: built-in defaults, the TOML config
//! file, then `BEACON_SERVER_*` environment variables.
//!
//! ```ignore
//! use beacon_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("listening on {}", config.socket_addr());
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub github_app: Option<GithubAppSettings>,
	pub oidc: OidcSettings,
	pub broker: BrokerConfig,
	pub tracker: TrackerConfig,
	pub logging: LoggingConfig,
}

impl ServerConfig {
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`BEACON_SERVER_*`)
/// 2. Config file (`/etc/beacon/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only.
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![Box::new(DefaultsSource), Box::new(EnvSource)])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Finalize a merged layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let http = layer.http.unwrap_or_default().finalize();
	let database = layer.database.unwrap_or_default().finalize();
	let oidc = layer.oidc.unwrap_or_default().finalize();
	let broker = layer.broker.unwrap_or_default().finalize();
	let tracker = layer.tracker.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let github_app = match layer.github_app {
		Some(l) => l.finalize()?,
		None => None,
	};

	let config = ServerConfig {
		http,
		database,
		github_app,
		oidc,
		broker,
		tracker,
		logging,
	};
	validate_config(&config)?;

	info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		github_app_configured = config.github_app.is_some(),
		oidc_audience = %config.oidc.audience,
		personal_tokens_enabled = config.broker.personal_tokens_enabled,
		poll_interval_secs = config.tracker.poll_interval_secs,
		max_tracking_secs = config.tracker.max_tracking_secs,
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.broker.personal_tokens_enabled && config.github_app.is_none() {
		return Err(ConfigError::Validation(
			"BEACON_SERVER_BROKER_PERSONAL_TOKENS_ENABLED requires a configured GitHub App"
				.to_string(),
		));
	}

	if config
		.tracker
		.internal_token
		.as_ref()
		.is_some_and(|token| token.expose().trim().is_empty())
	{
		return Err(ConfigError::Validation(
			"tracker internal token must not be blank".to_string(),
		));
	}

	if config.tracker.poll_interval_secs == 0 {
		return Err(ConfigError::Validation(
			"tracker poll interval must be greater than zero".to_string(),
		));
	}

	if config.tracker.max_tracking_secs == 0 {
		return Err(ConfigError::Validation(
			"tracker max tracking duration must be greater than zero".to_string(),
		));
	}

	Ok(())
}
