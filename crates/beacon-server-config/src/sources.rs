// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use beacon_common_config::load_secret_env;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	BrokerConfigLayer, DatabaseConfigLayer, GithubAppConfigLayer, HttpConfigLayer, LogFormat,
	LoggingConfigLayer, OidcConfigLayer, TrackerConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file yields an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/beacon/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: BEACON_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			http: Some(load_http_from_env()?),
			database: Some(load_database_from_env()),
			github_app: Some(load_github_app_from_env()?),
			oidc: Some(load_oidc_from_env()?),
			broker: Some(load_broker_from_env()?),
			tracker: Some(load_tracker_from_env()?),
			logging: Some(load_logging_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {kind} value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u16(name: &str) -> Result<Option<u16>, ConfigError> {
	env_parse(name, "u16")
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	env_parse(name, "u32")
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	env_parse(name, "u64")
}

fn secret_env(name: &str) -> Result<Option<beacon_common_config::SecretString>, ConfigError> {
	load_secret_env(name).map_err(|e| ConfigError::Secret(e.to_string()))
}

fn load_http_from_env() -> Result<HttpConfigLayer, ConfigError> {
	Ok(HttpConfigLayer {
		host: env_var("BEACON_SERVER_HOST"),
		port: env_u16("BEACON_SERVER_PORT")?,
	})
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("BEACON_SERVER_DATABASE_URL"),
	}
}

fn load_github_app_from_env() -> Result<GithubAppConfigLayer, ConfigError> {
	Ok(GithubAppConfigLayer {
		app_id: env_u64("BEACON_SERVER_GITHUB_APP_ID")?,
		private_key_pem: secret_env("BEACON_SERVER_GITHUB_APP_PRIVATE_KEY")?,
		webhook_secret: secret_env("BEACON_SERVER_GITHUB_APP_WEBHOOK_SECRET")?,
		app_slug: env_var("BEACON_SERVER_GITHUB_APP_SLUG"),
		base_url: env_var("BEACON_SERVER_GITHUB_APP_BASE_URL"),
	})
}

fn load_oidc_from_env() -> Result<OidcConfigLayer, ConfigError> {
	Ok(OidcConfigLayer {
		issuer: env_var("BEACON_SERVER_OIDC_ISSUER"),
		audience: env_var("BEACON_SERVER_OIDC_AUDIENCE"),
		jwks_url: env_var("BEACON_SERVER_OIDC_JWKS_URL"),
		key_set_ttl_secs: env_u64("BEACON_SERVER_OIDC_KEY_SET_TTL_SECS")?,
		leeway_secs: env_u64("BEACON_SERVER_OIDC_LEEWAY_SECS")?,
	})
}

fn load_broker_from_env() -> Result<BrokerConfigLayer, ConfigError> {
	Ok(BrokerConfigLayer {
		installation_cache_ttl_secs: env_u64("BEACON_SERVER_BROKER_INSTALLATION_CACHE_TTL_SECS")?,
		personal_tokens_enabled: env_bool("BEACON_SERVER_BROKER_PERSONAL_TOKENS_ENABLED"),
		retry_max_attempts: env_u32("BEACON_SERVER_BROKER_RETRY_MAX_ATTEMPTS")?,
		retry_base_delay_ms: env_u64("BEACON_SERVER_BROKER_RETRY_BASE_DELAY_MS")?,
		retry_max_delay_ms: env_u64("BEACON_SERVER_BROKER_RETRY_MAX_DELAY_MS")?,
	})
}

fn load_tracker_from_env() -> Result<TrackerConfigLayer, ConfigError> {
	Ok(TrackerConfigLayer {
		poll_interval_secs: env_u64("BEACON_SERVER_TRACKER_POLL_INTERVAL_SECS")?,
		max_tracking_secs: env_u64("BEACON_SERVER_TRACKER_MAX_TRACKING_SECS")?,
		internal_token: secret_env("BEACON_SERVER_TRACKER_INTERNAL_TOKEN")?,
		workflow_name: env_var("BEACON_SERVER_TRACKER_WORKFLOW_NAME"),
	})
}

fn parse_log_format(name: &str, value: &str) -> Result<LogFormat, ConfigError> {
	match value.to_ascii_lowercase().as_str() {
		"pretty" | "text" => Ok(LogFormat::Pretty),
		"json" => Ok(LogFormat::Json),
		other => Err(ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("unknown log format '{other}', expected 'pretty' or 'json'"),
		}),
	}
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = match env_var("BEACON_SERVER_LOG_FORMAT") {
		Some(v) => Some(parse_log_format("BEACON_SERVER_LOG_FORMAT", &v)?),
		None => None,
	};
	Ok(LoggingConfigLayer {
		level: env_var("BEACON_SERVER_LOG_LEVEL"),
		format,
	})
}
