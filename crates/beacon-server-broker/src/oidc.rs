// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Validation of CI identity tokens against the issuer's published key set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::BrokerError;

pub const GITHUB_ACTIONS_ISSUER: &str = "https://token.actions.githubusercontent.com";
pub const GITHUB_ACTIONS_JWKS_URL: &str =
	"https://token.actions.githubusercontent.com/.well-known/jwks";

#[derive(Debug, Clone)]
pub struct OidcConfig {
	/// Exact `iss` value tokens must carry.
	pub issuer: String,
	/// Value that must appear in `aud`.
	pub audience: String,
	pub jwks_url: String,
	/// How long a fetched key set is trusted before refetching.
	pub key_set_ttl: Duration,
	/// Floor between refetches triggered by an unknown `kid`.
	pub min_refresh_interval: Duration,
	/// Clock-skew tolerance for `exp` and `nbf`.
	pub leeway: Duration,
}

impl Default for OidcConfig {
	fn default() -> Self {
		Self {
			issuer: GITHUB_ACTIONS_ISSUER.to_string(),
			audience: "beacon".to_string(),
			jwks_url: GITHUB_ACTIONS_JWKS_URL.to_string(),
			key_set_ttl: Duration::from_secs(600),
			min_refresh_interval: Duration::from_secs(30),
			leeway: Duration::from_secs(60),
		}
	}
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
	One(String),
	Many(Vec<String>),
}

/// Claims of a validated identity token.
///
/// Only [`OidcValidator::validate`] produces these; there is no public
/// constructor.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
	iss: String,
	aud: Audience,
	#[serde(default)]
	sub: Option<String>,
	repository: String,
	repository_owner: String,
	actor: String,
	#[serde(default)]
	run_id: Option<String>,
	#[serde(default)]
	event_name: Option<String>,
	#[serde(default)]
	workflow: Option<String>,
	#[serde(default, rename = "ref")]
	git_ref: Option<String>,
	#[serde(default)]
	iat: Option<i64>,
	exp: i64,
	#[serde(default)]
	nbf: Option<i64>,
}

impl IdentityClaims {
	pub fn issuer(&self) -> &str {
		&self.iss
	}

	pub fn audience(&self) -> &Audience {
		&self.aud
	}

	pub fn subject(&self) -> Option<&str> {
		self.sub.as_deref()
	}

	/// `owner/name` of the repository whose workflow requested the token.
	pub fn repository(&self) -> &str {
		&self.repository
	}

	pub fn repository_owner(&self) -> &str {
		&self.repository_owner
	}

	/// The repository name without its owner.
	pub fn repository_name(&self) -> &str {
		self
			.repository
			.split_once('/')
			.map(|(_, name)| name)
			.unwrap_or(&self.repository)
	}

	/// Login of the user that triggered the workflow.
	pub fn actor(&self) -> &str {
		&self.actor
	}

	pub fn run_id(&self) -> Option<&str> {
		self.run_id.as_deref()
	}

	pub fn event_name(&self) -> Option<&str> {
		self.event_name.as_deref()
	}

	pub fn workflow(&self) -> Option<&str> {
		self.workflow.as_deref()
	}

	pub fn git_ref(&self) -> Option<&str> {
		self.git_ref.as_deref()
	}

	pub fn issued_at(&self) -> Option<i64> {
		self.iat
	}

	pub fn expires_at(&self) -> i64 {
		self.exp
	}

	pub fn not_before(&self) -> Option<i64> {
		self.nbf
	}
}

/// Where the issuer's signing keys come from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
	async fn fetch(&self) -> Result<JwkSet, BrokerError>;
}

/// Fetches the key set over HTTPS.
pub struct HttpKeySetSource {
	client: reqwest::Client,
	url: String,
}

impl HttpKeySetSource {
	pub fn new(url: impl Into<String>) -> Result<Self, BrokerError> {
		let client = beacon_common_http::new_client_with_timeout(Duration::from_secs(10))
			.map_err(|e| BrokerError::OidcValidation(format!("failed to build HTTP client: {e}")))?;
		Ok(Self {
			client,
			url: url.into(),
		})
	}
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
	#[instrument(skip(self), fields(url = %self.url))]
	async fn fetch(&self) -> Result<JwkSet, BrokerError> {
		let response = self
			.client
			.get(&self.url)
			.send()
			.await
			.and_then(|r| r.error_for_status())
			.map_err(|e| {
				warn!(error = %e, "Failed to fetch identity provider key set");
				BrokerError::OidcValidation("signing keys unavailable".to_string())
			})?;

		response.json::<JwkSet>().await.map_err(|e| {
			warn!(error = %e, "Identity provider key set is not valid JSON");
			BrokerError::OidcValidation("signing keys unavailable".to_string())
		})
	}
}

struct CachedKeySet {
	keys: HashMap<String, DecodingKey>,
	fetched_at: Instant,
}

/// Verifies identity tokens: RS256 signature from a published key, exact
/// issuer, audience membership, and `exp`/`nbf` within the leeway.
pub struct OidcValidator {
	config: OidcConfig,
	source: Arc<dyn KeySetSource>,
	cache: RwLock<Option<CachedKeySet>>,
}

impl OidcValidator {
	pub fn new(config: OidcConfig, source: Arc<dyn KeySetSource>) -> Self {
		Self {
			config,
			source,
			cache: RwLock::new(None),
		}
	}

	pub fn config(&self) -> &OidcConfig {
		&self.config
	}

	#[instrument(skip(self, token))]
	pub async fn validate(&self, token: &str) -> Result<IdentityClaims, BrokerError> {
		let header = decode_header(token)
			.map_err(|_| BrokerError::OidcValidation("malformed token".to_string()))?;

		if header.alg != Algorithm::RS256 {
			warn!(alg = ?header.alg, "Rejected identity token with unexpected algorithm");
			return Err(BrokerError::OidcValidation(format!(
				"unsupported algorithm {:?}",
				header.alg
			)));
		}

		let kid = header
			.kid
			.ok_or_else(|| BrokerError::OidcValidation("token has no key id".to_string()))?;
		let key = self.decoding_key(&kid).await?;

		let mut validation = Validation::new(Algorithm::RS256);
		validation.set_issuer(&[self.config.issuer.as_str()]);
		validation.set_audience(&[self.config.audience.as_str()]);
		validation.set_required_spec_claims(&["exp", "iss", "aud"]);
		validation.validate_nbf = true;
		validation.leeway = self.config.leeway.as_secs();

		let claims = decode::<IdentityClaims>(token, &key, &validation)
			.map_err(|e| {
				let reason = describe(e.kind());
				warn!(reason, "Identity token failed validation");
				BrokerError::OidcValidation(reason.to_string())
			})?
			.claims;

		match claims.repository.split_once('/') {
			Some((owner, name)) if owner == claims.repository_owner && !name.is_empty() => {}
			_ => {
				warn!(
					repository = %claims.repository,
					repository_owner = %claims.repository_owner,
					"Identity token repository claims are inconsistent"
				);
				return Err(BrokerError::OidcValidation(
					"repository claim does not match repository_owner".to_string(),
				));
			}
		}

		debug!(repository = %claims.repository, actor = %claims.actor, "Validated identity token");
		Ok(claims)
	}

	/// Look up the key for `kid`, refetching the key set when it is stale or
	/// does not know the key (at most once per `min_refresh_interval`).
	async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, BrokerError> {
		{
			let cache = self.cache.read().await;
			if let Some(cached) = cache.as_ref() {
				let fresh = cached.fetched_at.elapsed() < self.config.key_set_ttl;
				if fresh {
					if let Some(key) = cached.keys.get(kid) {
						return Ok(key.clone());
					}
					if cached.fetched_at.elapsed() < self.config.min_refresh_interval {
						warn!(kid, "Identity token signed by unknown key");
						return Err(BrokerError::OidcValidation("unknown signing key".to_string()));
					}
				}
			}
		}

		let mut cache = self.cache.write().await;
		// Another caller may have refreshed while we waited for the lock.
		if let Some(cached) = cache.as_ref() {
			if cached.fetched_at.elapsed() < self.config.min_refresh_interval {
				if let Some(key) = cached.keys.get(kid) {
					return Ok(key.clone());
				}
			}
		}

		let set = self.source.fetch().await?;
		let keys = decoding_keys(&set);
		info!(key_count = keys.len(), "Refreshed identity provider key set");

		let key = keys.get(kid).cloned();
		*cache = Some(CachedKeySet {
			keys,
			fetched_at: Instant::now(),
		});

		key.ok_or_else(|| {
			warn!(kid, "Identity token signed by unknown key");
			BrokerError::OidcValidation("unknown signing key".to_string())
		})
	}
}

fn decoding_keys(set: &JwkSet) -> HashMap<String, DecodingKey> {
	set
		.keys
		.iter()
		.filter_map(|jwk| {
			let kid = jwk.common.key_id.clone()?;
			match DecodingKey::from_jwk(jwk) {
				Ok(key) => Some((kid, key)),
				Err(e) => {
					warn!(kid = %kid, error = %e, "Skipping unusable signing key");
					None
				}
			}
		})
		.collect()
}

fn describe(kind: &ErrorKind) -> &'static str {
	match kind {
		ErrorKind::ExpiredSignature => "token expired",
		ErrorKind::ImmatureSignature => "token not yet valid",
		ErrorKind::InvalidIssuer => "unexpected issuer",
		ErrorKind::InvalidAudience => "unexpected audience",
		ErrorKind::InvalidSignature => "invalid signature",
		ErrorKind::MissingRequiredClaim(_) => "missing required claim",
		ErrorKind::InvalidAlgorithm => "unsupported algorithm",
		ErrorKind::Json(_) => "invalid claims",
		_ => "malformed token",
	}
}
