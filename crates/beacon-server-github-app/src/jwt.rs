// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! App JWT generation for authenticating as the GitHub App itself.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::GithubAppError;

/// GitHub rejects app JWTs that live longer than ten minutes.
pub const JWT_VALIDITY_SECS: u64 = 9 * 60;

/// Backdated to tolerate clock drift between us and GitHub.
const CLOCK_DRIFT_SECS: u64 = 60;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AppClaims {
	pub(crate) iat: u64,
	pub(crate) exp: u64,
	pub(crate) iss: String,
}

/// A signed app JWT and its expiry in seconds since the epoch.
pub struct AppJwt {
	pub token: String,
	pub expires_at: u64,
}

impl std::fmt::Debug for AppJwt {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AppJwt")
			.field("token", &beacon_common_config::REDACTED)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Sign an RS256 JWT identifying the app (`iss` = app id).
#[instrument(skip(private_key_pem))]
pub fn generate_app_jwt(app_id: u64, private_key_pem: &str) -> Result<AppJwt, GithubAppError> {
	let now = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map_err(|e| GithubAppError::Jwt(format!("System time error: {e}")))?
		.as_secs();

	let claims = AppClaims {
		iat: now.saturating_sub(CLOCK_DRIFT_SECS),
		exp: now + JWT_VALIDITY_SECS,
		iss: app_id.to_string(),
	};

	let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
		.map_err(|e| GithubAppError::Jwt(format!("Invalid RSA private key: {e}")))?;

	let token = encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
		.map_err(|e| GithubAppError::Jwt(format!("Failed to encode JWT: {e}")))?;

	debug!(app_id, exp = claims.exp, "Generated GitHub App JWT");

	Ok(AppJwt {
		token,
		expires_at: claims.exp,
	})
}
