// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Webhook signature verification for GitHub App webhooks.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::GithubAppError;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

/// Verify the `X-Hub-Signature-256` header (`sha256=<hex>`) against the raw
/// request body. The comparison is constant time.
pub fn verify_webhook_signature(
	secret: &str,
	signature_header: &str,
	body: &[u8],
) -> Result<(), GithubAppError> {
	let Some(expected_hex) = signature_header.strip_prefix(PREFIX) else {
		warn!("Invalid webhook signature format: missing 'sha256=' prefix");
		return Err(GithubAppError::InvalidWebhookSignature);
	};

	let expected = hex::decode(expected_hex).map_err(|_| {
		warn!("Webhook signature is not valid hex");
		GithubAppError::InvalidWebhookSignature
	})?;

	let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
		.map_err(|_| GithubAppError::InvalidWebhookSignature)?;
	mac.update(body);

	if mac.verify_slice(&expected).is_ok() {
		debug!("Webhook signature verified successfully");
		Ok(())
	} else {
		warn!("Webhook signature verification failed");
		Err(GithubAppError::InvalidWebhookSignature)
	}
}

/// Compute the header value GitHub would send for `body`.
pub fn compute_webhook_signature(secret: &str, body: &[u8]) -> String {
	let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
		Ok(mac) => mac,
		Err(_) => return String::new(),
	};
	mac.update(body);
	format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}
