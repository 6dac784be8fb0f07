// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! `Authorization: Bearer <token>` parsing.

use crate::error::{AuthorizationFailure, BrokerError};

/// Extract the token from an `Authorization` header value.
///
/// A missing or blank header is [`AuthorizationFailure::MissingHeader`];
/// anything other than `Bearer <token>` is
/// [`AuthorizationFailure::MalformedHeader`]. The scheme is matched
/// case-insensitively.
pub fn parse_bearer(header: Option<&str>) -> Result<&str, BrokerError> {
	let header = match header.map(str::trim) {
		Some(h) if !h.is_empty() => h,
		_ => return Err(BrokerError::Authorization(AuthorizationFailure::MissingHeader)),
	};

	let (scheme, token) = header
		.split_once(' ')
		.ok_or(BrokerError::Authorization(AuthorizationFailure::MalformedHeader))?;
	let token = token.trim();

	if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(char::is_whitespace) {
		return Err(BrokerError::Authorization(AuthorizationFailure::MalformedHeader));
	}

	Ok(token)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn failure(header: Option<&str>) -> AuthorizationFailure {
		match parse_bearer(header) {
			Err(BrokerError::Authorization(f)) => f,
			other => panic!("expected authorization failure, got {other:?}"),
		}
	}

	#[test]
	fn accepts_bearer_tokens() {
		assert_eq!(parse_bearer(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
		assert_eq!(parse_bearer(Some("bearer  abc")).unwrap(), "abc");
	}

	#[test]
	fn missing_header() {
		assert_eq!(failure(None), AuthorizationFailure::MissingHeader);
		assert_eq!(failure(Some("   ")), AuthorizationFailure::MissingHeader);
	}

	#[test]
	fn malformed_header() {
		assert_eq!(failure(Some("abc.def.ghi")), AuthorizationFailure::MalformedHeader);
		assert_eq!(failure(Some("Basic dXNlcjpwYXNz")), AuthorizationFailure::MalformedHeader);
		assert_eq!(failure(Some("Bearer ")), AuthorizationFailure::MalformedHeader);
		assert_eq!(failure(Some("Bearer a b")), AuthorizationFailure::MalformedHeader);
	}
}
