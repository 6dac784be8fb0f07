// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

pub mod health;
pub mod installation;
pub mod runs;
pub mod token;
pub mod webhooks;

use axum::{
	body::Bytes,
	http::{header::AUTHORIZATION, HeaderMap},
};
use serde::de::DeserializeOwned;

use crate::error::ServerError;

pub(crate) fn authorization(headers: &HeaderMap) -> Option<&str> {
	headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ServerError> {
	serde_json::from_slice(body).map_err(|e| ServerError::BadRequest(format!("Invalid JSON body: {e}")))
}

/// Like [`parse_json`], but an empty body yields `T::default()`.
pub(crate) fn parse_optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ServerError> {
	if body.iter().all(u8::is_ascii_whitespace) {
		return Ok(T::default());
	}
	parse_json(body)
}
