// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Environment variable helpers for loading secrets.
//!
//! Supports the `*_FILE` convention used by Docker and Kubernetes secret
//! mounts alongside plain environment variables.

use std::path::PathBuf;
use std::{env, fs};

use thiserror::Error;

use crate::Secret;

#[derive(Debug, Error)]
pub enum SecretEnvError {
	#[error("failed to read secret file at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("secret file path in {var} is empty")]
	EmptyPath { var: String },
}

/// Load a secret using the `VAR` / `VAR_FILE` convention.
///
/// `{var}_FILE` wins over `{var}`. A single trailing newline is stripped
/// from file contents. Returns `Ok(None)` when neither is set.
pub fn load_secret_env(var: &str) -> Result<Option<Secret<String>>, SecretEnvError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path_str) = env::var(&file_var) {
		if path_str.is_empty() {
			return Err(SecretEnvError::EmptyPath { var: file_var });
		}

		let path = PathBuf::from(&path_str);
		let content = fs::read_to_string(&path).map_err(|source| SecretEnvError::Io {
			path: path.clone(),
			source,
		})?;

		let secret = content.strip_suffix('\n').unwrap_or(&content).to_string();
		return Ok(Some(Secret::new(secret)));
	}

	Ok(env::var(var).ok().map(Secret::new))
}
