// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use beacon_server_broker::BrokerError;
use beacon_server_db::DbError;
use beacon_server_github_app::GithubAppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
	#[error("Run {run_id} already reached a terminal state")]
	AlreadyFinalized { run_id: u64 },

	#[error("Invalid input: {0}")]
	Invalid(String),

	#[error("Tracker store error: {0}")]
	Store(String),

	#[error("Credential error: {0}")]
	Broker(#[from] BrokerError),

	#[error("GitHub API error: {0}")]
	GitHub(#[from] GithubAppError),
}

impl From<DbError> for TrackerError {
	fn from(err: DbError) -> Self {
		TrackerError::Store(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, TrackerError>;
