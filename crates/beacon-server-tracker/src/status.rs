// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use beacon_server_broker::CredentialBroker;
use beacon_server_github_app::GithubAppClient;
use tracing::instrument;

use crate::error::Result;
use crate::types::{RepoKey, RunStatus};

/// Where the tracker learns whether a run has completed.
#[async_trait]
pub trait RunStatusSource: Send + Sync {
	async fn fetch(&self, repo: &RepoKey, run_id: u64) -> Result<RunStatus>;
}

pub struct GithubRunStatusSource {
	broker: Arc<CredentialBroker>,
	client: Arc<GithubAppClient>,
}

impl GithubRunStatusSource {
	pub fn new(broker: Arc<CredentialBroker>, client: Arc<GithubAppClient>) -> Self {
		Self { broker, client }
	}
}

#[async_trait]
impl RunStatusSource for GithubRunStatusSource {
	#[instrument(skip(self), fields(repo = %repo))]
	async fn fetch(&self, repo: &RepoKey, run_id: u64) -> Result<RunStatus> {
		let token = self
			.broker
			.installation_token_for(&repo.owner, &repo.repo)
			.await?;
		let run = self
			.client
			.get_workflow_run(token.token.expose(), &repo.owner, &repo.repo, run_id)
			.await?;

		Ok(match (run.is_completed(), run.conclusion) {
			(true, Some(conclusion)) => RunStatus::Completed { conclusion },
			(true, None) => RunStatus::Completed {
				conclusion: "unknown".to_string(),
			},
			(false, _) => RunStatus::Pending,
		})
	}
}
