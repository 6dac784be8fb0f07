// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Failure comments posted back to the originating conversation.

use std::sync::Arc;

use async_trait::async_trait;
use beacon_server_broker::CredentialBroker;
use beacon_server_github_app::{GithubAppClient, ReactionContent};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::types::{ReactionTarget, RepoKey, TerminalReason};

/// A comment to post for a run that ended badly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNotice {
	pub issue_number: u64,
	pub body: String,
	pub reaction_target: Option<ReactionTarget>,
}

pub fn render_failure_comment(reason: &TerminalReason, run_url: &str) -> String {
	match reason {
		TerminalReason::TimedOut => format!(
			"⏱️ The workflow run did not report back in time and is no longer being tracked. \
			 It may still be running or may have stalled. [View the run]({run_url})"
		),
		TerminalReason::ExceededTimeLimit => format!(
			"⏱️ The workflow run hit its time limit and was stopped before it finished. \
			 [View the run]({run_url})"
		),
		TerminalReason::Failed => format!(
			"❌ The workflow run failed. Check the logs for details. [View the run]({run_url})"
		),
		TerminalReason::Cancelled => format!(
			"🚫 The workflow run was cancelled before it finished. [View the run]({run_url})"
		),
		TerminalReason::Other(conclusion) => format!(
			"⚠️ The workflow run ended with an unexpected result (`{conclusion}`). \
			 [View the run]({run_url})"
		),
	}
}

/// Fallback for failures of runs that were never tracked, where the context
/// of the original request may be missing.
pub fn render_untracked_failure_comment(run_url: &str, conclusion: &str) -> String {
	format!(
		"❌ A workflow run for this conversation ended with `{conclusion}` before it could report \
		 back. [View the run]({run_url})"
	)
}

#[async_trait]
pub trait Notifier: Send + Sync {
	async fn notify(&self, repo: &RepoKey, notice: &FailureNotice) -> Result<()>;
}

/// Posts notices with a freshly minted installation token.
pub struct GithubNotifier {
	broker: Arc<CredentialBroker>,
	client: Arc<GithubAppClient>,
}

impl GithubNotifier {
	pub fn new(broker: Arc<CredentialBroker>, client: Arc<GithubAppClient>) -> Self {
		Self { broker, client }
	}
}

#[async_trait]
impl Notifier for GithubNotifier {
	#[instrument(skip(self, notice), fields(repo = %repo, issue_number = notice.issue_number))]
	async fn notify(&self, repo: &RepoKey, notice: &FailureNotice) -> Result<()> {
		let token = self
			.broker
			.installation_token_for(&repo.owner, &repo.repo)
			.await?;

		let comment = self
			.client
			.create_issue_comment(
				token.token.expose(),
				&repo.owner,
				&repo.repo,
				notice.issue_number,
				&notice.body,
			)
			.await?;
		info!(comment_id = comment.id, "Posted failure comment");

		if let Some(target) = notice.reaction_target {
			if let Err(e) = self
				.client
				.create_reaction(
					token.token.expose(),
					&repo.owner,
					&repo.repo,
					target.into(),
					ReactionContent::Confused,
				)
				.await
			{
				warn!(error = %e, "Failed to add failure reaction");
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const RUN: &str = "https://github.com/acme/widgets/actions/runs/42";

	#[test]
	fn every_reason_links_the_run() {
		for reason in [
			TerminalReason::TimedOut,
			TerminalReason::ExceededTimeLimit,
			TerminalReason::Failed,
			TerminalReason::Cancelled,
			TerminalReason::Other("action_required".to_string()),
		] {
			assert!(render_failure_comment(&reason, RUN).contains(&format!("]({RUN})")));
		}
		assert!(render_untracked_failure_comment(RUN, "failure").contains(RUN));
	}

	#[test]
	fn reasons_have_distinct_messages() {
		let bodies: std::collections::HashSet<_> = [
			TerminalReason::TimedOut,
			TerminalReason::ExceededTimeLimit,
			TerminalReason::Failed,
			TerminalReason::Cancelled,
			TerminalReason::Other("stale".to_string()),
		]
		.iter()
		.map(|r| render_failure_comment(r, RUN))
		.collect();
		assert_eq!(bodies.len(), 5);
	}

	#[test]
	fn finished_runs_are_not_described_as_still_running() {
		for reason in [TerminalReason::ExceededTimeLimit, TerminalReason::Failed] {
			let body = render_failure_comment(&reason, RUN);
			assert!(!body.contains("may still be running"));
			assert!(!body.contains("before it could report back"));
		}
		assert!(render_failure_comment(&TerminalReason::TimedOut, RUN).contains("may still be running"));
	}

	#[test]
	fn other_reason_names_the_conclusion() {
		let body = render_failure_comment(&TerminalReason::Other("startup_failure".into()), RUN);
		assert!(body.contains("`startup_failure`"));
	}
}
