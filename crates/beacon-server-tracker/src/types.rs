// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::fmt;
use std::str::FromStr;

use beacon_server_github_app::ReactionSubject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// The repository a tracker instance is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoKey {
	pub owner: String,
	pub repo: String,
}

impl RepoKey {
	pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
		Self {
			owner: owner.into(),
			repo: repo.into(),
		}
	}

	/// Parse `owner/repo`.
	pub fn parse(full_name: &str) -> Option<Self> {
		let (owner, repo) = full_name.split_once('/')?;
		if owner.is_empty() || repo.is_empty() || repo.contains('/') {
			return None;
		}
		Some(Self::new(owner, repo))
	}
}

impl fmt::Display for RepoKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.owner, self.repo)
	}
}

/// What gets a reaction when a tracked run fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ReactionTarget {
	Comment(u64),
	Issue(u64),
}

impl From<ReactionTarget> for ReactionSubject {
	fn from(target: ReactionTarget) -> Self {
		match target {
			ReactionTarget::Comment(id) => ReactionSubject::IssueComment(id),
			ReactionTarget::Issue(number) => ReactionSubject::Issue(number),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRun {
	pub run_id: u64,
	pub run_url: String,
	/// Issue or pull request to comment on.
	pub issue_number: u64,
	pub created_at: DateTime<Utc>,
	pub reaction_target: Option<ReactionTarget>,
}

/// Input to `start_tracking`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartTracking {
	pub run_id: u64,
	pub run_url: String,
	pub issue_number: u64,
	#[serde(default)]
	pub reaction_target: Option<ReactionTarget>,
}

/// Status reported by a run's own completion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeStatus {
	Success,
	Failure,
	Cancelled,
	Skipped,
}

impl FinalizeStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			FinalizeStatus::Success => "success",
			FinalizeStatus::Failure => "failure",
			FinalizeStatus::Cancelled => "cancelled",
			FinalizeStatus::Skipped => "skipped",
		}
	}

	/// The notification reason, or `None` when the status is silent.
	pub fn failure_reason(&self) -> Option<TerminalReason> {
		match self {
			FinalizeStatus::Success | FinalizeStatus::Skipped => None,
			FinalizeStatus::Failure => Some(TerminalReason::Failed),
			FinalizeStatus::Cancelled => Some(TerminalReason::Cancelled),
		}
	}
}

impl FromStr for FinalizeStatus {
	type Err = TrackerError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"success" => Ok(FinalizeStatus::Success),
			"failure" => Ok(FinalizeStatus::Failure),
			"cancelled" => Ok(FinalizeStatus::Cancelled),
			"skipped" => Ok(FinalizeStatus::Skipped),
			other => Err(TrackerError::Invalid(format!("unknown run status '{other}'"))),
		}
	}
}

/// Why a run's failure notification is being sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
	/// The run never reported back within the tracking window.
	TimedOut,
	/// The CI provider stopped the run at its own time limit.
	ExceededTimeLimit,
	Failed,
	Cancelled,
	Other(String),
}

impl TerminalReason {
	/// Map a GitHub Actions conclusion. `None` for conclusions that are not
	/// failures.
	pub fn from_conclusion(conclusion: &str) -> Option<Self> {
		match conclusion {
			"success" | "skipped" | "neutral" => None,
			"failure" | "startup_failure" => Some(TerminalReason::Failed),
			"cancelled" => Some(TerminalReason::Cancelled),
			"timed_out" => Some(TerminalReason::ExceededTimeLimit),
			other => Some(TerminalReason::Other(other.to_string())),
		}
	}
}

/// Observed state of a run at the CI provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
	Pending,
	Completed { conclusion: String },
}

/// How a run left the active set. Recorded so it is never tracked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
	CompletedSuccess,
	CompletedFailure,
	TimedOut,
	ExternallyFinalized,
	NeverTracked,
}

impl RunOutcome {
	pub fn as_str(&self) -> &'static str {
		match self {
			RunOutcome::CompletedSuccess => "completed_success",
			RunOutcome::CompletedFailure => "completed_failure",
			RunOutcome::TimedOut => "timed_out",
			RunOutcome::ExternallyFinalized => "externally_finalized",
			RunOutcome::NeverTracked => "never_tracked",
		}
	}
}

impl FromStr for RunOutcome {
	type Err = TrackerError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"completed_success" => Ok(RunOutcome::CompletedSuccess),
			"completed_failure" => Ok(RunOutcome::CompletedFailure),
			"timed_out" => Ok(RunOutcome::TimedOut),
			"externally_finalized" => Ok(RunOutcome::ExternallyFinalized),
			"never_tracked" => Ok(RunOutcome::NeverTracked),
			other => Err(TrackerError::Store(format!("unknown run outcome '{other}'"))),
		}
	}
}

/// Result of `finalize_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
	Finalized { notified: bool },
	/// The run was not active; nothing happened.
	AlreadyFinalized,
}
