// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Reacts to `workflow_run` completion events from GitHub.
//!
//! Tracked runs are finalized through their tracker, so whichever of the
//! event, the poll cycle or the run's own finalize call arrives first wins.
//! Failed runs that were never tracked still get a best-effort comment on
//! whatever conversation can be recovered from the event, but only when a
//! workflow name is configured and the run belongs to that workflow.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, TrackerError};
use crate::host::{CompletionClaim, TrackerHost};
use crate::notify::{render_untracked_failure_comment, FailureNotice, Notifier};
use crate::types::{FinalizeOutcome, RepoKey, TerminalReason};

/// Conclusions that warrant a comment even for untracked runs.
const FAILURE_CONCLUSIONS: &[&str] = &[
	"failure",
	"cancelled",
	"timed_out",
	"startup_failure",
	"action_required",
];

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunEvent {
	pub action: String,
	pub workflow_run: WorkflowRunPayload,
	pub repository: RepositoryPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunPayload {
	pub id: u64,
	#[serde(default)]
	pub name: Option<String>,
	pub html_url: String,
	#[serde(default)]
	pub conclusion: Option<String>,
	#[serde(default)]
	pub display_title: Option<String>,
	#[serde(default)]
	pub pull_requests: Vec<PullRequestRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRef {
	pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryPayload {
	pub full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyNetAction {
	/// Not a completion, or not the workflow being watched.
	Ignored,
	/// The run was tracked and has been finalized.
	Finalized(FinalizeOutcome),
	/// The run already reached a terminal state elsewhere.
	AlreadyHandled,
	/// A never-tracked failure was reported on this conversation.
	Notified { issue_number: u64 },
	/// A never-tracked failure with no conversation to report it on.
	Unrecoverable,
}

/// First `#N` reference in `title`.
fn issue_reference(title: &str) -> Option<u64> {
	let mut rest = title;
	while let Some(pos) = rest.find('#') {
		rest = &rest[pos + 1..];
		let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
		if let Ok(number) = digits.parse::<u64>() {
			if number > 0 {
				return Some(number);
			}
		}
	}
	None
}

/// The conversation a run belongs to, best effort.
pub fn recover_issue_number(run: &WorkflowRunPayload) -> Option<u64> {
	run
		.pull_requests
		.first()
		.map(|pr| pr.number)
		.or_else(|| run.display_title.as_deref().and_then(issue_reference))
}

pub struct SafetyNet {
	host: TrackerHost,
	notifier: Arc<dyn Notifier>,
	workflow_name: Option<String>,
}

impl SafetyNet {
	/// Without [`SafetyNet::with_workflow_name`] only runs that are already
	/// tracked are handled; untracked failures are ignored.
	pub fn new(host: TrackerHost, notifier: Arc<dyn Notifier>) -> Self {
		Self {
			host,
			notifier,
			workflow_name: None,
		}
	}

	/// Only act on runs of the workflow with this name.
	pub fn with_workflow_name(mut self, name: impl Into<String>) -> Self {
		self.workflow_name = Some(name.into());
		self
	}

	#[instrument(skip(self, event), fields(run_id = event.workflow_run.id, repo = %event.repository.full_name))]
	pub async fn handle_workflow_run(&self, event: &WorkflowRunEvent) -> Result<SafetyNetAction> {
		if event.action != "completed" {
			debug!(action = %event.action, "Ignoring non-completion workflow_run event");
			return Ok(SafetyNetAction::Ignored);
		}

		let run = &event.workflow_run;
		if let Some(expected) = &self.workflow_name {
			if run.name.as_deref() != Some(expected.as_str()) {
				debug!(workflow = ?run.name, "Ignoring run of another workflow");
				return Ok(SafetyNetAction::Ignored);
			}
		}

		let repo = RepoKey::parse(&event.repository.full_name).ok_or_else(|| {
			TrackerError::Invalid(format!(
				"invalid repository name '{}'",
				event.repository.full_name
			))
		})?;
		let conclusion = run.conclusion.as_deref().unwrap_or("unknown");
		let report_untracked =
			self.workflow_name.is_some() && FAILURE_CONCLUSIONS.contains(&conclusion);

		let claim = self
			.host
			.claim_completion(
				&repo,
				run.id,
				TerminalReason::from_conclusion(conclusion),
				report_untracked,
			)
			.await?;

		match claim {
			CompletionClaim::Finalized(outcome) => {
				info!(conclusion, "Finalized tracked run from completion event");
				Ok(SafetyNetAction::Finalized(outcome))
			}
			CompletionClaim::AlreadyRecorded => Ok(SafetyNetAction::AlreadyHandled),
			CompletionClaim::Ignored => {
				debug!(conclusion, "Run is not tracked, ignoring");
				Ok(SafetyNetAction::Ignored)
			}
			CompletionClaim::Recorded => {
				let Some(issue_number) = recover_issue_number(run) else {
					error!(
						run_url = %run.html_url,
						conclusion,
						"Untracked run failed and no conversation could be recovered"
					);
					return Ok(SafetyNetAction::Unrecoverable);
				};

				warn!(issue_number, conclusion, "Reporting failure of untracked run");
				let notice = FailureNotice {
					issue_number,
					body: render_untracked_failure_comment(&run.html_url, conclusion),
					reaction_target: None,
				};
				if let Err(e) = self.notifier.notify(&repo, &notice).await {
					error!(run_url = %run.html_url, error = %e, "Failed to report untracked run failure");
				}
				Ok(SafetyNetAction::Notified { issue_number })
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::TokioClock;
	use crate::notify::render_failure_comment;
	use crate::store::{MemoryTrackerStore, TrackerStore};
	use crate::testing::{RecordingNotifier, ScriptedStatus};
	use crate::tracker::{TrackerDeps, TrackerSettings};
	use crate::types::{RunOutcome, StartTracking};
	use serde_json::json;

	struct Fixture {
		store: Arc<MemoryTrackerStore>,
		notifier: Arc<RecordingNotifier>,
		host: TrackerHost,
	}

	fn fixture() -> Fixture {
		let store = Arc::new(MemoryTrackerStore::new());
		let notifier = Arc::new(RecordingNotifier::new());
		let host = TrackerHost::new(TrackerDeps {
			store: store.clone(),
			status: Arc::new(ScriptedStatus::new()),
			notifier: notifier.clone(),
			clock: Arc::new(TokioClock::default()),
			settings: TrackerSettings::default(),
		});
		Fixture {
			store,
			notifier,
			host,
		}
	}

	fn event(run_id: u64, conclusion: &str, extra: serde_json::Value) -> WorkflowRunEvent {
		let mut run = json!({
			"id": run_id,
			"name": "beacon",
			"html_url": format!("https://github.com/acme/widgets/actions/runs/{run_id}"),
			"status": "completed",
			"conclusion": conclusion,
			"display_title": "Beacon run",
			"pull_requests": [],
		});
		if let (Some(run), Some(extra)) = (run.as_object_mut(), extra.as_object()) {
			for (k, v) in extra {
				run.insert(k.clone(), v.clone());
			}
		}
		serde_json::from_value(json!({
			"action": "completed",
			"workflow_run": run,
			"repository": { "full_name": "acme/widgets" },
		}))
		.unwrap()
	}

	fn repo() -> RepoKey {
		RepoKey::new("acme", "widgets")
	}

	#[test]
	fn issue_reference_parsing() {
		assert_eq!(issue_reference("Fix #42 please"), Some(42));
		assert_eq!(issue_reference("# and #0 then #7"), Some(7));
		assert_eq!(issue_reference("no refs"), None);
	}

	#[tokio::test(start_paused = true)]
	async fn tracked_run_is_finalized() {
		let f = fixture();
		f.host
			.start_tracking(
				&repo(),
				StartTracking {
					run_id: 5,
					run_url: "https://github.com/acme/widgets/actions/runs/5".into(),
					issue_number: 11,
					reaction_target: None,
				},
			)
			.await
			.unwrap();
		let net = SafetyNet::new(f.host.clone(), f.notifier.clone());

		let action = net
			.handle_workflow_run(&event(5, "failure", json!({})))
			.await
			.unwrap();
		assert_eq!(
			action,
			SafetyNetAction::Finalized(FinalizeOutcome::Finalized { notified: true })
		);

		let notices = f.notifier.notices();
		assert_eq!(notices.len(), 1);
		assert_eq!(notices[0].1.issue_number, 11);
		assert_eq!(
			notices[0].1.body,
			render_failure_comment(
				&TerminalReason::Failed,
				"https://github.com/acme/widgets/actions/runs/5"
			)
		);

		let again = net
			.handle_workflow_run(&event(5, "failure", json!({})))
			.await
			.unwrap();
		assert_eq!(again, SafetyNetAction::AlreadyHandled);
		assert_eq!(f.notifier.notices().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn untracked_failure_uses_pull_request_then_title() {
		let f = fixture();
		let net = SafetyNet::new(f.host.clone(), f.notifier.clone()).with_workflow_name("beacon");

		let action = net
			.handle_workflow_run(&event(6, "failure", json!({"pull_requests": [{"number": 31}]})))
			.await
			.unwrap();
		assert_eq!(action, SafetyNetAction::Notified { issue_number: 31 });

		let action = net
			.handle_workflow_run(&event(7, "timed_out", json!({"display_title": "Beacon for #19"})))
			.await
			.unwrap();
		assert_eq!(action, SafetyNetAction::Notified { issue_number: 19 });

		let notices = f.notifier.notices();
		assert_eq!(notices.len(), 2);
		assert_eq!(
			notices[1].1.body,
			render_untracked_failure_comment(
				"https://github.com/acme/widgets/actions/runs/7",
				"timed_out"
			)
		);
		assert_eq!(
			f.store.outcome(&repo(), 6).await.unwrap(),
			Some(RunOutcome::NeverTracked)
		);

		// Redelivery of the same event does not comment twice.
		net.handle_workflow_run(&event(6, "failure", json!({"pull_requests": [{"number": 31}]})))
			.await
			.unwrap();
		assert_eq!(f.notifier.notices().len(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn untracked_failure_without_conversation_is_recorded() {
		let f = fixture();
		let net = SafetyNet::new(f.host.clone(), f.notifier.clone()).with_workflow_name("beacon");

		let action = net
			.handle_workflow_run(&event(8, "failure", json!({})))
			.await
			.unwrap();
		assert_eq!(action, SafetyNetAction::Unrecoverable);
		assert!(f.notifier.notices().is_empty());
		assert_eq!(
			f.store.outcome(&repo(), 8).await.unwrap(),
			Some(RunOutcome::NeverTracked)
		);
	}

	#[tokio::test(start_paused = true)]
	async fn unfiltered_net_ignores_unrelated_failures() {
		let f = fixture();
		let net = SafetyNet::new(f.host.clone(), f.notifier.clone());

		let action = net
			.handle_workflow_run(&event(
				12,
				"failure",
				json!({"name": "CI / lint", "pull_requests": [{"number": 3}]}),
			))
			.await
			.unwrap();
		assert_eq!(action, SafetyNetAction::Ignored);
		assert!(f.notifier.notices().is_empty());
		assert_eq!(f.store.outcome(&repo(), 12).await.unwrap(), None);
	}

	#[tokio::test(start_paused = true)]
	async fn tracked_time_limit_matches_poll_wording() {
		let f = fixture();
		f.host
			.start_tracking(
				&repo(),
				StartTracking {
					run_id: 13,
					run_url: "https://github.com/acme/widgets/actions/runs/13".into(),
					issue_number: 4,
					reaction_target: None,
				},
			)
			.await
			.unwrap();
		let net = SafetyNet::new(f.host.clone(), f.notifier.clone());

		net.handle_workflow_run(&event(13, "timed_out", json!({})))
			.await
			.unwrap();
		net.handle_workflow_run(&event(14, "stale", json!({})))
			.await
			.unwrap();

		let notices = f.notifier.notices();
		assert_eq!(notices.len(), 1);
		assert_eq!(
			notices[0].1.body,
			render_failure_comment(
				&TerminalReason::ExceededTimeLimit,
				"https://github.com/acme/widgets/actions/runs/13"
			)
		);
	}

	#[tokio::test(start_paused = true)]
	async fn untracked_success_and_other_events_are_ignored() {
		let f = fixture();
		let net = SafetyNet::new(f.host.clone(), f.notifier.clone()).with_workflow_name("beacon");

		assert_eq!(
			net.handle_workflow_run(&event(9, "success", json!({"pull_requests": [{"number": 2}]})))
				.await
				.unwrap(),
			SafetyNetAction::Ignored
		);
		assert_eq!(
			net.handle_workflow_run(&event(10, "failure", json!({"name": "ci"})))
				.await
				.unwrap(),
			SafetyNetAction::Ignored
		);

		let mut requested = event(11, "failure", json!({}));
		requested.action = "requested".to_string();
		assert_eq!(
			net.handle_workflow_run(&requested).await.unwrap(),
			SafetyNetAction::Ignored
		);

		assert!(f.notifier.notices().is_empty());
		assert_eq!(f.store.outcome(&repo(), 9).await.unwrap(), None);
	}
}
