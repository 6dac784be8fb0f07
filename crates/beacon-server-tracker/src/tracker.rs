// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The per-repository run state machine.
//!
//! A [`RunTracker`] is not synchronised; [`crate::TrackerHost`] holds each one
//! behind a mutex so that no two operations on the same repository ever
//! interleave.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::error::{Result, TrackerError};
use crate::notify::{render_failure_comment, FailureNotice, Notifier};
use crate::status::RunStatusSource;
use crate::store::TrackerStore;
use crate::types::{
	FinalizeOutcome, FinalizeStatus, RepoKey, RunOutcome, RunStatus, StartTracking, TerminalReason,
	TrackedRun,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_TRACKING_DURATION: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
	pub poll_interval: Duration,
	/// Measured from the run's `created_at`, not from the last poll.
	pub max_tracking_duration: Duration,
}

impl Default for TrackerSettings {
	fn default() -> Self {
		Self {
			poll_interval: DEFAULT_POLL_INTERVAL,
			max_tracking_duration: DEFAULT_MAX_TRACKING_DURATION,
		}
	}
}

/// Collaborators shared by every tracker instance.
#[derive(Clone)]
pub struct TrackerDeps {
	pub store: Arc<dyn TrackerStore>,
	pub status: Arc<dyn RunStatusSource>,
	pub notifier: Arc<dyn Notifier>,
	pub clock: Arc<dyn Clock>,
	pub settings: TrackerSettings,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
	chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}

pub struct RunTracker {
	repo: RepoKey,
	deps: TrackerDeps,
	runs: BTreeMap<u64, TrackedRun>,
	wake_at: Option<DateTime<Utc>>,
}

impl RunTracker {
	pub async fn load(repo: RepoKey, deps: TrackerDeps) -> Result<Self> {
		let state = deps.store.load(&repo).await?;
		debug!(repo = %repo, runs = state.runs.len(), "Loaded tracker state");
		Ok(Self {
			repo,
			deps,
			runs: state.runs,
			wake_at: state.wake_at,
		})
	}

	pub fn repo(&self) -> &RepoKey {
		&self.repo
	}

	pub fn is_tracking(&self, run_id: u64) -> bool {
		self.runs.contains_key(&run_id)
	}

	pub fn runs(&self) -> impl Iterator<Item = &TrackedRun> {
		self.runs.values()
	}

	/// When the next poll is due, if one is pending.
	pub fn wake_at(&self) -> Option<DateTime<Utc>> {
		self.wake_at
	}

	pub async fn outcome(&self, run_id: u64) -> Result<Option<RunOutcome>> {
		self.deps.store.outcome(&self.repo, run_id).await
	}

	/// Record that a run finished without ever being tracked. `false` when
	/// the run is active or already has an outcome.
	pub async fn record_untracked(&self, run_id: u64) -> Result<bool> {
		if self.is_tracking(run_id) {
			return Ok(false);
		}
		self
			.deps
			.store
			.record_outcome(&self.repo, run_id, RunOutcome::NeverTracked)
			.await
	}

	async fn set_alarm(&mut self, wake_at: Option<DateTime<Utc>>) -> Result<()> {
		self.deps.store.set_alarm(&self.repo, wake_at).await?;
		self.wake_at = wake_at;
		Ok(())
	}

	fn next_wake(&self) -> DateTime<Utc> {
		self.deps.clock.now() + chrono_duration(self.deps.settings.poll_interval)
	}

	/// Begin tracking a run. Runs that already reached a terminal state are
	/// refused; re-registering an active run replaces its details but keeps
	/// its original start time.
	#[instrument(skip(self, request), fields(repo = %self.repo, run_id = request.run_id))]
	pub async fn start_tracking(&mut self, request: StartTracking) -> Result<()> {
		if let Some(outcome) = self.outcome(request.run_id).await? {
			warn!(outcome = outcome.as_str(), "Refusing to re-track a finished run");
			return Err(TrackerError::AlreadyFinalized {
				run_id: request.run_id,
			});
		}

		let created_at = match self.runs.get(&request.run_id) {
			Some(existing) => {
				warn!("Run is already tracked, replacing its details");
				existing.created_at
			}
			None => self.deps.clock.now(),
		};

		// A persisted run must never be left without an alarm.
		if self.wake_at.is_none() {
			let wake_at = self.next_wake();
			self.set_alarm(Some(wake_at)).await?;
			debug!(%wake_at, "Armed tracker alarm");
		}

		let run = TrackedRun {
			run_id: request.run_id,
			run_url: request.run_url,
			issue_number: request.issue_number,
			created_at,
			reaction_target: request.reaction_target,
		};
		self.deps.store.upsert_run(&self.repo, &run).await?;
		self.runs.insert(run.run_id, run);

		info!(active_runs = self.runs.len(), "Tracking run");
		Ok(())
	}

	/// One poll cycle. Returns the next wake time, or `None` when nothing is
	/// left to track.
	#[instrument(skip(self), fields(repo = %self.repo))]
	pub async fn on_alarm(&mut self) -> Result<Option<DateTime<Utc>>> {
		self.set_alarm(None).await?;

		let max = chrono_duration(self.deps.settings.max_tracking_duration);
		let run_ids: Vec<u64> = self.runs.keys().copied().collect();

		for run_id in run_ids {
			let Some(run) = self.runs.get(&run_id).cloned() else {
				continue;
			};

			let elapsed = self.deps.clock.now() - run.created_at;
			if elapsed >= max {
				info!(run_id, elapsed_secs = elapsed.num_seconds(), "Run exceeded tracking window");
				self
					.finish(&run, RunOutcome::TimedOut, Some(TerminalReason::TimedOut))
					.await?;
				continue;
			}

			match self.deps.status.fetch(&self.repo, run_id).await {
				Err(e) => {
					warn!(run_id, error = %e, "Failed to fetch run status, will retry");
				}
				Ok(RunStatus::Pending) => {
					debug!(run_id, "Run still in progress");
				}
				Ok(RunStatus::Completed { conclusion }) => {
					let reason = TerminalReason::from_conclusion(&conclusion);
					let outcome = if reason.is_some() {
						RunOutcome::CompletedFailure
					} else {
						RunOutcome::CompletedSuccess
					};
					info!(run_id, conclusion = %conclusion, "Run completed");
					self.finish(&run, outcome, reason).await?;
				}
			}
		}

		if self.runs.is_empty() {
			debug!("No runs left, letting the alarm lapse");
			return Ok(None);
		}

		let wake_at = self.next_wake();
		self.set_alarm(Some(wake_at)).await?;
		Ok(Some(wake_at))
	}

	/// Re-arm after a poll cycle that could not complete.
	pub async fn reschedule(&mut self) -> Result<Option<DateTime<Utc>>> {
		if self.runs.is_empty() {
			self.set_alarm(None).await?;
			return Ok(None);
		}
		let wake_at = self.next_wake();
		self.set_alarm(Some(wake_at)).await?;
		Ok(Some(wake_at))
	}

	/// Explicit completion signal from the run itself.
	#[instrument(skip(self), fields(repo = %self.repo))]
	pub async fn finalize_run(&mut self, run_id: u64, status: FinalizeStatus) -> Result<FinalizeOutcome> {
		let outcome = self.complete_run(run_id, status.failure_reason()).await?;
		if outcome != FinalizeOutcome::AlreadyFinalized {
			info!(status = status.as_str(), "Run finalized");
		}
		Ok(outcome)
	}

	/// Completion observed outside the poll cycle, with the notification
	/// reason already decided. `None` completes the run silently.
	#[instrument(skip(self), fields(repo = %self.repo))]
	pub async fn complete_run(
		&mut self,
		run_id: u64,
		reason: Option<TerminalReason>,
	) -> Result<FinalizeOutcome> {
		let Some(run) = self.runs.get(&run_id).cloned() else {
			debug!("Run is not active, nothing to finalize");
			return Ok(FinalizeOutcome::AlreadyFinalized);
		};

		let notify = reason.is_some();
		if !self
			.finish(&run, RunOutcome::ExternallyFinalized, reason)
			.await?
		{
			return Ok(FinalizeOutcome::AlreadyFinalized);
		}

		if self.runs.is_empty() && self.wake_at.is_some() {
			self.set_alarm(None).await?;
		}

		Ok(FinalizeOutcome::Finalized { notified: notify })
	}

	/// Remove `run` from the active set, then notify if `reason` is set.
	///
	/// The store removal is the single write that decides which caller
	/// notifies; when it reports the run already gone, nothing is sent.
	async fn finish(
		&mut self,
		run: &TrackedRun,
		outcome: RunOutcome,
		reason: Option<TerminalReason>,
	) -> Result<bool> {
		let removed = self
			.deps
			.store
			.remove_run(&self.repo, run.run_id, outcome)
			.await?;
		self.runs.remove(&run.run_id);

		if !removed {
			warn!(run_id = run.run_id, "Run was removed elsewhere, skipping notification");
			return Ok(false);
		}

		if let Some(reason) = reason {
			let notice = FailureNotice {
				issue_number: run.issue_number,
				body: render_failure_comment(&reason, &run.run_url),
				reaction_target: run.reaction_target,
			};
			if let Err(e) = self.deps.notifier.notify(&self.repo, &notice).await {
				error!(
					run_id = run.run_id,
					run_url = %run.run_url,
					error = %e,
					"Failed to deliver failure notification"
				);
			}
		}
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::TokioClock;
	use crate::store::{MemoryTrackerStore, TrackerStore};
	use crate::testing::{RecordingNotifier, ScriptedStatus};
	use crate::types::ReactionTarget;

	struct Fixture {
		store: Arc<MemoryTrackerStore>,
		status: Arc<ScriptedStatus>,
		notifier: Arc<RecordingNotifier>,
		deps: TrackerDeps,
	}

	fn fixture() -> Fixture {
		let store = Arc::new(MemoryTrackerStore::new());
		let status = Arc::new(ScriptedStatus::new());
		let notifier = Arc::new(RecordingNotifier::new());
		let deps = TrackerDeps {
			store: store.clone(),
			status: status.clone(),
			notifier: notifier.clone(),
			clock: Arc::new(TokioClock::default()),
			settings: TrackerSettings::default(),
		};
		Fixture {
			store,
			status,
			notifier,
			deps,
		}
	}

	fn repo() -> RepoKey {
		RepoKey::new("acme", "widgets")
	}

	fn request(run_id: u64) -> StartTracking {
		StartTracking {
			run_id,
			run_url: format!("https://github.com/acme/widgets/actions/runs/{run_id}"),
			issue_number: 5,
			reaction_target: Some(ReactionTarget::Comment(77)),
		}
	}

	async fn tracker(f: &Fixture) -> RunTracker {
		RunTracker::load(repo(), f.deps.clone()).await.unwrap()
	}

	#[tokio::test(start_paused = true)]
	async fn start_tracking_arms_a_single_alarm() {
		let f = fixture();
		let mut t = tracker(&f).await;

		t.start_tracking(request(1)).await.unwrap();
		let first = t.wake_at().unwrap();
		tokio::time::advance(Duration::from_secs(60)).await;
		t.start_tracking(request(2)).await.unwrap();

		assert_eq!(t.wake_at(), Some(first));
		assert_eq!(f.store.load(&repo()).await.unwrap().wake_at, Some(first));
		assert_eq!(t.runs().count(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn duplicate_start_keeps_original_created_at() {
		let f = fixture();
		let mut t = tracker(&f).await;

		t.start_tracking(request(1)).await.unwrap();
		let created = t.runs().next().unwrap().created_at;
		tokio::time::advance(Duration::from_secs(120)).await;

		let mut again = request(1);
		again.issue_number = 9;
		t.start_tracking(again).await.unwrap();

		let run = t.runs().next().unwrap();
		assert_eq!(run.created_at, created);
		assert_eq!(run.issue_number, 9);
	}

	#[tokio::test(start_paused = true)]
	async fn finished_runs_cannot_be_tracked_again() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(1)).await.unwrap();
		t.finalize_run(1, FinalizeStatus::Success).await.unwrap();

		assert!(matches!(
			t.start_tracking(request(1)).await,
			Err(TrackerError::AlreadyFinalized { run_id: 1 })
		));
		assert!(!t.is_tracking(1));
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_fires_at_boundary_never_before() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(1)).await.unwrap();

		tokio::time::advance(DEFAULT_MAX_TRACKING_DURATION - Duration::from_secs(1)).await;
		t.on_alarm().await.unwrap();
		assert!(t.is_tracking(1));
		assert!(f.notifier.notices().is_empty());

		tokio::time::advance(Duration::from_secs(1)).await;
		assert_eq!(t.on_alarm().await.unwrap(), None);
		assert!(!t.is_tracking(1));

		let notices = f.notifier.notices();
		assert_eq!(notices.len(), 1);
		assert_eq!(
			notices[0].1.body,
			render_failure_comment(&TerminalReason::TimedOut, &request(1).run_url)
		);
		assert_eq!(f.store.outcome(&repo(), 1).await.unwrap(), Some(RunOutcome::TimedOut));

		t.on_alarm().await.unwrap();
		assert_eq!(f.notifier.notices().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn successful_completion_is_silent_and_lapses_alarm() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(1)).await.unwrap();
		f.status.complete(1, "success");

		assert_eq!(t.on_alarm().await.unwrap(), None);
		assert!(f.notifier.notices().is_empty());
		assert_eq!(t.wake_at(), None);
		assert_eq!(
			f.store.outcome(&repo(), 1).await.unwrap(),
			Some(RunOutcome::CompletedSuccess)
		);
	}

	#[tokio::test(start_paused = true)]
	async fn failed_completion_notifies_once() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(1)).await.unwrap();
		t.start_tracking(request(2)).await.unwrap();
		f.status.complete(1, "failure");

		let next = t.on_alarm().await.unwrap();
		assert!(next.is_some());
		assert!(t.is_tracking(2));

		let notices = f.notifier.notices();
		assert_eq!(notices.len(), 1);
		assert_eq!(notices[0].1.issue_number, 5);
		assert_eq!(notices[0].1.reaction_target, Some(ReactionTarget::Comment(77)));

		assert_eq!(
			t.finalize_run(1, FinalizeStatus::Failure).await.unwrap(),
			FinalizeOutcome::AlreadyFinalized
		);
		assert_eq!(f.notifier.notices().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn poll_errors_keep_the_run_and_reschedule() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(1)).await.unwrap();
		f.status.fail(1);

		let next = t.on_alarm().await.unwrap().unwrap();
		assert!(t.is_tracking(1));
		assert_eq!(t.wake_at(), Some(next));
		assert!(f.notifier.notices().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn finalize_is_idempotent() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(1)).await.unwrap();

		assert_eq!(
			t.finalize_run(1, FinalizeStatus::Failure).await.unwrap(),
			FinalizeOutcome::Finalized { notified: true }
		);
		assert_eq!(
			t.finalize_run(1, FinalizeStatus::Success).await.unwrap(),
			FinalizeOutcome::AlreadyFinalized
		);
		assert_eq!(f.notifier.notices().len(), 1);
		assert_eq!(t.wake_at(), None);
	}

	#[tokio::test(start_paused = true)]
	async fn finalize_success_and_skipped_are_silent() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(1)).await.unwrap();
		t.start_tracking(request(2)).await.unwrap();

		assert_eq!(
			t.finalize_run(1, FinalizeStatus::Success).await.unwrap(),
			FinalizeOutcome::Finalized { notified: false }
		);
		assert!(t.wake_at().is_some());
		t.finalize_run(2, FinalizeStatus::Skipped).await.unwrap();
		assert!(f.notifier.notices().is_empty());
		assert_eq!(t.wake_at(), None);
	}

	#[tokio::test(start_paused = true)]
	async fn cancelled_finalize_uses_cancelled_message() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(3)).await.unwrap();
		t.finalize_run(3, FinalizeStatus::Cancelled).await.unwrap();

		assert_eq!(
			f.notifier.notices()[0].1.body,
			render_failure_comment(&TerminalReason::Cancelled, &request(3).run_url)
		);
	}

	#[tokio::test(start_paused = true)]
	async fn notification_failure_does_not_re_add() {
		let f = fixture();
		f.notifier.fail_all(true);
		let mut t = tracker(&f).await;
		t.start_tracking(request(1)).await.unwrap();

		t.finalize_run(1, FinalizeStatus::Failure).await.unwrap();
		assert!(!t.is_tracking(1));
		assert_eq!(
			f.store.outcome(&repo(), 1).await.unwrap(),
			Some(RunOutcome::ExternallyFinalized)
		);
	}

	#[tokio::test(start_paused = true)]
	async fn provider_time_limit_is_not_reported_as_tracking_timeout() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(2)).await.unwrap();
		f.status.complete(2, "timed_out");

		t.on_alarm().await.unwrap();
		let notices = f.notifier.notices();
		assert_eq!(notices.len(), 1);
		assert_eq!(
			notices[0].1.body,
			render_failure_comment(&TerminalReason::ExceededTimeLimit, &request(2).run_url)
		);
		assert_eq!(
			f.store.outcome(&repo(), 2).await.unwrap(),
			Some(RunOutcome::CompletedFailure)
		);
	}

	#[tokio::test(start_paused = true)]
	async fn complete_run_uses_the_given_reason() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(4)).await.unwrap();

		assert_eq!(
			t.complete_run(4, Some(TerminalReason::Other("stale".to_string())))
				.await
				.unwrap(),
			FinalizeOutcome::Finalized { notified: true }
		);
		assert_eq!(
			f.notifier.notices()[0].1.body,
			render_failure_comment(&TerminalReason::Other("stale".to_string()), &request(4).run_url)
		);
	}

	/// Delegates to a memory store but refuses to persist alarms.
	struct AlarmlessStore(MemoryTrackerStore);

	#[async_trait::async_trait]
	impl TrackerStore for AlarmlessStore {
		async fn load(&self, repo: &RepoKey) -> Result<crate::store::TrackerState> {
			self.0.load(repo).await
		}

		async fn upsert_run(&self, repo: &RepoKey, run: &TrackedRun) -> Result<()> {
			self.0.upsert_run(repo, run).await
		}

		async fn remove_run(&self, repo: &RepoKey, run_id: u64, outcome: RunOutcome) -> Result<bool> {
			self.0.remove_run(repo, run_id, outcome).await
		}

		async fn outcome(&self, repo: &RepoKey, run_id: u64) -> Result<Option<RunOutcome>> {
			self.0.outcome(repo, run_id).await
		}

		async fn record_outcome(&self, repo: &RepoKey, run_id: u64, outcome: RunOutcome) -> Result<bool> {
			self.0.record_outcome(repo, run_id, outcome).await
		}

		async fn purge_outcomes(&self, before: DateTime<Utc>) -> Result<u64> {
			self.0.purge_outcomes(before).await
		}

		async fn set_alarm(&self, _repo: &RepoKey, _wake_at: Option<DateTime<Utc>>) -> Result<()> {
			Err(TrackerError::Store("alarm table unavailable".to_string()))
		}

		async fn pending_repos(&self) -> Result<Vec<(RepoKey, Option<DateTime<Utc>>)>> {
			self.0.pending_repos().await
		}
	}

	#[tokio::test(start_paused = true)]
	async fn failed_alarm_write_leaves_no_orphaned_run() {
		let f = fixture();
		let store = Arc::new(AlarmlessStore(MemoryTrackerStore::new()));
		let deps = TrackerDeps {
			store: store.clone(),
			..f.deps.clone()
		};
		let mut t = RunTracker::load(repo(), deps).await.unwrap();

		assert!(matches!(
			t.start_tracking(request(1)).await,
			Err(TrackerError::Store(_))
		));
		assert!(!t.is_tracking(1));
		assert!(store.load(&repo()).await.unwrap().runs.is_empty());
		assert!(store.pending_repos().await.unwrap().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn state_survives_reload() {
		let f = fixture();
		let mut t = tracker(&f).await;
		t.start_tracking(request(1)).await.unwrap();
		let wake = t.wake_at();
		drop(t);

		let reloaded = tracker(&f).await;
		assert!(reloaded.is_tracking(1));
		assert_eq!(reloaded.wake_at(), wake);
	}
}
