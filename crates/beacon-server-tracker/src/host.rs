// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Hosts one [`RunTracker`] per repository and drives their alarms.
//!
//! Each tracker lives behind its own `tokio::sync::Mutex` and every operation
//! holds that lock from start to finish, network calls included. Alarms are
//! tokio tasks, at most one per repository, that sleep until the persisted
//! wake time and then run a poll cycle under the same lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::tracker::{RunTracker, TrackerDeps};
use crate::types::{FinalizeOutcome, FinalizeStatus, RepoKey, StartTracking, TerminalReason};

/// What [`TrackerHost::claim_completion`] did with a completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionClaim {
	/// The run was active and has been finalized through the tracker.
	Finalized(FinalizeOutcome),
	/// The run already has a recorded outcome.
	AlreadyRecorded,
	/// The run was never tracked; `NeverTracked` is now recorded for it.
	Recorded,
	/// The run was never tracked and nothing was recorded.
	Ignored,
}

struct Alarm {
	id: u64,
	wake_at: DateTime<Utc>,
	handle: JoinHandle<()>,
}

struct HostInner {
	deps: TrackerDeps,
	trackers: Mutex<HashMap<RepoKey, Arc<Mutex<RunTracker>>>>,
	alarms: std::sync::Mutex<HashMap<RepoKey, Alarm>>,
	next_alarm_id: AtomicU64,
	shutdown_tx: broadcast::Sender<()>,
	shut_down: AtomicBool,
}

#[derive(Clone)]
pub struct TrackerHost {
	inner: Arc<HostInner>,
}

impl TrackerHost {
	pub fn new(deps: TrackerDeps) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			inner: Arc::new(HostInner {
				deps,
				trackers: Mutex::new(HashMap::new()),
				alarms: std::sync::Mutex::new(HashMap::new()),
				next_alarm_id: AtomicU64::new(1),
				shutdown_tx,
				shut_down: AtomicBool::new(false),
			}),
		}
	}

	/// Number of repositories with a tracker loaded in memory.
	pub async fn resident_trackers(&self) -> usize {
		self.inner.trackers.lock().await.len()
	}

	async fn tracker(&self, repo: &RepoKey) -> Result<Arc<Mutex<RunTracker>>> {
		let mut trackers = self.inner.trackers.lock().await;
		if let Some(tracker) = trackers.get(repo) {
			return Ok(Arc::clone(tracker));
		}
		let tracker = Arc::new(Mutex::new(
			RunTracker::load(repo.clone(), self.inner.deps.clone()).await?,
		));
		trackers.insert(repo.clone(), Arc::clone(&tracker));
		Ok(tracker)
	}

	/// Unload `repo`'s tracker once it has no runs, no alarm and no other
	/// holder. Clones of a tracker are only taken under the map lock, so a
	/// strong count of one here means nobody is using or waiting on it.
	async fn evict_if_idle(&self, repo: &RepoKey) {
		let mut trackers = self.inner.trackers.lock().await;
		let idle = match trackers.get(repo) {
			Some(tracker) if Arc::strong_count(tracker) == 1 => match tracker.try_lock() {
				Ok(tracker) => tracker.runs().next().is_none() && tracker.wake_at().is_none(),
				Err(_) => false,
			},
			_ => false,
		};
		if idle {
			trackers.remove(repo);
			debug!(repo = %repo, "Unloaded idle tracker");
		}
	}

	#[instrument(skip(self, request), fields(repo = %repo, run_id = request.run_id))]
	pub async fn start_tracking(&self, repo: &RepoKey, request: StartTracking) -> Result<()> {
		let result = {
			let tracker = self.tracker(repo).await?;
			let mut tracker = tracker.lock().await;
			let result = tracker.start_tracking(request).await;
			self.sync_alarm(repo, tracker.wake_at());
			result
		};
		self.evict_if_idle(repo).await;
		result
	}

	#[instrument(skip(self), fields(repo = %repo))]
	pub async fn finalize_run(
		&self,
		repo: &RepoKey,
		run_id: u64,
		status: FinalizeStatus,
	) -> Result<FinalizeOutcome> {
		let result = {
			let tracker = self.tracker(repo).await?;
			let mut tracker = tracker.lock().await;
			let result = tracker.finalize_run(run_id, status).await;
			self.sync_alarm(repo, tracker.wake_at());
			result
		};
		self.evict_if_idle(repo).await;
		result
	}

	pub async fn is_tracking(&self, repo: &RepoKey, run_id: u64) -> Result<bool> {
		let tracking = {
			let tracker = self.tracker(repo).await?;
			let tracker = tracker.lock().await;
			tracker.is_tracking(run_id)
		};
		self.evict_if_idle(repo).await;
		Ok(tracking)
	}

	/// Handle a completion observed outside the tracker's own polling.
	///
	/// Active runs are completed with `reason` (`None` is silent). Otherwise, when
	/// `record_untracked` is set and no outcome exists yet, `NeverTracked` is
	/// recorded. Runs under the repository's lock throughout, so it cannot
	/// interleave with a poll cycle or a `start_tracking` for the same run.
	#[instrument(skip(self), fields(repo = %repo))]
	pub async fn claim_completion(
		&self,
		repo: &RepoKey,
		run_id: u64,
		reason: Option<TerminalReason>,
		record_untracked: bool,
	) -> Result<CompletionClaim> {
		let result = {
			let tracker = self.tracker(repo).await?;
			let mut tracker = tracker.lock().await;
			self.claim_locked(&mut tracker, repo, run_id, reason, record_untracked)
				.await
		};
		self.evict_if_idle(repo).await;
		result
	}

	async fn claim_locked(
		&self,
		tracker: &mut RunTracker,
		repo: &RepoKey,
		run_id: u64,
		reason: Option<TerminalReason>,
		record_untracked: bool,
	) -> Result<CompletionClaim> {
		if tracker.is_tracking(run_id) {
			let result = tracker.complete_run(run_id, reason).await;
			self.sync_alarm(repo, tracker.wake_at());
			return result.map(CompletionClaim::Finalized);
		}

		if tracker.outcome(run_id).await?.is_some() {
			return Ok(CompletionClaim::AlreadyRecorded);
		}

		if !record_untracked {
			return Ok(CompletionClaim::Ignored);
		}

		Ok(if tracker.record_untracked(run_id).await? {
			CompletionClaim::Recorded
		} else {
			CompletionClaim::AlreadyRecorded
		})
	}

	/// Forget run outcomes recorded more than `retention` ago.
	#[instrument(skip(self))]
	pub async fn purge_outcomes(&self, retention: Duration) -> Result<u64> {
		let cutoff = self.inner.deps.clock.now()
			- chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(3650));
		let purged = self.inner.deps.store.purge_outcomes(cutoff).await?;
		if purged > 0 {
			info!(purged, "Purged old run outcomes");
		}
		Ok(purged)
	}

	/// Re-arm alarms for every repository with persisted active runs.
	/// Alarms that came due while the process was down fire immediately.
	#[instrument(skip(self))]
	pub async fn restore(&self) -> Result<usize> {
		let pending = self.inner.deps.store.pending_repos().await?;
		let mut restored = 0;

		for (repo, _) in pending {
			let tracker = self.tracker(&repo).await?;
			let mut tracker = tracker.lock().await;
			let wake_at = match tracker.wake_at() {
				Some(at) => Some(at),
				None => {
					warn!(repo = %repo, "Active runs without a pending alarm, re-arming");
					tracker.reschedule().await?
				}
			};
			self.sync_alarm(&repo, wake_at);
			if wake_at.is_some() {
				restored += 1;
			}
		}

		info!(repos = restored, "Restored tracker alarms");
		Ok(restored)
	}

	/// Pending wake time of the armed alarm for `repo`.
	pub fn alarm_pending(&self, repo: &RepoKey) -> Option<DateTime<Utc>> {
		let alarms = self.inner.alarms.lock().ok()?;
		alarms.get(repo).map(|alarm| alarm.wake_at)
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.inner.shut_down.store(true, Ordering::SeqCst);
		let _ = self.inner.shutdown_tx.send(());

		let alarms: Vec<Alarm> = match self.inner.alarms.lock() {
			Ok(mut alarms) => alarms.drain().map(|(_, alarm)| alarm).collect(),
			Err(_) => Vec::new(),
		};
		for alarm in alarms {
			alarm.handle.abort();
			let _ = alarm.handle.await;
		}

		info!("Tracker host shut down");
	}

	/// Make the armed alarm for `repo` match the tracker's wake time.
	fn sync_alarm(&self, repo: &RepoKey, wake_at: Option<DateTime<Utc>>) {
		let Ok(mut alarms) = self.inner.alarms.lock() else {
			error!(repo = %repo, "Alarm table lock poisoned");
			return;
		};

		let Some(wake_at) = wake_at else {
			if let Some(alarm) = alarms.remove(repo) {
				debug!(repo = %repo, "Cancelled tracker alarm");
				alarm.handle.abort();
			}
			return;
		};

		if alarms.get(repo).is_some_and(|alarm| alarm.wake_at == wake_at) {
			return;
		}
		if self.inner.shut_down.load(Ordering::SeqCst) {
			return;
		}
		if let Some(previous) = alarms.remove(repo) {
			previous.handle.abort();
		}

		let id = self.inner.next_alarm_id.fetch_add(1, Ordering::SeqCst);
		let handle = tokio::spawn(self.clone().run_alarm(repo.clone(), id, wake_at));
		alarms.insert(repo.clone(), Alarm { id, wake_at, handle });
		debug!(repo = %repo, %wake_at, "Armed tracker alarm");
	}

	async fn run_alarm(self, repo: RepoKey, id: u64, wake_at: DateTime<Utc>) {
		let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
		let delay = (wake_at - self.inner.deps.clock.now())
			.to_std()
			.unwrap_or(Duration::ZERO);

		tokio::select! {
			_ = tokio::time::sleep(delay) => self.fire(&repo, id).await,
			_ = shutdown_rx.recv() => debug!(repo = %repo, "Alarm stopped by shutdown"),
		}
	}

	/// Whether the alarm table still lists `id` for `repo`; if so, the entry
	/// is removed so that re-arming from inside the alarm never aborts it.
	fn take_own_alarm(&self, repo: &RepoKey, id: u64) -> bool {
		let Ok(mut alarms) = self.inner.alarms.lock() else {
			return false;
		};
		match alarms.get(repo) {
			Some(alarm) if alarm.id == id => {
				alarms.remove(repo);
				true
			}
			_ => false,
		}
	}

	#[instrument(skip(self, id), fields(repo = %repo))]
	async fn fire(&self, repo: &RepoKey, id: u64) {
		self.poll(repo, id).await;
		self.evict_if_idle(repo).await;
	}

	async fn poll(&self, repo: &RepoKey, id: u64) {
		let tracker = match self.tracker(repo).await {
			Ok(tracker) => tracker,
			Err(e) => {
				error!(error = %e, "Failed to load tracker for alarm, retrying later");
				if self.take_own_alarm(repo, id) {
					self.sync_alarm(repo, Some(self.retry_at()));
				}
				return;
			}
		};

		let mut tracker = tracker.lock().await;
		if !self.take_own_alarm(repo, id) {
			debug!("Alarm was superseded");
			return;
		}

		let next = match tracker.on_alarm().await {
			Ok(next) => next,
			Err(e) => {
				error!(error = %e, "Poll cycle failed, rescheduling");
				match tracker.reschedule().await {
					Ok(next) => next,
					Err(e) => {
						error!(error = %e, "Failed to persist rescheduled alarm");
						tracker.runs().next().map(|_| self.retry_at())
					}
				}
			}
		};
		self.sync_alarm(repo, next);
	}

	fn retry_at(&self) -> DateTime<Utc> {
		self.inner.deps.clock.now()
			+ chrono::Duration::from_std(self.inner.deps.settings.poll_interval)
				.unwrap_or_else(|_| chrono::Duration::minutes(5))
	}
}
