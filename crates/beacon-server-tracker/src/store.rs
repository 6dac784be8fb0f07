// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Durable per-repository tracker state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use beacon_server_db::{StoredRun, TrackedRunRepository};
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{Result, TrackerError};
use crate::types::{ReactionTarget, RepoKey, RunOutcome, TrackedRun};

/// Everything a tracker needs to resume after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerState {
	pub runs: BTreeMap<u64, TrackedRun>,
	pub wake_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TrackerStore: Send + Sync {
	async fn load(&self, repo: &RepoKey) -> Result<TrackerState>;

	async fn upsert_run(&self, repo: &RepoKey, run: &TrackedRun) -> Result<()>;

	/// Remove an active run and record how it ended. Returns `false` when the
	/// run was not active, in which case nothing is recorded.
	async fn remove_run(&self, repo: &RepoKey, run_id: u64, outcome: RunOutcome) -> Result<bool>;

	async fn outcome(&self, repo: &RepoKey, run_id: u64) -> Result<Option<RunOutcome>>;

	/// Record an outcome for a run that was never active. Returns `false` if
	/// one was already recorded.
	async fn record_outcome(&self, repo: &RepoKey, run_id: u64, outcome: RunOutcome) -> Result<bool>;

	/// Forget outcomes recorded before `before`. Returns how many were removed.
	async fn purge_outcomes(&self, before: DateTime<Utc>) -> Result<u64>;

	async fn set_alarm(&self, repo: &RepoKey, wake_at: Option<DateTime<Utc>>) -> Result<()>;

	/// Repositories with active runs and their pending alarm, if any.
	async fn pending_repos(&self) -> Result<Vec<(RepoKey, Option<DateTime<Utc>>)>>;
}

#[derive(Default)]
struct MemoryState {
	repos: HashMap<RepoKey, TrackerState>,
	outcomes: HashMap<(RepoKey, u64), (RunOutcome, DateTime<Utc>)>,
}

/// Non-durable store for tests and single-process development.
#[derive(Default)]
pub struct MemoryTrackerStore {
	state: Mutex<MemoryState>,
}

impl MemoryTrackerStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
		self
			.state
			.lock()
			.map_err(|_| TrackerError::Store("memory store lock poisoned".to_string()))
	}
}

#[async_trait]
impl TrackerStore for MemoryTrackerStore {
	async fn load(&self, repo: &RepoKey) -> Result<TrackerState> {
		Ok(self.lock()?.repos.get(repo).cloned().unwrap_or_default())
	}

	async fn upsert_run(&self, repo: &RepoKey, run: &TrackedRun) -> Result<()> {
		self
			.lock()?
			.repos
			.entry(repo.clone())
			.or_default()
			.runs
			.insert(run.run_id, run.clone());
		Ok(())
	}

	async fn remove_run(&self, repo: &RepoKey, run_id: u64, outcome: RunOutcome) -> Result<bool> {
		let mut state = self.lock()?;
		let removed = state
			.repos
			.get_mut(repo)
			.and_then(|s| s.runs.remove(&run_id))
			.is_some();
		if removed {
			state
				.outcomes
				.insert((repo.clone(), run_id), (outcome, Utc::now()));
		}
		Ok(removed)
	}

	async fn outcome(&self, repo: &RepoKey, run_id: u64) -> Result<Option<RunOutcome>> {
		Ok(self
			.lock()?
			.outcomes
			.get(&(repo.clone(), run_id))
			.map(|(outcome, _)| *outcome))
	}

	async fn record_outcome(&self, repo: &RepoKey, run_id: u64, outcome: RunOutcome) -> Result<bool> {
		let mut state = self.lock()?;
		let key = (repo.clone(), run_id);
		if state.outcomes.contains_key(&key) {
			return Ok(false);
		}
		state.outcomes.insert(key, (outcome, Utc::now()));
		Ok(true)
	}

	async fn purge_outcomes(&self, before: DateTime<Utc>) -> Result<u64> {
		let mut state = self.lock()?;
		let len = state.outcomes.len();
		state.outcomes.retain(|_, (_, recorded_at)| *recorded_at >= before);
		Ok((len - state.outcomes.len()) as u64)
	}

	async fn set_alarm(&self, repo: &RepoKey, wake_at: Option<DateTime<Utc>>) -> Result<()> {
		self.lock()?.repos.entry(repo.clone()).or_default().wake_at = wake_at;
		Ok(())
	}

	async fn pending_repos(&self) -> Result<Vec<(RepoKey, Option<DateTime<Utc>>)>> {
		let state = self.lock()?;
		let mut repos: Vec<_> = state
			.repos
			.iter()
			.filter(|(_, s)| !s.runs.is_empty())
			.map(|(repo, s)| (repo.clone(), s.wake_at))
			.collect();
		repos.sort_by(|a, b| a.0.cmp(&b.0));
		Ok(repos)
	}
}

/// SQLite-backed store; survives restarts.
#[derive(Clone)]
pub struct SqliteTrackerStore {
	repository: TrackedRunRepository,
}

impl SqliteTrackerStore {
	pub fn new(repository: TrackedRunRepository) -> Self {
		Self { repository }
	}
}

fn to_stored(repo: &RepoKey, run: &TrackedRun) -> Result<StoredRun> {
	let reaction_target = run
		.reaction_target
		.map(|t| serde_json::to_string(&t))
		.transpose()
		.map_err(|e| TrackerError::Store(format!("failed to encode reaction target: {e}")))?;
	Ok(StoredRun {
		owner: repo.owner.clone(),
		repo: repo.repo.clone(),
		run_id: run.run_id,
		run_url: run.run_url.clone(),
		issue_number: run.issue_number,
		created_at: run.created_at,
		reaction_target,
	})
}

fn from_stored(stored: StoredRun) -> TrackedRun {
	let reaction_target = stored.reaction_target.as_deref().and_then(|raw| {
		serde_json::from_str::<ReactionTarget>(raw)
			.map_err(|e| {
				warn!(run_id = stored.run_id, error = %e, "Dropping unreadable reaction target");
			})
			.ok()
	});
	TrackedRun {
		run_id: stored.run_id,
		run_url: stored.run_url,
		issue_number: stored.issue_number,
		created_at: stored.created_at,
		reaction_target,
	}
}

#[async_trait]
impl TrackerStore for SqliteTrackerStore {
	async fn load(&self, repo: &RepoKey) -> Result<TrackerState> {
		let runs = self
			.repository
			.list_runs(&repo.owner, &repo.repo)
			.await?
			.into_iter()
			.map(|stored| {
				let run = from_stored(stored);
				(run.run_id, run)
			})
			.collect();
		let wake_at = self.repository.get_alarm(&repo.owner, &repo.repo).await?;
		Ok(TrackerState { runs, wake_at })
	}

	async fn upsert_run(&self, repo: &RepoKey, run: &TrackedRun) -> Result<()> {
		Ok(self.repository.upsert_run(&to_stored(repo, run)?).await?)
	}

	async fn remove_run(&self, repo: &RepoKey, run_id: u64, outcome: RunOutcome) -> Result<bool> {
		Ok(self
			.repository
			.take_run(&repo.owner, &repo.repo, run_id, outcome.as_str())
			.await?)
	}

	async fn outcome(&self, repo: &RepoKey, run_id: u64) -> Result<Option<RunOutcome>> {
		self
			.repository
			.get_outcome(&repo.owner, &repo.repo, run_id)
			.await?
			.map(|raw| raw.parse())
			.transpose()
	}

	async fn record_outcome(&self, repo: &RepoKey, run_id: u64, outcome: RunOutcome) -> Result<bool> {
		Ok(self
			.repository
			.record_outcome(&repo.owner, &repo.repo, run_id, outcome.as_str())
			.await?)
	}

	async fn purge_outcomes(&self, before: DateTime<Utc>) -> Result<u64> {
		Ok(self.repository.purge_outcomes(before).await?)
	}

	async fn set_alarm(&self, repo: &RepoKey, wake_at: Option<DateTime<Utc>>) -> Result<()> {
		Ok(self
			.repository
			.set_alarm(&repo.owner, &repo.repo, wake_at)
			.await?)
	}

	async fn pending_repos(&self) -> Result<Vec<(RepoKey, Option<DateTime<Utc>>)>> {
		Ok(self
			.repository
			.list_active_repos()
			.await?
			.into_iter()
			.map(|active| (RepoKey::new(active.owner, active.repo), active.wake_at))
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_server_db::testing::create_test_pool;
	use chrono::TimeZone;

	fn run(run_id: u64) -> TrackedRun {
		TrackedRun {
			run_id,
			run_url: format!("https://github.com/acme/widgets/actions/runs/{run_id}"),
			issue_number: 12,
			created_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
			reaction_target: Some(ReactionTarget::Comment(99)),
		}
	}

	async fn exercise(store: &dyn TrackerStore) {
		let repo = RepoKey::new("acme", "widgets");
		store.upsert_run(&repo, &run(1)).await.unwrap();
		store.upsert_run(&repo, &run(2)).await.unwrap();
		let wake = Utc.with_ymd_and_hms(2026, 3, 1, 10, 5, 0).unwrap();
		store.set_alarm(&repo, Some(wake)).await.unwrap();

		let state = store.load(&repo).await.unwrap();
		assert_eq!(state.runs.len(), 2);
		assert_eq!(state.runs[&1], run(1));
		assert_eq!(state.wake_at, Some(wake));
		assert_eq!(store.pending_repos().await.unwrap(), vec![(repo.clone(), Some(wake))]);

		assert!(store.remove_run(&repo, 1, RunOutcome::TimedOut).await.unwrap());
		assert!(!store.remove_run(&repo, 1, RunOutcome::ExternallyFinalized).await.unwrap());
		assert_eq!(store.outcome(&repo, 1).await.unwrap(), Some(RunOutcome::TimedOut));
		assert_eq!(store.outcome(&repo, 2).await.unwrap(), None);

		assert!(store.record_outcome(&repo, 3, RunOutcome::NeverTracked).await.unwrap());
		assert!(!store.record_outcome(&repo, 3, RunOutcome::NeverTracked).await.unwrap());

		assert!(store.remove_run(&repo, 2, RunOutcome::CompletedSuccess).await.unwrap());
		store.set_alarm(&repo, None).await.unwrap();
		assert!(store.pending_repos().await.unwrap().is_empty());
		assert_eq!(store.load(&repo).await.unwrap(), TrackerState::default());

		let day_ago = Utc::now() - chrono::Duration::days(1);
		assert_eq!(store.purge_outcomes(day_ago).await.unwrap(), 0);
		assert_eq!(store.outcome(&repo, 3).await.unwrap(), Some(RunOutcome::NeverTracked));

		let later = Utc::now() + chrono::Duration::seconds(5);
		assert_eq!(store.purge_outcomes(later).await.unwrap(), 3);
		assert_eq!(store.outcome(&repo, 1).await.unwrap(), None);
		assert_eq!(store.outcome(&repo, 3).await.unwrap(), None);
	}

	#[tokio::test]
	async fn memory_store_contract() {
		exercise(&MemoryTrackerStore::new()).await;
	}

	#[tokio::test]
	async fn sqlite_store_contract() {
		let store = SqliteTrackerStore::new(TrackedRunRepository::new(create_test_pool().await));
		exercise(&store).await;
	}
}
