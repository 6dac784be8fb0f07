// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence for the per-repository run tracker.
//!
//! Runs are keyed by `(owner, repo, run_id)`. Removing a run and recording
//! its outcome happen in one transaction, so exactly one caller ever
//! observes a successful removal.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

fn timestamp(at: DateTime<Utc>) -> String {
	at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
	i64::try_from(value).map_err(|_| DbError::Internal(format!("{what} out of range: {value}")))
}

fn to_u64(value: i64, what: &str) -> Result<u64> {
	u64::try_from(value).map_err(|_| DbError::Internal(format!("{what} out of range: {value}")))
}

/// A tracked run as stored. `reaction_target` is opaque JSON owned by the
/// tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRun {
	pub owner: String,
	pub repo: String,
	pub run_id: u64,
	pub run_url: String,
	pub issue_number: u64,
	pub created_at: DateTime<Utc>,
	pub reaction_target: Option<String>,
}

/// A repository with at least one tracked run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRepo {
	pub owner: String,
	pub repo: String,
	pub wake_at: Option<DateTime<Utc>>,
}

type RunRow = (String, String, i64, String, i64, DateTime<Utc>, Option<String>);

fn run_from_row(
	(owner, repo, run_id, run_url, issue_number, created_at, reaction_target): RunRow,
) -> Result<StoredRun> {
	Ok(StoredRun {
		owner,
		repo,
		run_id: to_u64(run_id, "run_id")?,
		run_url,
		issue_number: to_u64(issue_number, "issue_number")?,
		created_at,
		reaction_target,
	})
}

#[derive(Clone)]
pub struct TrackedRunRepository {
	pool: SqlitePool,
}

impl TrackedRunRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, run), fields(owner = %run.owner, repo = %run.repo, run_id = run.run_id))]
	pub async fn upsert_run(&self, run: &StoredRun) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO tracked_runs (owner, repo, run_id, run_url, issue_number, created_at, reaction_target)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(owner, repo, run_id) DO UPDATE SET
				run_url = excluded.run_url,
				issue_number = excluded.issue_number,
				created_at = excluded.created_at,
				reaction_target = excluded.reaction_target
			"#,
		)
		.bind(&run.owner)
		.bind(&run.repo)
		.bind(to_i64(run.run_id, "run_id")?)
		.bind(&run.run_url)
		.bind(to_i64(run.issue_number, "issue_number")?)
		.bind(timestamp(run.created_at))
		.bind(&run.reaction_target)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_runs(&self, owner: &str, repo: &str) -> Result<Vec<StoredRun>> {
		let rows = sqlx::query_as::<_, RunRow>(
			r#"
			SELECT owner, repo, run_id, run_url, issue_number, created_at, reaction_target
			FROM tracked_runs
			WHERE owner = ? AND repo = ?
			ORDER BY run_id
			"#,
		)
		.bind(owner)
		.bind(repo)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(run_from_row).collect()
	}

	/// Delete the run and record `outcome` for it.
	///
	/// Returns `false` without recording anything when the run was not
	/// tracked.
	#[tracing::instrument(skip(self))]
	pub async fn take_run(&self, owner: &str, repo: &str, run_id: u64, outcome: &str) -> Result<bool> {
		let run_id = to_i64(run_id, "run_id")?;
		let mut tx = self.pool.begin().await?;

		let deleted = sqlx::query("DELETE FROM tracked_runs WHERE owner = ? AND repo = ? AND run_id = ?")
			.bind(owner)
			.bind(repo)
			.bind(run_id)
			.execute(&mut *tx)
			.await?
			.rows_affected();

		if deleted == 0 {
			tx.rollback().await?;
			return Ok(false);
		}

		sqlx::query(
			r#"
			INSERT INTO run_outcomes (owner, repo, run_id, outcome, recorded_at)
			VALUES (?, ?, ?, ?, ?)
			ON CONFLICT(owner, repo, run_id) DO UPDATE SET
				outcome = excluded.outcome,
				recorded_at = excluded.recorded_at
			"#,
		)
		.bind(owner)
		.bind(repo)
		.bind(run_id)
		.bind(outcome)
		.bind(timestamp(Utc::now()))
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(true)
	}

	/// Record an outcome for a run that was never tracked. Returns `false`
	/// when an outcome already existed.
	#[tracing::instrument(skip(self))]
	pub async fn record_outcome(
		&self,
		owner: &str,
		repo: &str,
		run_id: u64,
		outcome: &str,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			INSERT INTO run_outcomes (owner, repo, run_id, outcome, recorded_at)
			VALUES (?, ?, ?, ?, ?)
			ON CONFLICT(owner, repo, run_id) DO NOTHING
			"#,
		)
		.bind(owner)
		.bind(repo)
		.bind(to_i64(run_id, "run_id")?)
		.bind(outcome)
		.bind(timestamp(Utc::now()))
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_outcome(&self, owner: &str, repo: &str, run_id: u64) -> Result<Option<String>> {
		let row = sqlx::query_as::<_, (String,)>(
			"SELECT outcome FROM run_outcomes WHERE owner = ? AND repo = ? AND run_id = ?",
		)
		.bind(owner)
		.bind(repo)
		.bind(to_i64(run_id, "run_id")?)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(outcome,)| outcome))
	}

	/// Delete outcomes recorded before `before`, returning how many went.
	#[tracing::instrument(skip(self))]
	pub async fn purge_outcomes(&self, before: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("DELETE FROM run_outcomes WHERE recorded_at < ?")
			.bind(timestamp(before))
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}

	/// Set or clear the pending wake-up for a repository.
	#[tracing::instrument(skip(self))]
	pub async fn set_alarm(&self, owner: &str, repo: &str, wake_at: Option<DateTime<Utc>>) -> Result<()> {
		match wake_at {
			Some(at) => {
				sqlx::query(
					r#"
					INSERT INTO tracker_alarms (owner, repo, wake_at)
					VALUES (?, ?, ?)
					ON CONFLICT(owner, repo) DO UPDATE SET wake_at = excluded.wake_at
					"#,
				)
				.bind(owner)
				.bind(repo)
				.bind(timestamp(at))
				.execute(&self.pool)
				.await?;
			}
			None => {
				sqlx::query("DELETE FROM tracker_alarms WHERE owner = ? AND repo = ?")
					.bind(owner)
					.bind(repo)
					.execute(&self.pool)
					.await?;
			}
		}
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_alarm(&self, owner: &str, repo: &str) -> Result<Option<DateTime<Utc>>> {
		let row = sqlx::query_as::<_, (DateTime<Utc>,)>(
			"SELECT wake_at FROM tracker_alarms WHERE owner = ? AND repo = ?",
		)
		.bind(owner)
		.bind(repo)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(at,)| at))
	}

	/// Repositories that still have tracked runs, with their pending alarm.
	#[tracing::instrument(skip(self))]
	pub async fn list_active_repos(&self) -> Result<Vec<ActiveRepo>> {
		let rows = sqlx::query_as::<_, (String, String, Option<DateTime<Utc>>)>(
			r#"
			SELECT r.owner, r.repo, a.wake_at
			FROM (SELECT DISTINCT owner, repo FROM tracked_runs) r
			LEFT JOIN tracker_alarms a ON a.owner = r.owner AND a.repo = r.repo
			ORDER BY r.owner, r.repo
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(
			rows
				.into_iter()
				.map(|(owner, repo, wake_at)| ActiveRepo { owner, repo, wake_at })
				.collect(),
		)
	}
}
