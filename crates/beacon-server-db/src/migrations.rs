// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::SqlitePool;

use crate::error::DbError;

const MIGRATIONS: [(&str, &str); 2] = [
	(
		"001_installation_cache",
		include_str!("../migrations/001_installation_cache.sql"),
	),
	(
		"002_run_tracker",
		include_str!("../migrations/002_run_tracker.sql"),
	),
];

/// Apply the embedded schema. Every statement is idempotent, so this runs
/// unconditionally at startup.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	for (name, sql) in MIGRATIONS {
		for stmt in sql.split(';').filter(|s| !strip_comments(s).is_empty()) {
			sqlx::query(stmt).execute(pool).await?;
		}
		tracing::debug!(migration = name, "Applied migration");
	}
	Ok(())
}

fn strip_comments(stmt: &str) -> String {
	stmt
		.lines()
		.filter(|line| !line.trim_start().starts_with("--"))
		.collect::<Vec<_>>()
		.join("\n")
		.trim()
		.to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn migrations_are_idempotent() {
		let pool = create_test_pool().await;
		run_migrations(&pool).await.unwrap();

		let tables: Vec<(String,)> =
			sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
				.fetch_all(&pool)
				.await
				.unwrap();
		let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();
		assert_eq!(
			names,
			vec![
				"installation_cache",
				"run_outcomes",
				"tracked_runs",
				"tracker_alarms"
			]
		);
	}
}
