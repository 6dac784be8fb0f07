// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::migrations::run_migrations;

/// An in-memory database with the full schema applied.
///
/// Limited to one connection: every SQLite `:memory:` connection is its own
/// database.
pub async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}
