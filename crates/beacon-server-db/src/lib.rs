// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for the Beacon server.
//!
//! Two stores live here: the installation-id cache used by the credential
//! broker, and the per-repository state of the run tracker.

pub mod error;
pub mod installation_cache;
pub mod migrations;
pub mod pool;
pub mod tracked_run;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{DbError, Result};
pub use installation_cache::InstallationCacheRepository;
pub use migrations::run_migrations;
pub use pool::create_pool;
pub use tracked_run::{ActiveRepo, StoredRun, TrackedRunRepository};
