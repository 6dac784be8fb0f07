// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Scriptable collaborators for tracker tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, TrackerError};
use crate::notify::{FailureNotice, Notifier};
use crate::status::RunStatusSource;
use crate::types::{RepoKey, RunStatus};

/// Records every notice instead of posting it.
#[derive(Default)]
pub struct RecordingNotifier {
	notices: Mutex<Vec<(RepoKey, FailureNotice)>>,
	fail: Mutex<bool>,
}

impl RecordingNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn notices(&self) -> Vec<(RepoKey, FailureNotice)> {
		self.notices.lock().expect("notices lock poisoned").clone()
	}

	/// Make every delivery fail after recording the attempt.
	pub fn fail_all(&self, fail: bool) {
		*self.fail.lock().expect("fail lock poisoned") = fail;
	}
}

#[async_trait]
impl Notifier for RecordingNotifier {
	async fn notify(&self, repo: &RepoKey, notice: &FailureNotice) -> Result<()> {
		self
			.notices
			.lock()
			.expect("notices lock poisoned")
			.push((repo.clone(), notice.clone()));
		if *self.fail.lock().expect("fail lock poisoned") {
			return Err(TrackerError::Invalid("notification delivery failed".to_string()));
		}
		Ok(())
	}
}

enum Scripted {
	Completed(String),
	Failing,
}

/// Runs are pending unless scripted otherwise.
#[derive(Default)]
pub struct ScriptedStatus {
	runs: Mutex<HashMap<u64, Scripted>>,
	fetches: Mutex<usize>,
}

impl ScriptedStatus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn complete(&self, run_id: u64, conclusion: &str) {
		self
			.runs
			.lock()
			.expect("status lock poisoned")
			.insert(run_id, Scripted::Completed(conclusion.to_string()));
	}

	pub fn fail(&self, run_id: u64) {
		self
			.runs
			.lock()
			.expect("status lock poisoned")
			.insert(run_id, Scripted::Failing);
	}

	pub fn fetch_count(&self) -> usize {
		*self.fetches.lock().expect("status lock poisoned")
	}
}

#[async_trait]
impl RunStatusSource for ScriptedStatus {
	async fn fetch(&self, _repo: &RepoKey, run_id: u64) -> Result<RunStatus> {
		*self.fetches.lock().expect("status lock poisoned") += 1;
		match self.runs.lock().expect("status lock poisoned").get(&run_id) {
			None => Ok(RunStatus::Pending),
			Some(Scripted::Completed(conclusion)) => Ok(RunStatus::Completed {
				conclusion: conclusion.clone(),
			}),
			Some(Scripted::Failing) => Err(TrackerError::Invalid("status endpoint unavailable".to_string())),
		}
	}
}
