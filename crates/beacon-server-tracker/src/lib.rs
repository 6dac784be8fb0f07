// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Workflow run tracking for Beacon.
//!
//! Each repository gets one [`RunTracker`] that remembers in-flight runs,
//! polls them every few minutes, gives up after a fixed window, and posts at
//! most one failure comment per run. [`TrackerHost`] serialises access per
//! repository and owns the alarm timers; [`SafetyNet`] handles completion
//! events from GitHub, including failures of runs that were never tracked.

pub mod clock;
pub mod error;
pub mod host;
pub mod notify;
pub mod safety_net;
pub mod status;
pub mod store;
pub mod tracker;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, SystemClock, TokioClock};
pub use error::{Result, TrackerError};
pub use host::{CompletionClaim, TrackerHost};
pub use notify::{
	render_failure_comment, render_untracked_failure_comment, FailureNotice, GithubNotifier, Notifier,
};
pub use safety_net::{SafetyNet, SafetyNetAction, WorkflowRunEvent};
pub use status::{GithubRunStatusSource, RunStatusSource};
pub use store::{MemoryTrackerStore, SqliteTrackerStore, TrackerState, TrackerStore};
pub use tracker::{RunTracker, TrackerDeps, TrackerSettings};
pub use types::{
	FinalizeOutcome, FinalizeStatus, ReactionTarget, RepoKey, RunOutcome, RunStatus, StartTracking,
	TerminalReason, TrackedRun,
};
