// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use tokio::time::Instant;

pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Wall-clock time that advances with tokio's clock, so paused-time tests
/// move tracker timestamps and alarm sleeps together.
#[derive(Debug, Clone)]
pub struct TokioClock {
	origin: DateTime<Utc>,
	started: Instant,
}

impl TokioClock {
	pub fn starting_at(origin: DateTime<Utc>) -> Self {
		Self {
			origin,
			started: Instant::now(),
		}
	}
}

impl Default for TokioClock {
	fn default() -> Self {
		Self::starting_at(Utc::now())
	}
}

impl Clock for TokioClock {
	fn now(&self) -> DateTime<Utc> {
		let elapsed = chrono::Duration::from_std(self.started.elapsed())
			.unwrap_or_else(|_| chrono::Duration::zero());
		self.origin + elapsed
	}
}
