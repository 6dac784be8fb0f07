// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Run tracker settings.

use beacon_common_config::SecretString;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
	pub poll_interval_secs: u64,
	pub max_tracking_secs: u64,
	/// Bearer token for the internal start-tracking endpoint. The endpoint is
	/// disabled when unset.
	pub internal_token: Option<SecretString>,
	/// Workflow whose untracked failures are reported from `workflow_run`
	/// events. When unset, only runs that are already tracked are handled.
	pub workflow_name: Option<String>,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			poll_interval_secs: 5 * 60,
			max_tracking_secs: 30 * 60,
			internal_token: None,
			workflow_name: None,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerConfigLayer {
	#[serde(default)]
	pub poll_interval_secs: Option<u64>,
	#[serde(default)]
	pub max_tracking_secs: Option<u64>,
	#[serde(default)]
	pub internal_token: Option<SecretString>,
	#[serde(default)]
	pub workflow_name: Option<String>,
}

impl TrackerConfigLayer {
	pub fn merge(&mut self, other: TrackerConfigLayer) {
		if other.poll_interval_secs.is_some() {
			self.poll_interval_secs = other.poll_interval_secs;
		}
		if other.max_tracking_secs.is_some() {
			self.max_tracking_secs = other.max_tracking_secs;
		}
		if other.internal_token.is_some() {
			self.internal_token = other.internal_token;
		}
		if other.workflow_name.is_some() {
			self.workflow_name = other.workflow_name;
		}
	}

	pub fn finalize(self) -> TrackerConfig {
		let defaults = TrackerConfig::default();
		TrackerConfig {
			poll_interval_secs: self.poll_interval_secs.unwrap_or(defaults.poll_interval_secs),
			max_tracking_secs: self.max_tracking_secs.unwrap_or(defaults.max_tracking_secs),
			internal_token: self.internal_token,
			workflow_name: self.workflow_name.filter(|name| !name.is_empty()),
		}
	}
}
