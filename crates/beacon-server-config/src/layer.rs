// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{
	BrokerConfigLayer, DatabaseConfigLayer, GithubAppConfigLayer, HttpConfigLayer, LoggingConfigLayer,
	OidcConfigLayer, TrackerConfigLayer,
};

/// One source's view of the configuration. Later layers override earlier
/// ones field by field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub http: Option<HttpConfigLayer>,
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub github_app: Option<GithubAppConfigLayer>,
	#[serde(default)]
	pub oidc: Option<OidcConfigLayer>,
	#[serde(default)]
	pub broker: Option<BrokerConfigLayer>,
	#[serde(default)]
	pub tracker: Option<TrackerConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(b), Some(o)) => merge(b, o),
		(None, Some(o)) => *base = Some(o),
		(_, None) => {}
	}
}

impl ServerConfigLayer {
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_section(&mut self.http, other.http, HttpConfigLayer::merge);
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.github_app, other.github_app, GithubAppConfigLayer::merge);
		merge_section(&mut self.oidc, other.oidc, OidcConfigLayer::merge);
		merge_section(&mut self.broker, other.broker, BrokerConfigLayer::merge);
		merge_section(&mut self.tracker, other.tracker, TrackerConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}
