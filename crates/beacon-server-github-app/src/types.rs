// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Request and response types for GitHub App API operations.

use std::fmt;

use beacon_common_config::SecretString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GitHub App installation on an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
	pub id: u64,
	pub account: InstallationAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationAccount {
	pub login: String,
	#[serde(rename = "type", default)]
	pub account_type: Option<String>,
}

/// Access level for a single installation permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
	Read,
	Write,
}

impl PermissionLevel {
	pub fn as_str(&self) -> &'static str {
		match self {
			PermissionLevel::Read => "read",
			PermissionLevel::Write => "write",
		}
	}
}

impl fmt::Display for PermissionLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The permission set requested for an installation access token.
///
/// Only the permissions Beacon ever hands out are representable; anything
/// left as `None` is not requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationPermissions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub contents: Option<PermissionLevel>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub issues: Option<PermissionLevel>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pull_requests: Option<PermissionLevel>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<PermissionLevel>,
}

impl InstallationPermissions {
	/// Metadata read only; enough to query collaborators on a repository.
	pub fn metadata_read() -> Self {
		Self {
			metadata: Some(PermissionLevel::Read),
			..Self::default()
		}
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct AccessTokenRequest<'a> {
	pub(crate) repositories: [&'a str; 1],
	pub(crate) permissions: &'a InstallationPermissions,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccessTokenResponse {
	pub(crate) token: String,
	pub(crate) expires_at: DateTime<Utc>,
}

/// An installation access token restricted to one repository.
///
/// Never cached or persisted by Beacon; each exchange mints a fresh one.
#[derive(Clone)]
pub struct ScopedAccessToken {
	pub token: SecretString,
	pub expires_at: DateTime<Utc>,
	pub repository: String,
	pub permissions: InstallationPermissions,
}

impl fmt::Debug for ScopedAccessToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScopedAccessToken")
			.field("token", &self.token)
			.field("expires_at", &self.expires_at)
			.field("repository", &self.repository)
			.field("permissions", &self.permissions)
			.finish()
	}
}

/// A user's permission on a repository as seen through the collaborators API.
#[derive(Debug, Clone, Deserialize)]
pub struct CollaboratorPermission {
	/// One of `admin`, `write`, `read` or `none`.
	pub permission: String,
	/// Fine-grained role such as `maintain` or `triage`, when present.
	#[serde(default)]
	pub role_name: Option<String>,
}

impl CollaboratorPermission {
	pub fn can_write(&self) -> bool {
		let writes = |p: &str| matches!(p, "admin" | "maintain" | "write");
		writes(&self.permission) || self.role_name.as_deref().is_some_and(writes)
	}
}

/// The caller's permissions on a repository, as returned by `GET /repos/{o}/{r}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryPermissions {
	#[serde(default)]
	pub admin: bool,
	#[serde(default)]
	pub maintain: bool,
	#[serde(default)]
	pub push: bool,
	#[serde(default)]
	pub triage: bool,
	#[serde(default)]
	pub pull: bool,
}

impl RepositoryPermissions {
	pub fn can_write(&self) -> bool {
		self.admin || self.maintain || self.push
	}
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepositoryResponse {
	#[serde(default)]
	pub(crate) permissions: Option<RepositoryPermissions>,
}

/// A GitHub Actions workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
	pub id: u64,
	#[serde(default)]
	pub name: Option<String>,
	/// `queued`, `in_progress`, `completed`, ...
	pub status: String,
	/// Set once `status` is `completed`.
	#[serde(default)]
	pub conclusion: Option<String>,
	pub html_url: String,
}

impl WorkflowRun {
	pub fn is_completed(&self) -> bool {
		self.status == "completed"
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
	pub id: u64,
	pub html_url: String,
}

/// Where a reaction is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ReactionSubject {
	IssueComment(u64),
	Issue(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionContent {
	Eyes,
	Rocket,
	Confused,
}
