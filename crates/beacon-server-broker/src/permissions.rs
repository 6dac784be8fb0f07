// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The permission ceiling for every token the broker mints.

use std::collections::BTreeMap;

use beacon_server_github_app::{InstallationPermissions, PermissionLevel};

use crate::error::BrokerError;

/// Permissions a caller asks for, by GitHub permission name.
pub type PermissionRequest = BTreeMap<String, PermissionLevel>;

/// Write on contents, issues and pull requests; read on metadata.
pub fn ceiling() -> InstallationPermissions {
	InstallationPermissions {
		contents: Some(PermissionLevel::Write),
		issues: Some(PermissionLevel::Write),
		pull_requests: Some(PermissionLevel::Write),
		metadata: Some(PermissionLevel::Read),
	}
}

/// True when every requested level is at or below the ceiling.
pub fn within_ceiling(permissions: &InstallationPermissions) -> bool {
	let max = ceiling();
	let fits = |requested: Option<PermissionLevel>, limit: Option<PermissionLevel>| match (requested, limit) {
		(None, _) => true,
		(Some(_), None) => false,
		(Some(r), Some(l)) => r <= l,
	};

	fits(permissions.contents, max.contents)
		&& fits(permissions.issues, max.issues)
		&& fits(permissions.pull_requests, max.pull_requests)
		&& fits(permissions.metadata, max.metadata)
}

/// Turn a caller's request into a grantable permission set.
///
/// No request means the full ceiling. Unknown permission names and levels
/// above the ceiling are rejected rather than silently clamped. Metadata read
/// is always included since GitHub grants it to every installation token.
pub fn confine(requested: Option<&PermissionRequest>) -> Result<InstallationPermissions, BrokerError> {
	let Some(requested) = requested else {
		return Ok(ceiling());
	};

	let mut permissions = InstallationPermissions::metadata_read();
	for (name, level) in requested {
		let slot = match name.as_str() {
			"contents" => &mut permissions.contents,
			"issues" => &mut permissions.issues,
			"pull_requests" => &mut permissions.pull_requests,
			"metadata" => &mut permissions.metadata,
			other => {
				return Err(BrokerError::Validation(format!(
					"permission '{other}' cannot be granted"
				)))
			}
		};
		*slot = Some(*level);
	}

	if !within_ceiling(&permissions) {
		return Err(BrokerError::Validation(
			"requested permissions exceed what the broker grants".to_string(),
		));
	}

	Ok(permissions)
}
