// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! GitHub App client for Beacon.
//!
//! Authenticates as the app to locate installations and mint short-lived,
//! repository-scoped installation tokens, and performs the handful of
//! repository operations the broker and run tracker need with those tokens.

pub mod client;
pub mod config;
pub mod error;
pub mod jwt;
pub mod types;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use beacon_common_http::RetryConfig;
pub use client::GithubAppClient;
pub use config::GithubAppConfig;
pub use error::GithubAppError;
pub use types::{
	CollaboratorPermission, Installation, InstallationAccount, InstallationPermissions, IssueComment,
	PermissionLevel, ReactionContent, ReactionSubject, RepositoryPermissions, ScopedAccessToken,
	WorkflowRun,
};
pub use webhook::{compute_webhook_signature, verify_webhook_signature};
