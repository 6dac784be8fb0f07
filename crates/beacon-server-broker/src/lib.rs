// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Credential broker: turns a CI job's OIDC identity token into a
//! short-lived GitHub App installation token scoped to one repository.
//!
//! The broker holds no long-lived credentials for callers. Every exchange
//! re-validates the identity token, resolves the installation covering the
//! requested repository, and mints a fresh token whose permissions never
//! exceed [`permissions::ceiling`].

pub mod bearer;
pub mod broker;
pub mod cache;
pub mod error;
pub mod github;
pub mod installation;
pub mod oidc;
pub mod permissions;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use broker::{BrokerConfig, CredentialBroker, RepoTarget};
pub use cache::{CacheError, InstallationCache, MemoryInstallationCache};
pub use error::{AuthorizationFailure, BrokerError, Result};
pub use github::AppApi;
pub use installation::{
	cache_key, InstallationLookup, InstallationRecord, InstallationResolver, InstallationSource,
};
pub use oidc::{HttpKeySetSource, IdentityClaims, KeySetSource, OidcConfig, OidcValidator};
pub use permissions::{ceiling, confine, PermissionRequest};
