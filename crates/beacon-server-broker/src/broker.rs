// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The credential broker: the three exchange flows plus the primitives they
//! are built from.

use std::sync::Arc;

use beacon_server_github_app::{InstallationPermissions, ScopedAccessToken};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::bearer::parse_bearer;
use crate::error::{AuthorizationFailure, BrokerError, Result};
use crate::github::AppApi;
use crate::installation::{InstallationLookup, InstallationResolver};
use crate::oidc::{IdentityClaims, OidcValidator};
use crate::permissions::{confine, within_ceiling, PermissionRequest};

#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
	/// Allow exchanging a personal GitHub token. Off unless explicitly enabled.
	pub personal_tokens_enabled: bool,
}

/// A repository named by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
	pub owner: String,
	pub repo: String,
}

impl RepoTarget {
	pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
		Self {
			owner: owner.into(),
			repo: repo.into(),
		}
	}

	/// Both parts must be non-empty GitHub-safe names.
	pub fn validate(&self) -> Result<()> {
		let valid = |s: &str| {
			!s.is_empty()
				&& s != "."
				&& s != ".."
				&& s
					.chars()
					.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
		};
		if !valid(&self.owner) || !valid(&self.repo) {
			return Err(BrokerError::Validation(format!(
				"'{}/{}' is not a valid repository",
				self.owner, self.repo
			)));
		}
		Ok(())
	}
}

pub struct CredentialBroker {
	validator: Arc<OidcValidator>,
	resolver: InstallationResolver,
	api: Arc<dyn AppApi>,
	config: BrokerConfig,
}

impl CredentialBroker {
	pub fn new(
		validator: Arc<OidcValidator>,
		resolver: InstallationResolver,
		api: Arc<dyn AppApi>,
		config: BrokerConfig,
	) -> Self {
		Self {
			validator,
			resolver,
			api,
			config,
		}
	}

	pub fn config(&self) -> &BrokerConfig {
		&self.config
	}

	pub async fn validate_identity(&self, token: &str) -> Result<IdentityClaims> {
		self.validator.validate(token).await
	}

	/// Parse an `Authorization` header and validate the bearer identity token.
	pub async fn identity_from_header(&self, header: Option<&str>) -> Result<IdentityClaims> {
		let token = parse_bearer(header)?;
		self.validate_identity(token).await
	}

	/// The installation id covering `owner/repo`, or `None` if the app is not
	/// installed there.
	pub async fn get_installation(&self, owner: &str, repo: &str) -> Result<Option<u64>> {
		Ok(match self.resolver.resolve(owner, repo).await? {
			InstallationLookup::Found(record) => Some(record.id),
			InstallationLookup::NotInstalled => None,
		})
	}

	/// Mint a token for exactly one repository of an installation.
	pub async fn mint_scoped_token(
		&self,
		installation_id: u64,
		repository: &str,
		permissions: &InstallationPermissions,
	) -> Result<ScopedAccessToken> {
		if !within_ceiling(permissions) {
			return Err(BrokerError::Validation(
				"requested permissions exceed what the broker grants".to_string(),
			));
		}
		Ok(self
			.api
			.create_scoped_token(installation_id, repository, permissions)
			.await?)
	}

	/// Exchange an identity token for a token on the caller's own repository.
	#[instrument(skip(self, authorization, requested))]
	pub async fn exchange_token(
		&self,
		authorization: Option<&str>,
		requested: Option<&PermissionRequest>,
	) -> Result<ScopedAccessToken> {
		let token = parse_bearer(authorization)?;
		let permissions = confine(requested)?;
		let claims = self.validate_identity(token).await?;

		let owner = claims.repository_owner();
		let repo = claims.repository_name();
		let minted = self
			.resolver
			.with_installation(owner, repo, |id| self.mint_scoped_token(id, repo, &permissions))
			.await?;

		info!(
			repository = %claims.repository(),
			actor = %claims.actor(),
			"Issued same-repository token"
		);
		Ok(minted)
	}

	/// Exchange an identity token for a token on another repository owned by
	/// the same account, provided the workflow's actor can write to it.
	#[instrument(skip(self, authorization, requested), fields(owner = %target.owner, repo = %target.repo))]
	pub async fn exchange_token_for_repo(
		&self,
		authorization: Option<&str>,
		target: &RepoTarget,
		requested: Option<&PermissionRequest>,
	) -> Result<ScopedAccessToken> {
		let token = parse_bearer(authorization)?;
		target.validate()?;
		let permissions = confine(requested)?;
		let claims = self.validate_identity(token).await?;

		if claims.repository_owner() != target.owner {
			warn!(
				caller_owner = %claims.repository_owner(),
				"Refused cross-organization token exchange"
			);
			return Err(BrokerError::Authorization(AuthorizationFailure::CrossOrganization));
		}

		let actor = claims.actor();
		let minted = self
			.resolver
			.with_installation(&target.owner, &target.repo, |id| {
				let permissions = &permissions;
				async move {
					self.check_actor_can_write(id, target, actor).await?;
					self.mint_scoped_token(id, &target.repo, permissions).await
				}
			})
			.await?;

		info!(
			source_repository = %claims.repository(),
			actor = %actor,
			"Issued cross-repository token"
		);
		Ok(minted)
	}

	async fn check_actor_can_write(&self, installation_id: u64, target: &RepoTarget, actor: &str) -> Result<()> {
		let lookup_token = self
			.mint_scoped_token(
				installation_id,
				&target.repo,
				&InstallationPermissions::metadata_read(),
			)
			.await?;

		let permission = match self
			.api
			.collaborator_permission(lookup_token.token.expose(), &target.owner, &target.repo, actor)
			.await
		{
			Ok(permission) => permission,
			Err(e) if e.is_not_found() => {
				warn!(actor, "Actor is not a collaborator on target repository");
				return Err(BrokerError::Authorization(AuthorizationFailure::InsufficientPermission));
			}
			Err(e) => return Err(e.into()),
		};

		if !permission.can_write() {
			warn!(actor, "Actor lacks write access to target repository");
			return Err(BrokerError::Authorization(AuthorizationFailure::InsufficientPermission));
		}
		Ok(())
	}

	/// Exchange a user's personal GitHub token for an installation token on a
	/// repository the user can write to. Disabled unless configured.
	#[instrument(skip(self, authorization, requested), fields(owner = %target.owner, repo = %target.repo))]
	pub async fn exchange_personal_token(
		&self,
		authorization: Option<&str>,
		target: &RepoTarget,
		requested: Option<&PermissionRequest>,
	) -> Result<ScopedAccessToken> {
		if !self.config.personal_tokens_enabled {
			return Err(BrokerError::Authorization(AuthorizationFailure::PersonalTokensDisabled));
		}

		let user_token = parse_bearer(authorization)?;
		target.validate()?;
		let permissions = confine(requested)?;

		match self
			.api
			.user_repository_permissions(user_token, &target.owner, &target.repo)
			.await
		{
			Ok(repo_permissions) if repo_permissions.can_write() => {}
			Ok(_) => {
				warn!("Personal token lacks write access to target repository");
				return Err(BrokerError::Authorization(AuthorizationFailure::InsufficientPermission));
			}
			Err(e) if matches!(e.status(), Some(401 | 403 | 404)) => {
				warn!(status = ?e.status(), "Personal token rejected by GitHub");
				return Err(BrokerError::Authorization(AuthorizationFailure::InsufficientPermission));
			}
			Err(e) => return Err(e.into()),
		}

		let minted = self
			.resolver
			.with_installation(&target.owner, &target.repo, |id| {
				self.mint_scoped_token(id, &target.repo, &permissions)
			})
			.await?;

		info!("Issued token for personal token holder");
		Ok(minted)
	}

	/// A full-ceiling token for server-side work such as posting run results.
	pub async fn installation_token_for(&self, owner: &str, repo: &str) -> Result<ScopedAccessToken> {
		let permissions = crate::permissions::ceiling();
		self
			.resolver
			.with_installation(owner, repo, |id| self.mint_scoped_token(id, repo, &permissions))
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cache::MemoryInstallationCache;
	use crate::oidc::OidcConfig;
	use crate::testing::{FakeAppApi, StaticKeySetSource, TestIssuer};
	use beacon_server_github_app::{PermissionLevel, RepositoryPermissions};
	use std::time::Duration;

	const AUDIENCE: &str = "beacon-test";

	struct Harness {
		issuer: TestIssuer,
		api: Arc<FakeAppApi>,
		broker: CredentialBroker,
	}

	fn harness(config: BrokerConfig) -> Harness {
		let issuer = TestIssuer::new(AUDIENCE);
		let source = Arc::new(StaticKeySetSource::new(issuer.key_set()));
		let validator = Arc::new(OidcValidator::new(
			OidcConfig {
				audience: AUDIENCE.to_string(),
				min_refresh_interval: Duration::ZERO,
				..OidcConfig::default()
			},
			source,
		));
		let api = Arc::new(FakeAppApi::new());
		let resolver = InstallationResolver::new(Arc::new(MemoryInstallationCache::new()), api.clone());
		let broker = CredentialBroker::new(validator, resolver, api.clone(), config);
		Harness { issuer, api, broker }
	}

	fn bearer(token: &str) -> String {
		format!("Bearer {token}")
	}

	#[tokio::test]
	async fn same_repo_exchange_mints_full_ceiling() {
		let h = harness(BrokerConfig::default());
		h.api.install("acme", "widgets", 7);
		let auth = bearer(&h.issuer.token_for("acme/widgets", "octocat"));

		let token = h.broker.exchange_token(Some(&auth), None).await.unwrap();

		assert_eq!(token.repository, "widgets");
		assert_eq!(token.permissions, crate::permissions::ceiling());
		assert_eq!(h.api.minted().len(), 1);
		assert_eq!(h.api.minted()[0].installation_id, 7);
	}

	#[tokio::test]
	async fn same_repo_exchange_honours_narrower_request() {
		let h = harness(BrokerConfig::default());
		h.api.install("acme", "widgets", 7);
		let auth = bearer(&h.issuer.token_for("acme/widgets", "octocat"));
		let requested: PermissionRequest = [("contents".to_string(), PermissionLevel::Read)].into();

		let token = h.broker.exchange_token(Some(&auth), Some(&requested)).await.unwrap();
		assert_eq!(token.permissions.contents, Some(PermissionLevel::Read));
		assert_eq!(token.permissions.issues, None);
	}

	#[tokio::test]
	async fn missing_and_malformed_headers_are_rejected() {
		let h = harness(BrokerConfig::default());
		assert!(matches!(
			h.broker.exchange_token(None, None).await,
			Err(BrokerError::Authorization(AuthorizationFailure::MissingHeader))
		));
		assert!(matches!(
			h.broker.exchange_token(Some("Token abc"), None).await,
			Err(BrokerError::Authorization(AuthorizationFailure::MalformedHeader))
		));
		assert!(h.api.minted().is_empty());
	}

	#[tokio::test]
	async fn invalid_identity_mints_nothing() {
		let h = harness(BrokerConfig::default());
		h.api.install("acme", "widgets", 7);
		let stranger = TestIssuer::with_kid(AUDIENCE, "stranger-key");
		let auth = bearer(&stranger.token_for("acme/widgets", "octocat"));

		assert!(matches!(
			h.broker.exchange_token(Some(&auth), None).await,
			Err(BrokerError::OidcValidation(_))
		));
		assert!(h.api.minted().is_empty());
	}

	#[tokio::test]
	async fn not_installed_is_reported() {
		let h = harness(BrokerConfig::default());
		let auth = bearer(&h.issuer.token_for("acme/widgets", "octocat"));
		assert!(matches!(
			h.broker.exchange_token(Some(&auth), None).await,
			Err(BrokerError::InstallationNotFound { .. })
		));
	}

	#[tokio::test]
	async fn exchange_heals_after_reinstall() {
		let h = harness(BrokerConfig::default());
		h.api.install("acme", "widgets", 7);
		let auth = bearer(&h.issuer.token_for("acme/widgets", "octocat"));
		h.broker.exchange_token(Some(&auth), None).await.unwrap();

		h.api.reinstall("acme", "widgets", 8);
		let token = h.broker.exchange_token(Some(&auth), None).await.unwrap();
		assert!(token.token.expose().starts_with("ghs_8_"));
	}

	#[tokio::test]
	async fn cross_repo_requires_same_owner() {
		let h = harness(BrokerConfig::default());
		h.api.install("other", "gadgets", 9);
		let auth = bearer(&h.issuer.token_for("acme/widgets", "octocat"));

		let err = h
			.broker
			.exchange_token_for_repo(Some(&auth), &RepoTarget::new("other", "gadgets"), None)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			BrokerError::Authorization(AuthorizationFailure::CrossOrganization)
		));
		assert!(h.api.minted().is_empty());
	}

	#[tokio::test]
	async fn cross_org_is_refused_even_for_an_admin_actor() {
		let h = harness(BrokerConfig::default());
		h.api.install("other", "gadgets", 9);
		h.api.grant_collaborator("other/gadgets", "octocat", "admin");
		let auth = bearer(&h.issuer.token_for("acme/widgets", "octocat"));

		let err = h
			.broker
			.exchange_token_for_repo(Some(&auth), &RepoTarget::new("other", "gadgets"), None)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			BrokerError::Authorization(AuthorizationFailure::CrossOrganization)
		));
		assert_eq!(h.api.lookup_count(), 0);
		assert!(h.api.minted().is_empty());
	}

	fn collaborator_level() -> impl proptest::strategy::Strategy<Value = &'static str> {
		use proptest::prelude::*;
		prop_oneof![
			Just("none"),
			Just("read"),
			Just("triage"),
			Just("write"),
			Just("maintain"),
			Just("admin"),
		]
	}

	proptest::proptest! {
		#![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

		/// No collaborator grant on a foreign account's repository opens a
		/// cross-repository exchange, and nothing is looked up or minted.
		#[test]
		fn cross_org_is_refused_whatever_the_grant(
			caller in "[a-z][a-z0-9-]{0,11}",
			target in "[a-z][a-z0-9-]{0,11}",
			level in collaborator_level(),
		) {
			proptest::prop_assume!(caller != target);
			let runtime = tokio::runtime::Builder::new_current_thread()
				.enable_all()
				.build()
				.unwrap();
			let h = harness(BrokerConfig::default());
			h.api.install(&target, "gadgets", 9);
			h.api.grant_collaborator(&format!("{target}/gadgets"), "octocat", level);
			let auth = bearer(&h.issuer.token_for(&format!("{caller}/widgets"), "octocat"));

			let result = runtime.block_on(h.broker.exchange_token_for_repo(
				Some(&auth),
				&RepoTarget::new(&target, "gadgets"),
				None,
			));
			proptest::prop_assert!(matches!(
				result,
				Err(BrokerError::Authorization(AuthorizationFailure::CrossOrganization))
			));
			proptest::prop_assert_eq!(h.api.lookup_count(), 0);
			proptest::prop_assert!(h.api.minted().is_empty());
		}
	}

	#[tokio::test]
	async fn cross_repo_requires_write_access() {
		let h = harness(BrokerConfig::default());
		h.api.install("acme", "gadgets", 9);
		h.api.grant_collaborator("acme/gadgets", "reader", "read");
		let target = RepoTarget::new("acme", "gadgets");

		let auth = bearer(&h.issuer.token_for("acme/widgets", "reader"));
		assert!(matches!(
			h.broker.exchange_token_for_repo(Some(&auth), &target, None).await,
			Err(BrokerError::Authorization(AuthorizationFailure::InsufficientPermission))
		));

		let auth = bearer(&h.issuer.token_for("acme/widgets", "stranger"));
		assert!(matches!(
			h.broker.exchange_token_for_repo(Some(&auth), &target, None).await,
			Err(BrokerError::Authorization(AuthorizationFailure::InsufficientPermission))
		));

		// Only the metadata lookup tokens were minted.
		assert!(h
			.api
			.minted()
			.iter()
			.all(|m| m.permissions == InstallationPermissions::metadata_read()));
	}

	#[tokio::test]
	async fn cross_repo_grants_writer() {
		let h = harness(BrokerConfig::default());
		h.api.install("acme", "gadgets", 9);
		h.api.grant_collaborator("acme/gadgets", "octocat", "write");
		let auth = bearer(&h.issuer.token_for("acme/widgets", "octocat"));

		let token = h
			.broker
			.exchange_token_for_repo(Some(&auth), &RepoTarget::new("acme", "gadgets"), None)
			.await
			.unwrap();

		assert_eq!(token.repository, "gadgets");
		let minted = h.api.minted();
		assert_eq!(minted.len(), 2);
		assert_eq!(minted[0].permissions, InstallationPermissions::metadata_read());
		assert_eq!(minted[1].permissions, crate::permissions::ceiling());
	}

	#[tokio::test]
	async fn cross_repo_rejects_invalid_target() {
		let h = harness(BrokerConfig::default());
		let auth = bearer(&h.issuer.token_for("acme/widgets", "octocat"));
		assert!(matches!(
			h.broker
				.exchange_token_for_repo(Some(&auth), &RepoTarget::new("acme", ""), None)
				.await,
			Err(BrokerError::Validation(_))
		));
	}

	#[tokio::test]
	async fn personal_tokens_disabled_by_default() {
		let h = harness(BrokerConfig::default());
		let err = h
			.broker
			.exchange_personal_token(None, &RepoTarget::new("acme", "widgets"), None)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			BrokerError::Authorization(AuthorizationFailure::PersonalTokensDisabled)
		));
	}

	#[tokio::test]
	async fn personal_token_requires_push() {
		let h = harness(BrokerConfig {
			personal_tokens_enabled: true,
		});
		h.api.install("acme", "widgets", 7);
		h.api.grant_user_token(
			"ghp_reader",
			"acme/widgets",
			RepositoryPermissions {
				pull: true,
				..RepositoryPermissions::default()
			},
		);
		h.api.grant_user_token(
			"ghp_writer",
			"acme/widgets",
			RepositoryPermissions {
				push: true,
				pull: true,
				..RepositoryPermissions::default()
			},
		);
		let target = RepoTarget::new("acme", "widgets");

		for token in ["ghp_reader", "ghp_unknown"] {
			assert!(matches!(
				h.broker
					.exchange_personal_token(Some(&bearer(token)), &target, None)
					.await,
				Err(BrokerError::Authorization(AuthorizationFailure::InsufficientPermission))
			));
		}

		let token = h
			.broker
			.exchange_personal_token(Some(&bearer("ghp_writer")), &target, None)
			.await
			.unwrap();
		assert_eq!(token.repository, "widgets");
	}

	#[tokio::test]
	async fn mint_refuses_permissions_over_ceiling() {
		let h = harness(BrokerConfig::default());
		let over = InstallationPermissions {
			metadata: Some(PermissionLevel::Write),
			..InstallationPermissions::default()
		};
		assert!(matches!(
			h.broker.mint_scoped_token(1, "widgets", &over).await,
			Err(BrokerError::Validation(_))
		));
	}

	#[tokio::test]
	async fn get_installation_reports_absence() {
		let h = harness(BrokerConfig::default());
		assert_eq!(h.broker.get_installation("acme", "widgets").await.unwrap(), None);
		h.api.install("acme", "widgets", 3);
		assert_eq!(h.broker.get_installation("acme", "widgets").await.unwrap(), Some(3));
	}
}
