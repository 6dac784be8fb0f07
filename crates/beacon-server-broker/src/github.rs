// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The slice of the GitHub App API the broker depends on.

use async_trait::async_trait;
use beacon_server_github_app::{
	CollaboratorPermission, GithubAppClient, GithubAppError, InstallationPermissions,
	RepositoryPermissions, ScopedAccessToken,
};

#[async_trait]
pub trait AppApi: Send + Sync {
	/// `Ok(None)` when the app is not installed on the repository.
	async fn find_installation(&self, owner: &str, repo: &str) -> Result<Option<u64>, GithubAppError>;

	async fn create_scoped_token(
		&self,
		installation_id: u64,
		repository: &str,
		permissions: &InstallationPermissions,
	) -> Result<ScopedAccessToken, GithubAppError>;

	async fn collaborator_permission(
		&self,
		token: &str,
		owner: &str,
		repo: &str,
		username: &str,
	) -> Result<CollaboratorPermission, GithubAppError>;

	async fn user_repository_permissions(
		&self,
		user_token: &str,
		owner: &str,
		repo: &str,
	) -> Result<RepositoryPermissions, GithubAppError>;
}

#[async_trait]
impl AppApi for GithubAppClient {
	async fn find_installation(&self, owner: &str, repo: &str) -> Result<Option<u64>, GithubAppError> {
		match self.get_repo_installation(owner, repo).await {
			Ok(installation) => Ok(Some(installation.id)),
			Err(GithubAppError::InstallationNotFound { .. }) => Ok(None),
			Err(e) => Err(e),
		}
	}

	async fn create_scoped_token(
		&self,
		installation_id: u64,
		repository: &str,
		permissions: &InstallationPermissions,
	) -> Result<ScopedAccessToken, GithubAppError> {
		GithubAppClient::create_scoped_token(self, installation_id, repository, permissions).await
	}

	async fn collaborator_permission(
		&self,
		token: &str,
		owner: &str,
		repo: &str,
		username: &str,
	) -> Result<CollaboratorPermission, GithubAppError> {
		self
			.get_collaborator_permission(token, owner, repo, username)
			.await
	}

	async fn user_repository_permissions(
		&self,
		user_token: &str,
		owner: &str,
		repo: &str,
	) -> Result<RepositoryPermissions, GithubAppError> {
		self.get_user_repo_permissions(user_token, owner, repo).await
	}
}
