// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! GitHub App client implementation with JWT authentication.

use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_common_config::Secret;
use beacon_common_http::{retry, RetryConfig};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::GithubAppConfig;
use crate::error::GithubAppError;
use crate::jwt::{generate_app_jwt, JWT_VALIDITY_SECS};
use crate::types::{
	AccessTokenRequest, AccessTokenResponse, CollaboratorPermission, Installation,
	InstallationPermissions, IssueComment, ReactionContent, ReactionSubject, RepositoryPermissions,
	RepositoryResponse, ScopedAccessToken, WorkflowRun,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const JWT_REFRESH_MARGIN_SECS: u64 = 30;

struct CachedToken {
	token: String,
	expires_at: Instant,
}

impl CachedToken {
	fn new(token: String, valid_for: Duration) -> Self {
		Self {
			token,
			expires_at: Instant::now() + valid_for,
		}
	}

	fn is_valid(&self, margin: Duration) -> bool {
		Instant::now() + margin < self.expires_at
	}
}

/// Client for the GitHub App REST API.
///
/// App-authenticated calls (installation lookup, token minting) use a cached
/// app JWT. Repository calls take the installation or user token to act
/// with, so the caller decides which identity a request runs as.
#[derive(Clone)]
pub struct GithubAppClient {
	http_client: Client,
	config: GithubAppConfig,
	app_jwt_cache: Arc<Mutex<Option<CachedToken>>>,
	app_jwt_lock: Arc<Mutex<()>>,
}

impl GithubAppClient {
	pub fn new(config: GithubAppConfig) -> Result<Self, GithubAppError> {
		let http_client = beacon_common_http::builder()
			.timeout(REQUEST_TIMEOUT)
			.build()
			.map_err(|e| GithubAppError::Config(format!("Failed to create HTTP client: {e}")))?;

		info!(
			app_id = config.app_id(),
			base_url = %config.base_url(),
			"Created GitHub App client"
		);

		Ok(Self {
			http_client,
			config,
			app_jwt_cache: Arc::new(Mutex::new(None)),
			app_jwt_lock: Arc::new(Mutex::new(())),
		})
	}

	pub fn retry_config(&self) -> &RetryConfig {
		&self.config.retry_config
	}

	pub fn webhook_secret(&self) -> Option<&str> {
		self.config.webhook_secret()
	}

	async fn invalidate_app_jwt(&self) {
		let mut cache = self.app_jwt_cache.lock().await;
		if cache.take().is_some() {
			info!("Invalidated App JWT cache");
		}
	}

	/// Get or generate an App JWT, deduplicating concurrent generation.
	async fn get_app_jwt(&self) -> Result<String, GithubAppError> {
		{
			let cache = self.app_jwt_cache.lock().await;
			if let Some(ref cached) = *cache {
				if cached.is_valid(Duration::from_secs(JWT_REFRESH_MARGIN_SECS)) {
					trace!("Using cached App JWT");
					return Ok(cached.token.clone());
				}
			}
		}

		let _guard = self.app_jwt_lock.lock().await;

		{
			let cache = self.app_jwt_cache.lock().await;
			if let Some(ref cached) = *cache {
				if cached.is_valid(Duration::from_secs(JWT_REFRESH_MARGIN_SECS)) {
					trace!("Using cached App JWT (post-lock)");
					return Ok(cached.token.clone());
				}
			}
		}

		debug!(app_id = self.config.app_id(), "Generating new App JWT");
		let jwt = generate_app_jwt(self.config.app_id(), self.config.private_key_pem())?;

		let mut cache = self.app_jwt_cache.lock().await;
		*cache = Some(CachedToken::new(
			jwt.token.clone(),
			Duration::from_secs(JWT_VALIDITY_SECS),
		));

		Ok(jwt.token)
	}

	/// Find the installation covering `owner/repo`.
	///
	/// A 404 means the app is not installed there and is reported as
	/// [`GithubAppError::InstallationNotFound`] without retrying.
	#[instrument(skip(self))]
	pub async fn get_repo_installation(
		&self,
		owner: &str,
		repo: &str,
	) -> Result<Installation, GithubAppError> {
		let url = self.endpoint(&format!("repos/{}/{}/installation", seg(owner), seg(repo)))?;
		let url = &url;

		retry(&self.config.retry_config, || async move {
			let jwt = self.get_app_jwt().await?;
			debug!(url = %url, "Getting repository installation");
			let result = self
				.send(self.request(Method::GET, url.clone(), &jwt))
				.await;

			match result {
				Ok(response) => {
					let installation: Installation = parse_json(response).await?;
					debug!(installation_id = installation.id, "Repository installation found");
					Ok(installation)
				}
				Err(e) if e.is_not_found() => Err(GithubAppError::installation_not_found(owner, repo)),
				Err(GithubAppError::Unauthorized) => {
					self.invalidate_app_jwt().await;
					Err(GithubAppError::Unauthorized)
				}
				Err(e) => Err(e),
			}
		})
		.await
	}

	/// Mint an installation access token restricted to exactly one repository
	/// of the installation and to `permissions`.
	#[instrument(skip(self, permissions))]
	pub async fn create_scoped_token(
		&self,
		installation_id: u64,
		repository: &str,
		permissions: &InstallationPermissions,
	) -> Result<ScopedAccessToken, GithubAppError> {
		let url = self.endpoint(&format!("app/installations/{installation_id}/access_tokens"))?;
		let body = AccessTokenRequest {
			repositories: [repository],
			permissions,
		};
		let (url, body) = (&url, &body);

		let response: AccessTokenResponse = retry(&self.config.retry_config, || async move {
			let jwt = self.get_app_jwt().await?;
			let result = self
				.send(self.request(Method::POST, url.clone(), &jwt).json(body))
				.await;

			match result {
				Ok(response) => parse_json(response).await,
				Err(GithubAppError::Unauthorized) => {
					self.invalidate_app_jwt().await;
					Err(GithubAppError::Unauthorized)
				}
				Err(e) => Err(e),
			}
		})
		.await?;

		info!(installation_id, repository, expires_at = %response.expires_at, "Minted scoped installation token");

		Ok(ScopedAccessToken {
			token: Secret::new(response.token),
			expires_at: response.expires_at,
			repository: repository.to_string(),
			permissions: *permissions,
		})
	}

	/// Look up `username`'s permission on `owner/repo`.
	#[instrument(skip(self, token))]
	pub async fn get_collaborator_permission(
		&self,
		token: &str,
		owner: &str,
		repo: &str,
		username: &str,
	) -> Result<CollaboratorPermission, GithubAppError> {
		let url = self.endpoint(&format!(
			"repos/{}/{}/collaborators/{}/permission",
			seg(owner),
			seg(repo),
			seg(username)
		))?;
		let url = &url;

		retry(&self.config.retry_config, || async move {
			let response = self.send(self.request(Method::GET, url.clone(), token)).await?;
			parse_json(response).await
		})
		.await
	}

	/// Read the calling user's permissions on `owner/repo` using their own
	/// credential.
	#[instrument(skip(self, user_token))]
	pub async fn get_user_repo_permissions(
		&self,
		user_token: &str,
		owner: &str,
		repo: &str,
	) -> Result<RepositoryPermissions, GithubAppError> {
		let url = self.endpoint(&format!("repos/{}/{}", seg(owner), seg(repo)))?;
		let url = &url;

		let repository: RepositoryResponse = retry(&self.config.retry_config, || async move {
			let response = self
				.send(self.request(Method::GET, url.clone(), user_token))
				.await?;
			parse_json(response).await
		})
		.await?;

		Ok(repository.permissions.unwrap_or_default())
	}

	/// Fetch a workflow run. A single attempt; pollers retry on their own
	/// cadence.
	#[instrument(skip(self, token))]
	pub async fn get_workflow_run(
		&self,
		token: &str,
		owner: &str,
		repo: &str,
		run_id: u64,
	) -> Result<WorkflowRun, GithubAppError> {
		let url = self.endpoint(&format!(
			"repos/{}/{}/actions/runs/{run_id}",
			seg(owner),
			seg(repo)
		))?;
		let response = self.send(self.request(Method::GET, url, token)).await?;
		parse_json(response).await
	}

	/// Post a comment on an issue or pull request.
	///
	/// Never retried: a timed-out POST may still have landed, and a second
	/// attempt would post a duplicate.
	#[instrument(skip(self, token, body))]
	pub async fn create_issue_comment(
		&self,
		token: &str,
		owner: &str,
		repo: &str,
		issue_number: u64,
		body: &str,
	) -> Result<IssueComment, GithubAppError> {
		#[derive(Serialize)]
		struct CommentBody<'a> {
			body: &'a str,
		}

		let url = self.endpoint(&format!(
			"repos/{}/{}/issues/{issue_number}/comments",
			seg(owner),
			seg(repo)
		))?;
		let response = self
			.send(self.request(Method::POST, url, token).json(&CommentBody { body }))
			.await?;
		let comment: IssueComment = parse_json(response).await?;

		info!(comment_id = comment.id, issue_number, "Posted issue comment");
		Ok(comment)
	}

	/// React to an issue or an issue comment.
	#[instrument(skip(self, token))]
	pub async fn create_reaction(
		&self,
		token: &str,
		owner: &str,
		repo: &str,
		subject: ReactionSubject,
		content: ReactionContent,
	) -> Result<(), GithubAppError> {
		#[derive(Serialize)]
		struct ReactionBody {
			content: ReactionContent,
		}

		let path = match subject {
			ReactionSubject::IssueComment(id) => {
				format!("repos/{}/{}/issues/comments/{id}/reactions", seg(owner), seg(repo))
			}
			ReactionSubject::Issue(number) => {
				format!("repos/{}/{}/issues/{number}/reactions", seg(owner), seg(repo))
			}
		};
		let url = self.endpoint(&path)?;
		self
			.send(self.request(Method::POST, url, token).json(&ReactionBody { content }))
			.await?;
		Ok(())
	}

	fn endpoint(&self, path: &str) -> Result<Url, GithubAppError> {
		self
			.config
			.base_url()
			.join(path)
			.map_err(|e| GithubAppError::Config(format!("Invalid URL: {e}")))
	}

	fn request(&self, method: Method, url: Url, bearer: &str) -> RequestBuilder {
		self
			.http_client
			.request(method, url)
			.header("Authorization", format!("Bearer {bearer}"))
			.header("Accept", "application/vnd.github+json")
			.header("X-GitHub-Api-Version", "2022-11-28")
	}

	async fn send(&self, request: RequestBuilder) -> Result<Response, GithubAppError> {
		let response = request.send().await.map_err(|e| {
			if e.is_timeout() {
				warn!("GitHub request timed out");
				return GithubAppError::Timeout;
			}
			GithubAppError::Network(e)
		})?;

		let status = response.status();
		if !status.is_success() {
			let path = response.url().path().to_string();
			let body = response.text().await.unwrap_or_default();
			return Err(map_github_error(status, &path, &body));
		}

		Ok(response)
	}
}

/// Percent-encode a user-supplied path segment.
fn seg(value: &str) -> std::borrow::Cow<'_, str> {
	urlencoding::encode(value)
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, GithubAppError> {
	response.json().await.map_err(|e| {
		error!(error = %e, "Failed to parse GitHub response");
		GithubAppError::InvalidResponse(format!("JSON parse error: {e}"))
	})
}

/// Map GitHub API error responses to GithubAppError.
pub(crate) fn map_github_error(status: StatusCode, path: &str, body: &str) -> GithubAppError {
	let status_code = status.as_u16();

	match status_code {
		401 => {
			warn!(status = status_code, "Unauthorized request to GitHub");
			GithubAppError::Unauthorized
		}
		403 => {
			let lower = body.to_lowercase();
			if lower.contains("rate limit") || lower.contains("api rate") {
				warn!(status = status_code, "GitHub rate limit exceeded");
				GithubAppError::RateLimited
			} else {
				warn!(status = status_code, "Forbidden request to GitHub");
				GithubAppError::Forbidden
			}
		}
		404 => {
			debug!(path, "GitHub resource not found");
			GithubAppError::NotFound(path.to_string())
		}
		_ => {
			error!(status = status_code, body = %body, "GitHub API error");
			GithubAppError::ApiError {
				status: status_code,
				message: body.to_string(),
			}
		}
	}
}
