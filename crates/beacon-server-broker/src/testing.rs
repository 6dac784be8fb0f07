// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! In-process stand-ins for the identity provider and the GitHub App API.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use beacon_common_config::SecretString;
use beacon_server_github_app::{
	CollaboratorPermission, GithubAppError, InstallationPermissions, RepositoryPermissions,
	ScopedAccessToken,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};

use crate::error::BrokerError;
use crate::github::AppApi;
use crate::oidc::{KeySetSource, GITHUB_ACTIONS_ISSUER};

pub const TEST_KID: &str = "beacon-test-key";

/// RSA generation is slow in debug builds, so keys are shared per key id.
fn key_for(kid: &str) -> RsaPrivateKey {
	static KEYS: OnceLock<Mutex<HashMap<String, RsaPrivateKey>>> = OnceLock::new();
	let keys = KEYS.get_or_init(|| Mutex::new(HashMap::new()));
	let mut keys = keys.lock().expect("test key lock poisoned");
	keys
		.entry(kid.to_string())
		.or_insert_with(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate RSA key"))
		.clone()
}

/// Signs identity tokens the way the Actions OIDC provider does.
pub struct TestIssuer {
	kid: String,
	audience: String,
	key: RsaPrivateKey,
}

impl TestIssuer {
	pub fn new(audience: &str) -> Self {
		Self::with_kid(audience, TEST_KID)
	}

	pub fn with_kid(audience: &str, kid: &str) -> Self {
		Self {
			kid: kid.to_string(),
			audience: audience.to_string(),
			key: key_for(kid),
		}
	}

	pub fn key_set(&self) -> JwkSet {
		let public = self.key.to_public_key();
		serde_json::from_value(json!({
			"keys": [{
				"kty": "RSA",
				"use": "sig",
				"alg": "RS256",
				"kid": self.kid,
				"n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
				"e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
			}]
		}))
		.expect("valid JWK set")
	}

	/// Claims for a workflow in `repository` (`owner/name`) triggered by `actor`.
	pub fn claims(&self, repository: &str, actor: &str) -> Value {
		let now = Utc::now();
		let owner = repository.split('/').next().unwrap_or_default();
		json!({
			"iss": GITHUB_ACTIONS_ISSUER,
			"aud": self.audience,
			"sub": format!("repo:{repository}:ref:refs/heads/main"),
			"repository": repository,
			"repository_owner": owner,
			"actor": actor,
			"run_id": "4242",
			"event_name": "issue_comment",
			"workflow": "beacon",
			"ref": "refs/heads/main",
			"iat": now.timestamp(),
			"nbf": (now - ChronoDuration::seconds(5)).timestamp(),
			"exp": (now + ChronoDuration::minutes(5)).timestamp(),
		})
	}

	pub fn sign(&self, claims: &Value) -> String {
		let pem = self
			.key
			.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
			.expect("encode private key");
		let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("load signing key");
		let mut header = Header::new(Algorithm::RS256);
		header.kid = Some(self.kid.clone());
		encode(&header, claims, &key).expect("sign token")
	}

	pub fn token_for(&self, repository: &str, actor: &str) -> String {
		self.sign(&self.claims(repository, actor))
	}
}

/// Serves a fixed key set and counts fetches.
pub struct StaticKeySetSource {
	set: Mutex<JwkSet>,
	fetches: AtomicUsize,
}

impl StaticKeySetSource {
	pub fn new(set: JwkSet) -> Self {
		Self {
			set: Mutex::new(set),
			fetches: AtomicUsize::new(0),
		}
	}

	/// Simulate key rotation at the provider.
	pub fn replace(&self, set: JwkSet) {
		*self.set.lock().expect("key set lock poisoned") = set;
	}

	pub fn fetch_count(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl KeySetSource for StaticKeySetSource {
	async fn fetch(&self) -> Result<JwkSet, BrokerError> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		Ok(self.set.lock().expect("key set lock poisoned").clone())
	}
}

/// A token minted by [`FakeAppApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRecord {
	pub installation_id: u64,
	pub repository: String,
	pub permissions: InstallationPermissions,
}

#[derive(Default)]
struct FakeState {
	installations: HashMap<String, u64>,
	uninstalled: HashSet<u64>,
	collaborators: HashMap<(String, String), String>,
	user_tokens: HashMap<String, HashMap<String, RepositoryPermissions>>,
	lookups_fail: bool,
	minted: Vec<MintRecord>,
	lookups: usize,
}

/// Scriptable [`AppApi`].
#[derive(Default)]
pub struct FakeAppApi {
	state: Mutex<FakeState>,
}

impl FakeAppApi {
	pub fn new() -> Self {
		Self::default()
	}

	fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
		self.state.lock().expect("fake state lock poisoned")
	}

	pub fn install(&self, owner: &str, repo: &str, installation_id: u64) {
		self
			.state()
			.installations
			.insert(format!("{owner}/{repo}"), installation_id);
		self.state().uninstalled.remove(&installation_id);
	}

	/// The installation disappears: lookups miss and minting against the old
	/// id returns 404.
	pub fn uninstall(&self, owner: &str, repo: &str) {
		let mut state = self.state();
		if let Some(id) = state.installations.remove(&format!("{owner}/{repo}")) {
			state.uninstalled.insert(id);
		}
	}

	/// The app was reinstalled under a new id; the old id now 404s.
	pub fn reinstall(&self, owner: &str, repo: &str, installation_id: u64) {
		self.uninstall(owner, repo);
		self.install(owner, repo, installation_id);
	}

	pub fn grant_collaborator(&self, repository: &str, username: &str, permission: &str) {
		self.state().collaborators.insert(
			(repository.to_string(), username.to_string()),
			permission.to_string(),
		);
	}

	pub fn grant_user_token(&self, user_token: &str, repository: &str, permissions: RepositoryPermissions) {
		self
			.state()
			.user_tokens
			.entry(user_token.to_string())
			.or_default()
			.insert(repository.to_string(), permissions);
	}

	pub fn fail_lookups(&self, fail: bool) {
		self.state().lookups_fail = fail;
	}

	pub fn minted(&self) -> Vec<MintRecord> {
		self.state().minted.clone()
	}

	pub fn lookup_count(&self) -> usize {
		self.state().lookups
	}
}

#[async_trait]
impl AppApi for FakeAppApi {
	async fn find_installation(&self, owner: &str, repo: &str) -> Result<Option<u64>, GithubAppError> {
		let mut state = self.state();
		state.lookups += 1;
		if state.lookups_fail {
			return Err(GithubAppError::api_error(503, "service unavailable"));
		}
		Ok(state.installations.get(&format!("{owner}/{repo}")).copied())
	}

	async fn create_scoped_token(
		&self,
		installation_id: u64,
		repository: &str,
		permissions: &InstallationPermissions,
	) -> Result<ScopedAccessToken, GithubAppError> {
		let mut state = self.state();
		if state.uninstalled.contains(&installation_id) {
			return Err(GithubAppError::NotFound(format!(
				"/app/installations/{installation_id}/access_tokens"
			)));
		}
		state.minted.push(MintRecord {
			installation_id,
			repository: repository.to_string(),
			permissions: *permissions,
		});
		Ok(ScopedAccessToken {
			token: SecretString::new(format!("ghs_{installation_id}_{}", state.minted.len())),
			expires_at: Utc::now() + ChronoDuration::hours(1),
			repository: repository.to_string(),
			permissions: *permissions,
		})
	}

	async fn collaborator_permission(
		&self,
		_token: &str,
		owner: &str,
		repo: &str,
		username: &str,
	) -> Result<CollaboratorPermission, GithubAppError> {
		let state = self.state();
		match state
			.collaborators
			.get(&(format!("{owner}/{repo}"), username.to_string()))
		{
			Some(permission) => Ok(CollaboratorPermission {
				permission: permission.clone(),
				role_name: None,
			}),
			None => Err(GithubAppError::NotFound(format!(
				"/repos/{owner}/{repo}/collaborators/{username}/permission"
			))),
		}
	}

	async fn user_repository_permissions(
		&self,
		user_token: &str,
		owner: &str,
		repo: &str,
	) -> Result<RepositoryPermissions, GithubAppError> {
		let state = self.state();
		let Some(repos) = state.user_tokens.get(user_token) else {
			return Err(GithubAppError::Unauthorized);
		};
		repos
			.get(&format!("{owner}/{repo}"))
			.cloned()
			.ok_or_else(|| GithubAppError::NotFound(format!("/repos/{owner}/{repo}")))
	}
}
