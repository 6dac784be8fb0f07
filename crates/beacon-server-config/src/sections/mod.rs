// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

mod broker;
mod database;
mod github_app;
mod http;
mod logging;
mod oidc;
mod tracker;

pub use broker::{BrokerConfig, BrokerConfigLayer};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use github_app::{GithubAppConfigLayer, GithubAppSettings, DEFAULT_GITHUB_API_URL};
pub use http::{HttpConfig, HttpConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use oidc::{OidcConfigLayer, OidcSettings};
pub use tracker::{TrackerConfig, TrackerConfigLayer};
