// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Beacon HTTP server.
//!
//! Exposes the credential broker's token exchanges, the run tracker's start
//! and finalize operations, and the GitHub webhook ingress that feeds the
//! tracker's safety net.

pub mod api;
pub mod api_docs;
pub mod error;
pub mod routes;
pub mod version;

pub use api::{create_app_state, create_router, AppState};
pub use api_docs::ApiDoc;
pub use beacon_server_config::ServerConfig;
pub use error::{ErrorResponse, ServerError};
