// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Common configuration primitives for Beacon.
//!
//! - [`Secret<T>`]: keeps app private keys, webhook secrets and minted tokens
//!   out of logs and config dumps
//! - [`load_secret_env`]: loads secrets from environment variables with
//!   `*_FILE` support

pub mod env;
mod secret;

pub use env::{load_secret_env, SecretEnvError};
pub use secret::{Secret, SecretString, REDACTED};
