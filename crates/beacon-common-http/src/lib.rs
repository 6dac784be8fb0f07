// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Beacon.
//!
//! This crate provides:
//! - A pre-configured HTTP client builder with a consistent User-Agent header
//! - Retry logic with exponential backoff for transient GitHub failures

mod client;
mod retry;

pub use client::{builder, new_client_with_timeout, user_agent};
pub use retry::{retry, RetryConfig, RetryableError};
