//! # Data Retrieval Module
//!
//! This module provides a centralized location for the upstream HTTP client
//! used by every stream.
//!
//! ## Purpose:
//! The goal of the `retrieve` module is to offer a consistent and robust way
//! to fetch data from the upstream game API, encapsulating common concerns such
//! as URL joining, bearer authentication, error classification and retry with
//! exponential backoff. This keeps networking logic out of the snapshot
//! fetcher and the stream domains.
//!
//! ## Contained Modules:
//!
//! - **`upstream_http`**: `UpstreamClient`, built on `reqwest` and
//!   `reqwest-middleware`, retrying network failures and rate-limit (429)
//!   responses with capped exponential backoff.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Upstream HTTP client with retry middleware for resilient network requests.
pub mod upstream_http;

pub use upstream_http::{RetrySettings, UpstreamClient, UpstreamError};
