//! # Upstream Game API Module
//!
//! Wire models and endpoint calls of the upstream game API the streams poll.
//!
//! ## Contained Modules:
//!
//! - **`spacetraders`**: flight plan, marketplace and system listing models,
//!   plus the typed calls that fetch them through the shared
//!   `UpstreamClient`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// SpaceTraders API models and calls.
pub mod spacetraders;
