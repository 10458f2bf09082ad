// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Formfetch: retrieve documents that are only reachable through a public
//! web search form.
//!
//! A request carries a search key and an optional 1-based ordinal. The
//! pipeline opens an isolated headless browser, submits the search, ranks
//! the document links on the result page, retrieves the selected one through
//! an ordered chain of strategies and returns it only if its bytes carry the
//! expected signature.

pub mod config;
pub mod discovery;
pub mod error;
pub mod form;
pub mod limiter;
pub mod mock;
pub mod packager;
pub mod pipeline;
pub mod renderer;
pub mod retrieval;
pub mod selector;
pub mod session;
pub mod types;
pub mod validator;

pub use config::FetchConfig;
pub use error::{FailureReport, FetchError, InvalidContentKind};
pub use pipeline::{Fetcher, RequestState};
pub use types::{
    CandidateArtifact, FetchRequest, FetchedDocument, RetrievalAttempt, RetrievedArtifact,
    SearchKey,
};

/// Crate version, reported by health checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
