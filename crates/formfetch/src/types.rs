// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core data types flowing through one fetch request.
//!
//! Nothing here outlives the request that created it.

use crate::error::FetchError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the target record, as typed into the search form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchKey(String);

impl SearchKey {
    /// Accept any key that is non-empty after trimming.
    ///
    /// The target application owns "not found" semantics, so no further
    /// structural checks are made.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FetchError::Validation(
                "search key is required and must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The plain `(search key, ordinal)` pair handed over by the host layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub search_key: String,
    /// 1-based index of the document to fetch. Out-of-range values fall
    /// back to the first candidate.
    #[serde(default)]
    pub ordinal: Option<i64>,
}

impl FetchRequest {
    pub fn new(search_key: impl Into<String>) -> Self {
        Self {
            search_key: search_key.into(),
            ordinal: None,
        }
    }

    pub fn with_ordinal(mut self, ordinal: i64) -> Self {
        self.ordinal = Some(ordinal);
        self
    }
}

/// A page element believed to reference a downloadable document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateArtifact {
    /// 1-based position after ranking.
    pub ordinal: usize,
    pub display_name: String,
    /// Trailing numeric segment of a recognised download route.
    pub internal_id: Option<String>,
    /// Absolute target of the element.
    pub uri: String,
    pub status_label: Option<String>,
    /// Merged relevance score.
    pub score: f32,
    /// Discovery strategies that matched this element.
    pub matched_by: Vec<String>,
}

impl CandidateArtifact {
    /// Identity used for deduplication: the internal id when known,
    /// otherwise the URI.
    pub fn identity(&self) -> &str {
        self.internal_id.as_deref().unwrap_or(&self.uri)
    }
}

/// Outcome of a single retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Rejected,
}

/// Diagnostic record of one retrieval strategy run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalAttempt {
    pub strategy_name: String,
    pub outcome: AttemptOutcome,
    pub byte_length: usize,
    pub content_type: Option<String>,
    pub detail: Option<String>,
}

impl RetrievalAttempt {
    pub fn succeeded(strategy: &str, byte_length: usize, content_type: Option<String>) -> Self {
        Self {
            strategy_name: strategy.to_string(),
            outcome: AttemptOutcome::Success,
            byte_length,
            content_type,
            detail: None,
        }
    }

    pub fn timed_out(strategy: &str) -> Self {
        Self {
            strategy_name: strategy.to_string(),
            outcome: AttemptOutcome::Timeout,
            byte_length: 0,
            content_type: None,
            detail: None,
        }
    }

    pub fn rejected(
        strategy: &str,
        byte_length: usize,
        content_type: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            strategy_name: strategy.to_string(),
            outcome: AttemptOutcome::Rejected,
            byte_length,
            content_type,
            detail: Some(detail.into()),
        }
    }
}

/// A validated document ready to hand back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedArtifact {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: usize,
    pub elapsed_ms: u64,
}

/// Success value of the pipeline: the artifact plus request metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedDocument {
    pub artifact: RetrievedArtifact,
    pub candidate: CandidateArtifact,
    pub candidate_count: usize,
    pub selected_ordinal: usize,
    pub attempts: Vec<RetrievalAttempt>,
}
