// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the fetch pipeline.
//!
//! Every chain in the core absorbs individual failures; one of these errors
//! surfaces only when a whole chain is exhausted.

use crate::types::{AttemptOutcome, RetrievalAttempt};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a payload failed signature validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidContentKind {
    /// Nothing was returned.
    Empty,
    /// The payload is an HTML/XML document, usually an error or
    /// session-expired page served in place of the file.
    Markup,
    /// Bytes are present but do not carry the expected signature.
    Signature,
}

/// All errors the fetch pipeline can surface to its caller.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("no element matched the {chain} selector chain (tried: {})", tried.join(", "))]
    ElementNotFound { chain: String, tried: Vec<String> },

    #[error("no downloadable document was found on the result page")]
    NoCandidates,

    #[error("every retrieval strategy failed: {}", summarize_attempts(attempts))]
    RetrievalFailed { attempts: Vec<RetrievalAttempt> },

    #[error("{message}")]
    InvalidContent {
        kind: InvalidContentKind,
        message: String,
    },

    #[error("browser session error: {0}")]
    Session(String),

    #[error("request exceeded its {}ms deadline", .0.as_millis())]
    Timeout(Duration),
}

impl FetchError {
    /// Stable, machine-readable category name.
    pub fn category(&self) -> &'static str {
        match self {
            FetchError::Validation(_) => "validation_error",
            FetchError::ElementNotFound { .. } => "element_not_found",
            FetchError::NoCandidates => "no_candidates",
            FetchError::RetrievalFailed { .. } => "retrieval_failed",
            FetchError::InvalidContent { .. } => "invalid_content",
            FetchError::Session(_) => "session_error",
            FetchError::Timeout(_) => "timeout",
        }
    }

    /// Whether a fresh run of the whole pipeline could plausibly succeed.
    ///
    /// A markup payload usually means the anonymous session expired
    /// mid-flow, so it is retried; a wrong signature is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Session(_) | FetchError::Timeout(_) => true,
            FetchError::RetrievalFailed { .. } => true,
            FetchError::InvalidContent { kind, .. } => *kind == InvalidContentKind::Markup,
            FetchError::Validation(_)
            | FetchError::ElementNotFound { .. }
            | FetchError::NoCandidates => false,
        }
    }

    /// Wrap a backend failure as a session error, keeping the whole chain.
    pub fn session(err: anyhow::Error) -> Self {
        FetchError::Session(format!("{err:#}"))
    }

    /// Build the caller-facing failure description for this error.
    pub fn report(&self, search_key: &str) -> FailureReport {
        FailureReport {
            error_category: self.category().to_string(),
            message: self.to_string(),
            search_key: search_key.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Caller-facing failure: category, message and the echoed key only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub error_category: String,
    pub message: String,
    pub search_key: String,
    pub timestamp: String,
}

fn summarize_attempts(attempts: &[RetrievalAttempt]) -> String {
    if attempts.is_empty() {
        return "no strategy was attempted".to_string();
    }
    attempts
        .iter()
        .map(|a| {
            let outcome = match a.outcome {
                AttemptOutcome::Success => "success",
                AttemptOutcome::Timeout => "timeout",
                AttemptOutcome::Rejected => "rejected",
            };
            match &a.detail {
                Some(detail) => format!("{} ({outcome}: {detail})", a.strategy_name),
                None => format!("{} ({outcome})", a.strategy_name),
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_stable() {
        assert_eq!(FetchError::NoCandidates.category(), "no_candidates");
        assert_eq!(
            FetchError::Validation("empty".into()).category(),
            "validation_error"
        );
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(180)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_timeout_message_keeps_sub_second_deadlines() {
        let msg = FetchError::Timeout(Duration::from_millis(50)).to_string();
        assert_eq!(msg, "request exceeded its 50ms deadline");
        let msg = FetchError::Timeout(Duration::from_secs(180)).to_string();
        assert_eq!(msg, "request exceeded its 180000ms deadline");
    }

    #[test]
    fn test_retrieval_failed_lists_attempts() {
        let err = FetchError::RetrievalFailed {
            attempts: vec![
                RetrievalAttempt::timed_out("direct-navigation"),
                RetrievalAttempt::rejected("in-context-fetch", 0, None, "empty body"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("direct-navigation (timeout)"));
        assert!(msg.contains("in-context-fetch (rejected: empty body)"));
    }

    #[test]
    fn test_retry_policy() {
        assert!(FetchError::Session("gone".into()).is_retryable());
        assert!(!FetchError::NoCandidates.is_retryable());
        assert!(FetchError::InvalidContent {
            kind: InvalidContentKind::Markup,
            message: String::new(),
        }
        .is_retryable());
        assert!(!FetchError::InvalidContent {
            kind: InvalidContentKind::Signature,
            message: String::new(),
        }
        .is_retryable());
    }

    #[test]
    fn test_report_echoes_key() {
        let report = FetchError::NoCandidates.report("15414.900381/2013-67");
        assert_eq!(report.error_category, "no_candidates");
        assert_eq!(report.search_key, "15414.900381/2013-67");
        assert!(report.timestamp.ends_with('Z'));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("errorCategory").is_some());
        assert!(json.get("searchKey").is_some());
    }
}
