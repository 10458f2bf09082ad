// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ordered retrieval strategies tried until one yields an acceptable
//! payload.
//!
//! Each strategy runs under its own timeout. A payload the caller's screen
//! refuses counts as a rejected attempt and the chain moves on.

pub mod strategies;

use crate::config::{DocumentFormat, TargetProfile};
use crate::error::{FetchError, InvalidContentKind};
use crate::renderer::{CapturedResponse, PageContext, ResponseMatcher};
use crate::types::{CandidateArtifact, RetrievalAttempt};
use regex::Regex;
use std::time::Duration;
pub use strategies::RetrievalStrategy;

/// Payload acceptance check applied to every captured body.
pub type Screen<'a> = &'a (dyn Fn(&[u8]) -> Result<(), FetchError> + Send + Sync);

/// Runs the retrieval strategies in order.
pub struct RetrievalChain {
    strategies: Vec<RetrievalStrategy>,
    attempt_timeout: Duration,
    payload: ResponseMatcher,
}

impl RetrievalChain {
    pub fn new(
        format: &DocumentFormat,
        profile: &TargetProfile,
        attempt_timeout: Duration,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            strategies: RetrievalStrategy::ORDERED.to_vec(),
            attempt_timeout,
            payload: ResponseMatcher::Payload {
                content_types: format.wire_content_types.clone(),
                uri_pattern: Some(Regex::new(&profile.route_pattern)?),
            },
        })
    }

    /// Replace the strategy order.
    pub fn with_strategies(mut self, strategies: Vec<RetrievalStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Retrieve `candidate`, returning the first screened payload and the
    /// attempts made up to and including it.
    pub async fn retrieve(
        &self,
        page: &dyn PageContext,
        candidate: &CandidateArtifact,
        screen: Screen<'_>,
    ) -> Result<(CapturedResponse, Vec<RetrievalAttempt>), FetchError> {
        let mut attempts = Vec::with_capacity(self.strategies.len());
        let mut refused: Option<(InvalidContentKind, String)> = None;

        for strategy in &self.strategies {
            let name = strategy.name();
            tracing::debug!(strategy = name, uri = %candidate.uri, "retrieval attempt");

            let run = strategy.retrieve(page, candidate, &self.payload, self.attempt_timeout);
            let response = match tokio::time::timeout(self.attempt_timeout, run).await {
                Err(_) => {
                    tracing::debug!(strategy = name, "retrieval attempt timed out");
                    attempts.push(RetrievalAttempt::timed_out(name));
                    continue;
                }
                Ok(Err(e)) => {
                    let detail = format!("{e:#}");
                    tracing::debug!(strategy = name, error = %detail, "retrieval attempt failed");
                    attempts.push(RetrievalAttempt::rejected(name, 0, None, detail));
                    continue;
                }
                Ok(Ok(response)) => response,
            };

            let length = response.body.len();
            let content_type = response.content_type.clone();
            if length == 0 {
                attempts.push(RetrievalAttempt::rejected(name, 0, content_type, "empty body"));
                continue;
            }

            match screen(&response.body) {
                Ok(()) => {
                    tracing::debug!(strategy = name, bytes = length, via = ?response.via, "retrieval succeeded");
                    attempts.push(RetrievalAttempt::succeeded(name, length, content_type));
                    return Ok((response, attempts));
                }
                Err(e) => {
                    tracing::warn!(strategy = name, bytes = length, error = %e, "payload refused");
                    attempts.push(RetrievalAttempt::rejected(
                        name,
                        length,
                        content_type,
                        e.to_string(),
                    ));
                    if let FetchError::InvalidContent { kind, message } = e {
                        if refused.as_ref().map_or(true, |(k, _)| rank(kind) > rank(*k)) {
                            refused = Some((kind, message));
                        }
                    }
                }
            }
        }

        match refused {
            Some((kind, message)) => Err(FetchError::InvalidContent { kind, message }),
            None => Err(FetchError::RetrievalFailed { attempts }),
        }
    }
}

fn rank(kind: InvalidContentKind) -> u8 {
    match kind {
        InvalidContentKind::Markup => 2,
        InvalidContentKind::Signature => 1,
        InvalidContentKind::Empty => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Behavior, Channel, ScriptedPage};
    use crate::types::AttemptOutcome;
    use crate::validator::ContentValidator;

    fn chain(timeout_ms: u64) -> RetrievalChain {
        RetrievalChain::new(
            &DocumentFormat::default(),
            &TargetProfile::default(),
            Duration::from_millis(timeout_ms),
        )
        .unwrap()
    }

    fn candidate() -> CandidateArtifact {
        CandidateArtifact {
            ordinal: 1,
            display_name: "a.pdf".into(),
            internal_id: Some("9".into()),
            uri: "https://x/DownloadConsultaPublica/9".into(),
            status_label: None,
            score: 3.0,
            matched_by: Vec::new(),
        }
    }

    fn pdf() -> Behavior {
        Behavior::Respond(CapturedResponse::response(
            "https://x/d",
            Some("application/pdf"),
            b"%PDF-1.4 body".to_vec(),
        ))
    }

    fn html() -> Behavior {
        Behavior::Respond(CapturedResponse::response(
            "https://x/d",
            Some("text/html"),
            b"<!DOCTYPE html><html>Sessao expirada</html>".to_vec(),
        ))
    }

    #[tokio::test]
    async fn test_falls_through_to_first_working_strategy() {
        let page = ScriptedPage::new("https://x/")
            .on(Channel::SiblingTab, Behavior::Fail("net::ERR_ABORTED".into()))
            .on(Channel::InPageFetch, Behavior::Hang)
            .on(Channel::Click, pdf());
        let validator = ContentValidator::new(&DocumentFormat::default());
        let screen = |b: &[u8]| validator.validate(b);

        let (resp, attempts) = chain(50).retrieve(&page, &candidate(), &screen).await.unwrap();
        assert!(resp.body.starts_with(b"%PDF-"));
        let outcomes: Vec<_> = attempts.iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            [AttemptOutcome::Rejected, AttemptOutcome::Timeout, AttemptOutcome::Success]
        );
        assert_eq!(attempts[2].strategy_name, "click-capture");
    }

    #[tokio::test]
    async fn test_markup_payload_moves_on_then_reports_content_error() {
        let page = ScriptedPage::new("https://x/")
            .on(Channel::SiblingTab, html())
            .on(
                Channel::InPageFetch,
                Behavior::Respond(CapturedResponse::response("https://x/d", None, b"GIF89a".to_vec())),
            );
        let validator = ContentValidator::new(&DocumentFormat::default());
        let screen = |b: &[u8]| validator.validate(b);

        let err = chain(50).retrieve(&page, &candidate(), &screen).await.unwrap_err();
        match err {
            FetchError::InvalidContent { kind, .. } => assert_eq!(kind, InvalidContentKind::Markup),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            page.calls(),
            [
                "retrieve sibling-tab",
                "retrieve in-page-fetch",
                "retrieve click",
                "retrieve assign-location"
            ]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_without_payload() {
        let page = ScriptedPage::new("https://x/")
            .on(
                Channel::SiblingTab,
                Behavior::Respond(CapturedResponse::response("https://x/d", None, Vec::new())),
            );
        let screen = |_: &[u8]| -> Result<(), FetchError> { Ok(()) };
        let err = chain(50).retrieve(&page, &candidate(), &screen).await.unwrap_err();
        match err {
            FetchError::RetrievalFailed { attempts } => {
                assert_eq!(attempts.len(), 4);
                assert_eq!(attempts[0].detail.as_deref(), Some("empty body"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
