// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end fetch: admission, session, form, discovery, selection,
//! retrieval, validation, packaging, teardown.

use crate::config::FetchConfig;
use crate::discovery::DiscoveryEngine;
use crate::error::FetchError;
use crate::limiter::{ConcurrencyLimiter, LimiterStats};
use crate::renderer::{PageContext, Renderer};
use crate::retrieval::RetrievalChain;
use crate::session::SessionManager;
use crate::types::{FetchRequest, FetchedDocument, SearchKey};
use crate::validator::ContentValidator;
use crate::{form, packager, selector};
use anyhow::Context;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Where one pipeline run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Init,
    SessionStarted,
    Navigated,
    FormSubmitted,
    ResultLoaded,
    CandidatesDiscovered,
    ArtifactSelected,
    RetrievalInProgress,
    Validated,
    Done,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance(&self, next: RequestState) -> bool {
        use RequestState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Init, SessionStarted)
                | (SessionStarted, Navigated)
                | (Navigated, FormSubmitted)
                | (FormSubmitted, ResultLoaded)
                | (ResultLoaded, CandidatesDiscovered)
                | (CandidatesDiscovered, ArtifactSelected)
                | (ArtifactSelected, RetrievalInProgress)
                | (RetrievalInProgress, Validated)
                | (Validated, Done)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Logs every transition of one run against its search key.
struct StateTracker<'a> {
    key: &'a SearchKey,
    state: RequestState,
}

impl<'a> StateTracker<'a> {
    fn new(key: &'a SearchKey) -> Self {
        Self {
            key,
            state: RequestState::Init,
        }
    }

    fn advance(&mut self, next: RequestState) {
        if self.state.can_advance(next) {
            tracing::debug!(key = %self.key, from = %self.state, to = %next, "state transition");
            self.state = next;
        } else {
            tracing::warn!(key = %self.key, from = %self.state, to = %next, "illegal state transition ignored");
        }
    }

    fn fail(&mut self, err: &FetchError) {
        tracing::debug!(key = %self.key, from = %self.state, category = err.category(), "run failed");
        self.advance(RequestState::Failed);
    }
}

/// The document fetch pipeline.
pub struct Fetcher {
    config: FetchConfig,
    sessions: SessionManager,
    limiter: ConcurrencyLimiter,
    discovery: DiscoveryEngine,
    retrieval: RetrievalChain,
    validator: ContentValidator,
}

impl Fetcher {
    pub fn new(renderer: Arc<dyn Renderer>, config: FetchConfig) -> anyhow::Result<Self> {
        let discovery = DiscoveryEngine::new(config.target.clone(), config.format.clone())
            .context("invalid route pattern")?;
        let retrieval = RetrievalChain::new(&config.format, &config.target, config.attempt_timeout)
            .context("invalid route pattern")?;
        Ok(Self {
            sessions: SessionManager::new(renderer),
            limiter: ConcurrencyLimiter::new(config.max_sessions),
            validator: ContentValidator::new(&config.format),
            discovery,
            retrieval,
            config,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.sessions.open_sessions()
    }

    pub fn limiter_stats(&self) -> LimiterStats {
        self.limiter.stats()
    }

    /// Fetch one document for `request`.
    ///
    /// The key is validated before any browser work. The admission slot is
    /// held across retries; each run gets a fresh session and its own
    /// deadline.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchedDocument, FetchError> {
        let key = SearchKey::parse(&request.search_key)?;
        let started = Instant::now();
        tracing::info!(key = %key, ordinal = ?request.ordinal, "fetch requested");

        let _slot = self.limiter.acquire().await?;
        let max_runs = self.config.retry_attempts.max(1);

        let mut run = 1;
        loop {
            let result = match tokio::time::timeout(
                self.config.request_timeout,
                self.run_once(&key, request.ordinal, started),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.config.request_timeout)),
            };

            match result {
                Ok(doc) => {
                    tracing::info!(
                        key = %key,
                        filename = %doc.artifact.filename,
                        bytes = doc.artifact.size_bytes,
                        ordinal = doc.selected_ordinal,
                        candidates = doc.candidate_count,
                        elapsed_ms = doc.artifact.elapsed_ms,
                        "document retrieved"
                    );
                    return Ok(doc);
                }
                Err(e) if e.is_retryable() && run < max_runs => {
                    tracing::warn!(
                        key = %key,
                        run,
                        category = e.category(),
                        error = %e,
                        "run failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                    run += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %key, category = e.category(), error = %e, "fetch failed");
                    return Err(e);
                }
            }
        }
    }

    async fn run_once(
        &self,
        key: &SearchKey,
        ordinal: Option<i64>,
        started: Instant,
    ) -> Result<FetchedDocument, FetchError> {
        let mut tracker = StateTracker::new(key);

        let mut session = match self.sessions.open().await {
            Ok(session) => session,
            Err(e) => {
                tracker.fail(&e);
                return Err(e);
            }
        };
        tracker.advance(RequestState::SessionStarted);
        tracing::debug!(key = %key, session = session.id(), "running pipeline");

        let result = session
            .with_page(|page| self.drive(page, key, ordinal, started, &mut tracker))
            .await;
        if let Err(e) = &result {
            tracker.fail(e);
        }

        session.close().await;
        result
    }

    async fn drive(
        &self,
        page: Arc<dyn PageContext>,
        key: &SearchKey,
        ordinal: Option<i64>,
        started: Instant,
        tracker: &mut StateTracker<'_>,
    ) -> Result<FetchedDocument, FetchError> {
        let page = page.as_ref();

        form::open_entry(page, &self.config).await?;
        tracker.advance(RequestState::Navigated);

        form::fill_and_submit(page, key, &self.config).await?;
        tracker.advance(RequestState::FormSubmitted);
        tracker.advance(RequestState::ResultLoaded);

        let candidates = self.discovery.discover(page).await?;
        if candidates.is_empty() {
            return Err(FetchError::NoCandidates);
        }
        tracker.advance(RequestState::CandidatesDiscovered);

        let candidate = selector::select(&candidates, ordinal)?.clone();
        tracing::debug!(
            key = %key,
            ordinal = candidate.ordinal,
            name = %candidate.display_name,
            uri = %candidate.uri,
            "candidate selected"
        );
        tracker.advance(RequestState::ArtifactSelected);

        tracker.advance(RequestState::RetrievalInProgress);
        let screen = |bytes: &[u8]| self.validator.validate(bytes);
        let (response, attempts) = self.retrieval.retrieve(page, &candidate, &screen).await?;
        tracker.advance(RequestState::Validated);

        let artifact = packager::package(response, &candidate, &self.config.format, started.elapsed());
        tracker.advance(RequestState::Done);

        Ok(FetchedDocument {
            artifact,
            selected_ordinal: candidate.ordinal,
            candidate,
            candidate_count: candidates.len(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestState::*;

    #[test]
    fn test_linear_transitions() {
        let order = [
            Init,
            SessionStarted,
            Navigated,
            FormSubmitted,
            ResultLoaded,
            CandidatesDiscovered,
            ArtifactSelected,
            RetrievalInProgress,
            Validated,
            Done,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].can_advance(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Init.can_advance(Navigated));
        assert!(!Validated.can_advance(ResultLoaded));
    }

    #[test]
    fn test_failure_reachable_from_non_terminal_only() {
        assert!(Init.can_advance(Failed));
        assert!(RetrievalInProgress.can_advance(Failed));
        assert!(!Done.can_advance(Failed));
        assert!(!Failed.can_advance(Failed));
    }
}
