// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! The four ways of getting a document's bytes out of the browser.

use crate::renderer::{scripts, CaptureVia, CapturedResponse, PageContext, ResponseMatcher, Trigger};
use crate::types::CandidateArtifact;
use anyhow::{bail, Result};
use std::time::Duration;

/// A retrieval technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    /// Load the URI in a sibling tab and take the main document response.
    DirectNavigation,
    /// `fetch` the URI from inside the result page with its cookies.
    InContextFetch,
    /// Click the candidate's element and capture the response or download.
    ClickCapture,
    /// Navigate the result page itself to the URI and capture what arrives.
    ResponseInterception,
}

impl RetrievalStrategy {
    pub const ORDERED: [RetrievalStrategy; 4] = [
        RetrievalStrategy::DirectNavigation,
        RetrievalStrategy::InContextFetch,
        RetrievalStrategy::ClickCapture,
        RetrievalStrategy::ResponseInterception,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RetrievalStrategy::DirectNavigation => "direct-navigation",
            RetrievalStrategy::InContextFetch => "in-context-fetch",
            RetrievalStrategy::ClickCapture => "click-capture",
            RetrievalStrategy::ResponseInterception => "response-interception",
        }
    }

    /// Run this strategy once. `payload` decides which responses count
    /// for the capture-based strategies.
    pub async fn retrieve(
        &self,
        page: &dyn PageContext,
        candidate: &CandidateArtifact,
        payload: &ResponseMatcher,
        window: Duration,
    ) -> Result<CapturedResponse> {
        match self {
            RetrievalStrategy::DirectNavigation => {
                let trigger = Trigger::OpenInSiblingTab(candidate.uri.clone());
                page.intercept(&trigger, &ResponseMatcher::Document, window)
                    .await
            }
            RetrievalStrategy::InContextFetch => {
                let value = page
                    .execute_js(&scripts::in_context_fetch(&candidate.uri))
                    .await?;
                let fetched = scripts::decode_fetch_result(value)?;
                if fetched.status >= 400 {
                    bail!("in-page fetch returned HTTP {}", fetched.status);
                }
                Ok(CapturedResponse {
                    url: fetched.url,
                    status: Some(fetched.status),
                    content_type: fetched.content_type,
                    body: fetched.body,
                    suggested_filename: None,
                    via: CaptureVia::Response,
                })
            }
            RetrievalStrategy::ClickCapture => {
                let trigger = Trigger::ClickElement {
                    internal_id: candidate.internal_id.clone(),
                    uri: candidate.uri.clone(),
                };
                page.intercept(&trigger, payload, window).await
            }
            RetrievalStrategy::ResponseInterception => {
                let trigger = Trigger::AssignLocation(candidate.uri.clone());
                page.intercept(&trigger, payload, window).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Behavior, Channel, ScriptedPage};

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

    #[test]
    fn test_names_in_order() {
        let names: Vec<_> = RetrievalStrategy::ORDERED.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            ["direct-navigation", "in-context-fetch", "click-capture", "response-interception"]
        );
    }

    #[tokio::test]
    async fn test_in_context_fetch_rejects_http_errors() {
        let mut resp = CapturedResponse::response("https://x/d", Some("text/html"), b"nope".to_vec());
        resp.status = Some(404);
        let page = ScriptedPage::new("https://x/").on(Channel::InPageFetch, Behavior::Respond(resp));

        let err = RetrievalStrategy::InContextFetch
            .retrieve(&page, &candidate(), &ResponseMatcher::Document, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_click_capture_uses_click_channel() {
        let page = ScriptedPage::new("https://x/").on(
            Channel::Click,
            Behavior::Respond(CapturedResponse::download(
                "https://x/d",
                Some("a.pdf"),
                b"%PDF-1.5".to_vec(),
            )),
        );
        let captured = RetrievalStrategy::ClickCapture
            .retrieve(&page, &candidate(), &ResponseMatcher::Document, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(captured.via, CaptureVia::Download);
        assert_eq!(page.calls(), vec!["retrieve click"]);
    }
}
