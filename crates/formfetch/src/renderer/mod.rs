// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Renderer abstraction for browser automation.
//!
//! Defines the `Renderer` and `PageContext` traits that abstract over the
//! browser engine (currently Chromium via chromiumoxide). Every page
//! operation is a suspension point; none blocks other sessions.

pub mod chromium;
pub mod scripts;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// How captured bytes reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureVia {
    /// A network response body.
    Response,
    /// A file written by the browser's download manager.
    Download,
}

/// Bytes captured from the browser together with what it declared.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub url: String,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Filename proposed by the download manager, if any.
    pub suggested_filename: Option<String>,
    pub via: CaptureVia,
}

impl CapturedResponse {
    /// A plain network response.
    pub fn response(url: &str, content_type: Option<&str>, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            status: Some(200),
            content_type: content_type.map(String::from),
            body,
            suggested_filename: None,
            via: CaptureVia::Response,
        }
    }

    /// A completed download.
    pub fn download(url: &str, suggested_filename: Option<&str>, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            content_type: None,
            body,
            suggested_filename: suggested_filename.map(String::from),
            via: CaptureVia::Download,
        }
    }
}

/// What sets the capture in motion once listeners are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Load the URL in a sibling tab of the same browser context, leaving
    /// the current page untouched.
    OpenInSiblingTab(String),
    /// Click the element that references this candidate.
    ClickElement {
        internal_id: Option<String>,
        uri: String,
    },
    /// Point the current page at the URL.
    AssignLocation(String),
}

/// Which network responses a capture accepts.
#[derive(Debug, Clone)]
pub enum ResponseMatcher {
    /// The main document of the navigation, whatever its type. A document
    /// served as an attachment is captured as the download it turns into.
    Document,
    /// Any response carrying one of the content types or whose URL
    /// matches the pattern. Completed downloads are accepted too.
    Payload {
        content_types: Vec<String>,
        uri_pattern: Option<Regex>,
    },
}

impl ResponseMatcher {
    /// Whether a response should be captured.
    pub fn matches(&self, url: &str, mime_type: &str, is_document: bool) -> bool {
        match self {
            ResponseMatcher::Document => is_document,
            ResponseMatcher::Payload {
                content_types,
                uri_pattern,
            } => {
                let mime = mime_type
                    .split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_ascii_lowercase();
                content_types.iter().any(|ct| ct.eq_ignore_ascii_case(&mime))
                    || uri_pattern.as_ref().is_some_and(|re| re.is_match(url))
            }
        }
    }

}

/// What a capture does when a response it was waiting on fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedResponse {
    /// Aborted because the browser handed it to the download manager.
    /// Keep waiting, but only briefly, for the download to begin.
    AwaitDownload,
    /// A real network failure; the capture is over.
    Abort,
}

impl FailedResponse {
    pub fn classify(error_text: &str, canceled: bool) -> Self {
        if canceled || error_text.contains("ERR_ABORTED") {
            FailedResponse::AwaitDownload
        } else {
            FailedResponse::Abort
        }
    }
}

/// A browser engine that can create isolated contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new isolated browser context with one page.
    async fn new_context(&self) -> Result<Box<dyn PageContext>>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser page driven by one request.
#[async_trait]
pub trait PageContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationResult>;
    /// Wait until a pending navigation settles.
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<()>;
    /// Whether the selector matches at least one element.
    async fn exists(&self, selector: &str) -> Result<bool>;
    /// Clear the matched field, then type `text` into it.
    async fn type_into(&self, selector: &str, text: &str) -> Result<()>;
    /// Click the first element matching the selector.
    async fn click(&self, selector: &str) -> Result<()>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Install response/download listeners, fire the trigger and return the
    /// first matching capture within `window`.
    async fn intercept(
        &self,
        trigger: &Trigger,
        matcher: &ResponseMatcher,
        window: Duration,
    ) -> Result<CapturedResponse>;
    /// Release the context. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// A renderer used when no browser is available.
///
/// Every session fails to open with a clear message, which keeps the host
/// process up for health checks and diagnostics.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn PageContext>> {
        Err(anyhow::anyhow!(
            "browser not available; set FORMFETCH_CHROMIUM_PATH or install Chromium"
        ))
    }
    fn active_contexts(&self) -> usize {
        0
    }
}
