// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory browser.
//!
//! Serves a fixed result page and answers each retrieval trigger with a
//! scripted behavior. Every call is appended to a shared log so tests can
//! assert on ordering across sessions.

use crate::renderer::{
    CapturedResponse, NavigationResult, PageContext, Renderer, ResponseMatcher, Trigger,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The route a retrieval takes into the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    SiblingTab,
    InPageFetch,
    Click,
    AssignLocation,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::SiblingTab => "sibling-tab",
            Channel::InPageFetch => "in-page-fetch",
            Channel::Click => "click",
            Channel::AssignLocation => "assign-location",
        };
        f.write_str(name)
    }
}

/// How a channel answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    Respond(CapturedResponse),
    /// Never completes.
    Hang,
    Fail(String),
}

#[derive(Default)]
struct RendererState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// A scripted page. Usable on its own or as the template a
/// [`ScriptedRenderer`] clones for every context.
#[derive(Clone)]
pub struct ScriptedPage {
    url: String,
    html: String,
    present: Vec<String>,
    behaviors: HashMap<Channel, Behavior>,
    navigate_failure: Option<String>,
    navigation_hangs: bool,
    latency: Duration,
    log: Arc<Mutex<Vec<String>>>,
    renderer: Option<Arc<RendererState>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedPage {
    /// A page at `url` with the default search input and submit button.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            html: "<html><body></body></html>".to_string(),
            present: vec!["#txtNumeroProcesso".to_string(), "#btnConsultar".to_string()],
            behaviors: HashMap::new(),
            navigate_failure: None,
            navigation_hangs: false,
            latency: Duration::ZERO,
            log: Arc::new(Mutex::new(Vec::new())),
            renderer: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// HTML returned once the search has been submitted.
    pub fn with_html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    /// Replace the set of selectors that resolve to an element.
    pub fn with_selectors(mut self, selectors: &[&str]) -> Self {
        self.present = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn on(mut self, channel: Channel, behavior: Behavior) -> Self {
        self.behaviors.insert(channel, behavior);
        self
    }

    pub fn failing_navigation(mut self, message: &str) -> Self {
        self.navigate_failure = Some(message.to_string());
        self
    }

    /// Post-submit navigation never settles.
    pub fn hanging_navigation(mut self) -> Self {
        self.navigation_hangs = true;
        self
    }

    /// Delay applied to every navigation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every call made so far, across all contexts sharing this template.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, entry: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }

    fn behavior(&self, channel: Channel) -> Behavior {
        self.behaviors
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| Behavior::Fail(format!("nothing scripted for {channel}")))
    }
}

#[async_trait]
impl PageContext for ScriptedPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<NavigationResult> {
        self.record(format!("navigate {url}"));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(message) = &self.navigate_failure {
            bail!("{message}");
        }
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: self.latency.as_millis() as u64,
        })
    }

    async fn wait_for_navigation(&self, _timeout: Duration) -> Result<()> {
        if self.navigation_hangs {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.present.iter().any(|s| s == selector))
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<()> {
        if !self.present.iter().any(|s| s == selector) {
            bail!("element not found: {selector}");
        }
        self.record(format!("type {selector} {text}"));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.record(format!("click {selector}"));
        Ok(())
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        if !script.contains("credentials: 'include'") {
            return Ok(json!(true));
        }
        self.record(format!("retrieve {}", Channel::InPageFetch));
        match self.behavior(Channel::InPageFetch) {
            Behavior::Respond(resp) => Ok(json!({
                "status": resp.status.unwrap_or(200),
                "url": resp.url,
                "contentType": resp.content_type,
                "length": resp.body.len(),
                "data": base64::engine::general_purpose::STANDARD.encode(&resp.body),
            })),
            Behavior::Hang => futures::future::pending().await,
            Behavior::Fail(message) => bail!("{message}"),
        }
    }

    async fn get_html(&self) -> Result<String> {
        Ok(self.html.clone())
    }

    async fn get_url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn intercept(
        &self,
        trigger: &Trigger,
        _matcher: &ResponseMatcher,
        _window: Duration,
    ) -> Result<CapturedResponse> {
        let channel = match trigger {
            Trigger::OpenInSiblingTab(_) => Channel::SiblingTab,
            Trigger::ClickElement { .. } => Channel::Click,
            Trigger::AssignLocation(_) => Channel::AssignLocation,
        };
        self.record(format!("retrieve {channel}"));
        match self.behavior(channel) {
            Behavior::Respond(resp) => Ok(resp),
            Behavior::Hang => futures::future::pending().await,
            Behavior::Fail(message) => bail!("{message}"),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.record("close".to_string());
        if let Some(state) = &self.renderer {
            state.closed.fetch_add(1, Ordering::SeqCst);
            state.active.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Renderer handing out clones of one scripted page.
pub struct ScriptedRenderer {
    template: ScriptedPage,
    state: Arc<RendererState>,
    refuse: Option<String>,
}

impl ScriptedRenderer {
    pub fn new(template: ScriptedPage) -> Self {
        Self {
            template,
            state: Arc::new(RendererState::default()),
            refuse: None,
        }
    }

    /// Fail every `new_context` call, as a missing browser would.
    pub fn refusing(mut self, message: &str) -> Self {
        self.refuse = Some(message.to_string());
        self
    }

    pub fn opened_contexts(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed_contexts(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Most contexts alive at the same time.
    pub fn peak_contexts(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.template.calls()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn PageContext>> {
        if let Some(message) = &self.refuse {
            bail!("{message}");
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(active, Ordering::SeqCst);

        let mut page = self.template.clone();
        page.closed = Arc::new(AtomicBool::new(false));
        page.renderer = Some(Arc::clone(&self.state));
        page.record("open".to_string());
        Ok(Box::new(page))
    }

    fn active_contexts(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }
}
