// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chromium-based renderer using chromiumoxide.
//!
//! Each context is a separate browser process with its own throwaway
//! profile and download directory, so nothing leaks between sessions.

use super::{
    scripts, CaptureVia, CapturedResponse, FailedResponse, NavigationResult, PageContext,
    Renderer, ResponseMatcher, Trigger,
};
use crate::config::BrowserOptions;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventResponseReceived,
    GetResponseBodyParams, RequestId, ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How long an aborted response may take to reappear as a download.
const DOWNLOAD_HANDOFF: Duration = Duration::from_secs(5);

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    // 1. Environment overrides
    for var in ["FORMFETCH_CHROMIUM_PATH", "PUPPETEER_EXECUTABLE_PATH"] {
        if let Ok(p) = std::env::var(var) {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }
    }

    // 2. ~/.formfetch/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".formfetch/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".formfetch/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".formfetch/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".formfetch/chromium/chrome-linux64/chrome"),
                home.join(".formfetch/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in [
        "google-chrome-stable",
        "google-chrome",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common install locations
    let common = if cfg!(target_os = "macos") {
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")
    } else {
        PathBuf::from("/usr/bin/google-chrome-stable")
    };
    if common.exists() {
        return Some(common);
    }

    None
}

/// Chromium-based renderer. Launches one browser per context.
pub struct ChromiumRenderer {
    chrome_path: PathBuf,
    options: BrowserOptions,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Resolve the Chromium executable; no process is started yet.
    pub fn new(options: BrowserOptions) -> Result<Self> {
        let chrome_path = find_chromium(options.chromium_path.as_deref())
            .context("Chromium not found. Set FORMFETCH_CHROMIUM_PATH or install google-chrome.")?;
        Ok(Self {
            chrome_path,
            options,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn chrome_path(&self) -> &Path {
        &self.chrome_path
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn PageContext>> {
        Ok(Box::new(self.launch().await?))
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

impl ChromiumRenderer {
    async fn launch(&self) -> Result<ChromiumContext> {
        let profile = tempfile::Builder::new()
            .prefix("formfetch-profile-")
            .tempdir()
            .context("failed to create browser profile directory")?;
        let downloads = tempfile::Builder::new()
            .prefix("formfetch-downloads-")
            .tempdir()
            .context("failed to create download directory")?;

        let (width, height) = self.options.viewport;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(&self.chrome_path)
            .user_data_dir(profile.path())
            .window_size(width, height)
            .launch_timeout(self.options.launch_timeout)
            .arg("--headless=new")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-background-networking");
        if self.options.ignore_https_errors {
            builder = builder
                .arg("--ignore-certificate-errors")
                .arg("--ignore-certificate-errors-spki-list");
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match prepare_page(&browser, &self.options, downloads.path()).await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(e);
            }
        };

        self.active_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(profile = %profile.path().display(), "chromium context ready");

        Ok(ChromiumContext {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task,
            download_dir: downloads,
            _profile: profile,
            active_count: Arc::clone(&self.active_count),
        })
    }
}

async fn prepare_page(browser: &Browser, options: &BrowserOptions, downloads: &Path) -> Result<Page> {
    let page = browser
        .new_page("about:blank")
        .await
        .context("failed to create new page")?;

    let (width, height) = options.viewport;
    page.execute(SetDeviceMetricsOverrideParams::new(
        width as i64,
        height as i64,
        1.0,
        false,
    ))
    .await
    .context("failed to set viewport")?;
    page.execute(SetUserAgentOverrideParams::new(options.user_agent.clone()))
        .await
        .context("failed to set user agent")?;
    page.execute(EnableParams::default())
        .await
        .context("failed to enable network events")?;

    let behavior = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::AllowAndName)
        .download_path(downloads.display().to_string())
        .events_enabled(true)
        .build()
        .map_err(|e| anyhow!("failed to build download behavior: {e}"))?;
    browser
        .execute(behavior)
        .await
        .context("failed to enable download capture")?;

    Ok(page)
}

/// A single Chromium browser with one working page.
pub struct ChromiumContext {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: JoinHandle<()>,
    download_dir: TempDir,
    _profile: TempDir,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumContext {
    /// Wait for the first response or download accepted by `matcher`.
    ///
    /// Listeners are installed on `listen_on` (responses) and on the
    /// browser (downloads) before `fire` runs, so nothing is missed.
    async fn capture_on<F>(
        &self,
        listen_on: &Page,
        fire: F,
        matcher: &ResponseMatcher,
        window: Duration,
    ) -> Result<CapturedResponse>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let mut responses = listen_on.event_listener::<EventResponseReceived>().await?;
        let mut finished = listen_on.event_listener::<EventLoadingFinished>().await?;
        let mut failed = listen_on.event_listener::<EventLoadingFailed>().await?;

        let (mut begins, mut progress) = {
            let guard = self.browser.lock().await;
            let browser = guard.as_ref().context("browser already closed")?;
            (
                browser.event_listener::<EventDownloadWillBegin>().await?,
                browser.event_listener::<EventDownloadProgress>().await?,
            )
        };

        fire.await?;

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let mut pending: HashMap<RequestId, (String, Option<String>, u16)> = HashMap::new();
        let mut download_names: HashMap<String, (String, String)> = HashMap::new();
        // Set while an aborted response may still turn into a download.
        let mut handoff: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                Some(ev) = responses.next() => {
                    let is_document = ev.r#type == ResourceType::Document;
                    let resp = &ev.response;
                    if matcher.matches(&resp.url, &resp.mime_type, is_document) {
                        tracing::debug!(url = %resp.url, mime = %resp.mime_type, "matching response seen");
                        pending.insert(
                            ev.request_id.clone(),
                            (resp.url.clone(), Some(resp.mime_type.clone()), resp.status as u16),
                        );
                    }
                }
                Some(ev) = finished.next() => {
                    if let Some((url, mime, status)) = pending.remove(&ev.request_id) {
                        let body = response_body(listen_on, ev.request_id.clone()).await?;
                        return Ok(CapturedResponse {
                            url,
                            status: Some(status),
                            content_type: mime,
                            body,
                            suggested_filename: None,
                            via: CaptureVia::Response,
                        });
                    }
                }
                Some(ev) = failed.next() => {
                    if pending.remove(&ev.request_id).is_none() {
                        continue;
                    }
                    match FailedResponse::classify(&ev.error_text, ev.canceled.unwrap_or(false)) {
                        FailedResponse::AwaitDownload => {
                            tracing::debug!(error = %ev.error_text, "matching response aborted, waiting for download");
                            if download_names.is_empty() {
                                handoff = Some(tokio::time::Instant::now() + DOWNLOAD_HANDOFF);
                            }
                        }
                        FailedResponse::Abort => bail!("response failed: {}", ev.error_text),
                    }
                }
                Some(ev) = begins.next() => {
                    handoff = None;
                    tracing::debug!(guid = %ev.guid, name = %ev.suggested_filename, "download started");
                    download_names.insert(
                        ev.guid.clone(),
                        (ev.url.clone(), ev.suggested_filename.clone()),
                    );
                }
                Some(ev) = progress.next() => {
                    match ev.state {
                        DownloadProgressState::Completed => {
                            let path = self.download_dir.path().join(&ev.guid);
                            let body = tokio::fs::read(&path)
                                .await
                                .with_context(|| format!("failed to read download {}", path.display()))?;
                            let (url, name) = download_names
                                .remove(&ev.guid)
                                .unwrap_or_default();
                            let name = Some(name).filter(|n| !n.is_empty());
                            return Ok(CapturedResponse {
                                url,
                                status: None,
                                content_type: None,
                                body,
                                suggested_filename: name,
                                via: CaptureVia::Download,
                            });
                        }
                        DownloadProgressState::Canceled => {
                            bail!("download {} was canceled", ev.guid);
                        }
                        _ => {}
                    }
                }
                _ = sleep_until_opt(handoff) => {
                    bail!("response was aborted and no download followed");
                }
                _ = &mut deadline => {
                    bail!("no matching response or download within {}ms", window.as_millis());
                }
            }
        }
    }
}

async fn response_body(page: &Page, request_id: RequestId) -> Result<Vec<u8>> {
    let body = page
        .execute(GetResponseBodyParams::new(request_id))
        .await
        .context("failed to read response body")?
        .result;
    if body.base64_encoded {
        base64::engine::general_purpose::STANDARD
            .decode(body.body.as_bytes())
            .context("response body is not valid base64")
    } else {
        Ok(body.body.into_bytes())
    }
}

/// Sleep until `at`; pends forever when unset.
async fn sleep_until_opt(at: Option<tokio::time::Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

/// A short-lived extra tab, closed even when the capture is cancelled.
struct SiblingTab(Option<Page>);

impl SiblingTab {
    fn page(&self) -> Result<&Page> {
        self.0.as_ref().context("sibling tab already closed")
    }

    async fn close(mut self) {
        if let Some(page) = self.0.take() {
            let _ = page.close().await;
        }
    }
}

impl Drop for SiblingTab {
    fn drop(&mut self) {
        let Some(page) = self.0.take() else {
            return;
        };
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

#[async_trait]
impl PageContext for ChromiumContext {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        })
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());
                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {}ms", timeout.as_millis()),
        }
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.wait_for_navigation())
            .await
            .map_err(|_| anyhow!("navigation did not settle within {}ms", timeout.as_millis()))?
            .context("waiting for navigation failed")?;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        let js = format!(
            "document.querySelector('{}') !== null",
            scripts::sanitize_js_string(selector)
        );
        let found = self.execute_js(&js).await?;
        Ok(found.as_bool().unwrap_or(false))
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<()> {
        self.execute_js(&scripts::clear_field(selector)).await?;
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("element not found: {selector}"))?;
        element.click().await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.page
            .find_element(selector)
            .await
            .with_context(|| format!("element not found: {selector}"))?
            .click()
            .await?;
        Ok(())
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn get_html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")?;

        result
            .into_value::<String>()
            .map_err(|e| anyhow!("failed to convert HTML: {e:?}"))
    }

    async fn get_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn intercept(
        &self,
        trigger: &Trigger,
        matcher: &ResponseMatcher,
        window: Duration,
    ) -> Result<CapturedResponse> {
        match trigger {
            Trigger::OpenInSiblingTab(url) => {
                let tab = {
                    let guard = self.browser.lock().await;
                    let browser = guard.as_ref().context("browser already closed")?;
                    browser
                        .new_page("about:blank")
                        .await
                        .context("failed to open sibling tab")?
                };
                let tab = SiblingTab(Some(tab));
                let fire = async {
                    tab.page()?
                        .execute(NavigateParams::new(url.clone()))
                        .await
                        .context("sibling tab navigation failed")?;
                    Ok(())
                };
                let result = self.capture_on(tab.page()?, fire, matcher, window).await;
                tab.close().await;
                result
            }
            Trigger::ClickElement { internal_id, uri } => {
                let script = scripts::click_candidate(internal_id.as_deref(), uri);
                let fire = async {
                    let clicked = self.execute_js(&script).await?;
                    let success = clicked
                        .get("success")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    if !success {
                        bail!("candidate element not found in the live page");
                    }
                    Ok(())
                };
                self.capture_on(&self.page, fire, matcher, window).await
            }
            Trigger::AssignLocation(url) => {
                let script = scripts::assign_location(url);
                let fire = async {
                    self.execute_js(&script).await?;
                    Ok(())
                };
                self.capture_on(&self.page, fire, matcher, window).await
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = browser.close().await;
        let _ = browser.wait().await;
        self.handler_task.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_must_exist() {
        let missing = PathBuf::from("/definitely/not/a/chrome");
        let found = find_chromium(Some(&missing));
        assert_ne!(found.as_deref(), Some(missing.as_path()));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_navigate_and_capture() {
        let renderer =
            ChromiumRenderer::new(BrowserOptions::default()).expect("failed to find Chromium");
        let ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");

        let nav = ctx
            .navigate(
                "data:text/html,<input id='q' type='text'><a href='/x.pdf'>x</a>",
                Duration::from_secs(10),
            )
            .await
            .expect("navigation failed");
        assert!(nav.load_time_ms < 10_000);

        assert!(ctx.exists("#q").await.unwrap());
        assert!(!ctx.exists("#missing").await.unwrap());

        ctx.type_into("#q", "15414.900381/2013-67").await.unwrap();
        let value = ctx
            .execute_js("document.querySelector('#q').value")
            .await
            .unwrap();
        assert_eq!(value.as_str(), Some("15414.900381/2013-67"));

        let html = ctx.get_html().await.expect("get_html failed");
        assert!(html.contains("x.pdf"));

        ctx.close().await.expect("close failed");
        ctx.close().await.expect("second close is a no-op");
        assert_eq!(renderer.active_contexts(), 0);
    }

    /// Serve one canned HTTP response per connection on a local port.
    async fn serve_once(response: &'static [u8]) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/DownloadConsultaPublica/1")
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_attachment_is_captured_as_download() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\n\
              Content-Disposition: attachment; filename=\"Condicoes.pdf\"\r\n\
              Content-Length: 13\r\nConnection: close\r\n\r\n%PDF-1.4 test",
        )
        .await;
        let renderer =
            ChromiumRenderer::new(BrowserOptions::default()).expect("failed to find Chromium");
        let ctx = renderer.launch().await.expect("failed to create context");

        let started = Instant::now();
        let captured = ctx
            .intercept(
                &Trigger::OpenInSiblingTab(url),
                &ResponseMatcher::Document,
                Duration::from_secs(30),
            )
            .await
            .expect("attachment not captured");
        assert!(started.elapsed() < Duration::from_secs(15));
        assert_eq!(captured.via, CaptureVia::Download);
        assert_eq!(captured.body, b"%PDF-1.4 test");
        assert_eq!(captured.suggested_filename.as_deref(), Some("Condicoes.pdf"));

        ctx.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_cancelled_sibling_capture_closes_its_tab() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/never", listener.local_addr().unwrap());
        let renderer =
            ChromiumRenderer::new(BrowserOptions::default()).expect("failed to find Chromium");
        let ctx = renderer.launch().await.expect("failed to create context");

        let trigger = Trigger::OpenInSiblingTab(url);
        let capture = ctx.intercept(
            &trigger,
            &ResponseMatcher::Document,
            Duration::from_secs(30),
        );
        assert!(tokio::time::timeout(Duration::from_millis(500), capture)
            .await
            .is_err());
        tokio::time::sleep(Duration::from_secs(1)).await;

        let pages = {
            let guard = ctx.browser.lock().await;
            guard.as_ref().unwrap().pages().await.unwrap().len()
        };
        assert_eq!(pages, 1);

        drop(listener);
        ctx.close().await.unwrap();
    }
}