// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration loading and resolution.
//!
//! Defaults describe the SUSEP product-registration search. Every timing
//! knob and the entry URL can be overridden from `FORMFETCH_*` environment
//! variables.

use std::path::PathBuf;
use std::time::Duration;

/// Document format the pipeline expects to retrieve.
#[derive(Debug, Clone)]
pub struct DocumentFormat {
    /// Extension without the leading dot, lowercase.
    pub extension: String,
    /// Leading magic bytes.
    pub signature: Vec<u8>,
    pub content_type: String,
    /// Filename used when nothing better can be derived.
    pub default_filename: String,
    /// Response content types that identify the document on the wire.
    pub wire_content_types: Vec<String>,
}

impl Default for DocumentFormat {
    fn default() -> Self {
        Self {
            extension: "pdf".to_string(),
            signature: b"%PDF-".to_vec(),
            content_type: "application/pdf".to_string(),
            default_filename: "documento.pdf".to_string(),
            wire_content_types: vec![
                "application/pdf".to_string(),
                "application/x-pdf".to_string(),
                "application/octet-stream".to_string(),
                "application/force-download".to_string(),
                "application/x-download".to_string(),
            ],
        }
    }
}

/// What the target application's result page looks like.
#[derive(Debug, Clone)]
pub struct TargetProfile {
    /// CSS classes the application puts on download links.
    pub signature_classes: Vec<String>,
    /// Substrings of inline handlers that trigger downloads.
    pub handler_signatures: Vec<String>,
    /// Lowercase keywords hinting at a document link.
    pub keywords: Vec<String>,
    /// Regex for the relative download route; group 1 is the numeric id.
    pub route_pattern: String,
    /// The last-resort guess only applies below this many links.
    pub last_resort_link_bound: usize,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            signature_classes: vec!["linkDownloadRelatorio".to_string()],
            handler_signatures: vec!["Download".to_string()],
            keywords: [
                "download",
                "attachment",
                "report",
                "file",
                "baixar",
                "anexo",
                "relatorio",
                "relatório",
                "arquivo",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            route_pattern: r"[\w./~-]*Download\w*/(\d+)".to_string(),
            last_resort_link_bound: 3,
        }
    }
}

/// Browser launch options.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Explicit executable; discovered when `None`.
    pub chromium_path: Option<PathBuf>,
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub ignore_https_errors: bool,
    /// Upper bound for launching the browser process.
    pub launch_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            chromium_path: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            viewport: (1366, 768),
            ignore_https_errors: true,
            launch_timeout: Duration::from_secs(120),
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub entry_url: String,
    /// Search input candidates, most specific first.
    pub input_selectors: Vec<String>,
    /// Submit control candidates, most specific first.
    pub submit_selectors: Vec<String>,
    pub navigation_timeout: Duration,
    /// Fixed pause after the entry page loads.
    pub entry_settle: Duration,
    /// Upper bound on waiting for the result view after submitting.
    pub submit_grace: Duration,
    /// Timeout of each individual retrieval strategy.
    pub attempt_timeout: Duration,
    /// Outer deadline of one pipeline run.
    pub request_timeout: Duration,
    /// Simultaneous sessions cap; `None` disables admission control.
    pub max_sessions: Option<usize>,
    /// Total pipeline runs per request (1 = no retry).
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub format: DocumentFormat,
    pub target: TargetProfile,
    pub browser: BrowserOptions,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            entry_url: "https://www2.susep.gov.br/safe/menumercado/REP2/Produto.aspx/Consultar"
                .to_string(),
            input_selectors: vec![
                "#txtNumeroProcesso".to_string(),
                "input[name*='NumeroProcesso']".to_string(),
                "input[name*='processo' i]".to_string(),
                "input[type='text']".to_string(),
            ],
            submit_selectors: vec![
                "#btnConsultar".to_string(),
                "input[type='submit'][value*='Consultar']".to_string(),
                "button[type='submit']".to_string(),
                "input[type='submit']".to_string(),
            ],
            navigation_timeout: Duration::from_secs(90),
            entry_settle: Duration::from_secs(3),
            submit_grace: Duration::from_secs(3),
            attempt_timeout: Duration::from_secs(45),
            request_timeout: Duration::from_secs(180),
            max_sessions: None,
            retry_attempts: 1,
            retry_backoff: Duration::from_secs(2),
            format: DocumentFormat::default(),
            target: TargetProfile::default(),
            browser: BrowserOptions::default(),
        }
    }
}

impl FetchConfig {
    /// Defaults overridden by any `FORMFETCH_*` variables that are set.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup. Unparseable values are
    /// ignored with a warning.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FORMFETCH_ENTRY_URL").filter(|v| !v.trim().is_empty()) {
            self.entry_url = url.trim().to_string();
        }
        if let Some(path) = lookup("FORMFETCH_CHROMIUM_PATH").filter(|v| !v.trim().is_empty()) {
            self.browser.chromium_path = Some(PathBuf::from(path.trim()));
        }

        let millis = |name: &str| -> Option<Duration> {
            let raw = lookup(name)?;
            match raw.trim().parse::<u64>() {
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(_) => {
                    tracing::warn!(variable = name, value = %raw, "ignoring non-numeric duration");
                    None
                }
            }
        };
        if let Some(d) = millis("FORMFETCH_NAVIGATION_TIMEOUT_MS") {
            self.navigation_timeout = d;
        }
        if let Some(d) = millis("FORMFETCH_ENTRY_SETTLE_MS") {
            self.entry_settle = d;
        }
        if let Some(d) = millis("FORMFETCH_SUBMIT_GRACE_MS") {
            self.submit_grace = d;
        }
        if let Some(d) = millis("FORMFETCH_ATTEMPT_TIMEOUT_MS") {
            self.attempt_timeout = d;
        }
        if let Some(d) = millis("FORMFETCH_REQUEST_TIMEOUT_MS") {
            self.request_timeout = d;
        }
        if let Some(d) = millis("FORMFETCH_RETRY_BACKOFF_MS") {
            self.retry_backoff = d;
        }

        if let Some(raw) = lookup("FORMFETCH_MAX_SESSIONS") {
            match raw.trim().parse::<usize>() {
                Ok(0) => self.max_sessions = None,
                Ok(n) => self.max_sessions = Some(n),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring invalid FORMFETCH_MAX_SESSIONS");
                }
            }
        }
        if let Some(raw) = lookup("FORMFETCH_RETRY_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(n) => self.retry_attempts = n.max(1),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring invalid FORMFETCH_RETRY_ATTEMPTS");
                }
            }
        }

        self
    }
}
