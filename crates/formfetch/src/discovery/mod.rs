// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Finds the elements on a result page that reference downloadable
//! documents.
//!
//! Several independent scan strategies run over the same parsed document.
//! Their matches are merged per identity (internal id, else URI), scored by
//! the sum of the weights of the distinct strategies that agreed, and
//! ranked. The pure [`DiscoveryEngine::discover_html`] entry point is
//! synchronous; [`DiscoveryEngine::discover`] only pulls HTML and URL from
//! the live page first.

pub mod strategies;

use crate::config::{DocumentFormat, TargetProfile};
use crate::error::FetchError;
use crate::renderer::PageContext;
use crate::types::CandidateArtifact;
use regex::Regex;
use scraper::Html;
use std::collections::HashMap;
use strategies::{ScanContext, ScanMatch};
pub use strategies::ScanStrategy;

/// Ranks candidate documents on a result page.
pub struct DiscoveryEngine {
    profile: TargetProfile,
    format: DocumentFormat,
    route: Regex,
    file_name: Regex,
}

impl DiscoveryEngine {
    /// Fails only if the profile's route pattern is not a valid regex.
    pub fn new(profile: TargetProfile, format: DocumentFormat) -> Result<Self, regex::Error> {
        let route = Regex::new(&profile.route_pattern)?;
        let file_name = Regex::new(&format!(
            r"(?i)([^\n]+\.{})",
            regex::escape(&format.extension)
        ))?;
        Ok(Self {
            profile,
            format,
            route,
            file_name,
        })
    }

    /// Discover candidates on the page's current document.
    pub async fn discover(
        &self,
        page: &dyn PageContext,
    ) -> Result<Vec<CandidateArtifact>, FetchError> {
        let html = page.get_html().await.map_err(FetchError::session)?;
        let url = page.get_url().await.map_err(FetchError::session)?;
        Ok(self.discover_html(&html, &url))
    }

    /// Discover candidates in an HTML document served from `base_url`.
    pub fn discover_html(&self, html: &str, base_url: &str) -> Vec<CandidateArtifact> {
        let document = Html::parse_document(html);
        let ctx = ScanContext::new(
            &document,
            base_url,
            &self.profile,
            &self.format,
            &self.route,
            &self.file_name,
        );

        let mut merger = Merger::default();
        for strategy in ScanStrategy::PRIMARY {
            let matches = strategy.scan(&ctx);
            tracing::trace!(strategy = strategy.name(), matches = matches.len(), "scan finished");
            for m in matches {
                merger.add(strategy, m);
            }
        }
        if merger.is_empty() {
            for m in ScanStrategy::LastResort.scan(&ctx) {
                merger.add(ScanStrategy::LastResort, m);
            }
        }

        let candidates = merger.finish(&self.format);
        tracing::debug!(
            candidates = candidates.len(),
            links = ctx.link_count(),
            "discovery finished"
        );
        candidates
    }
}

/// Accumulated evidence for one identity.
struct Entry {
    uri: String,
    internal_id: Option<String>,
    status_label: Option<String>,
    file_names: Vec<String>,
    texts: Vec<String>,
    position: usize,
    score: f32,
    matched_by: Vec<&'static str>,
}

#[derive(Default)]
struct Merger {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl Merger {
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add(&mut self, strategy: ScanStrategy, m: ScanMatch) {
        let key = m.key().to_string();
        let i = match self.index.get(&key).copied() {
            Some(i) => i,
            None => {
                let i = self.entries.len();
                self.index.insert(key, i);
                self.entries.push(Entry {
                    uri: m.uri.clone(),
                    internal_id: m.internal_id.clone(),
                    status_label: None,
                    file_names: Vec::new(),
                    texts: Vec::new(),
                    position: m.position,
                    score: 0.0,
                    matched_by: Vec::new(),
                });
                i
            }
        };
        let entry = &mut self.entries[i];

        if !entry.matched_by.contains(&strategy.name()) {
            entry.matched_by.push(strategy.name());
            entry.score += strategy.weight();
        }
        entry.position = entry.position.min(m.position);
        if entry.status_label.is_none() {
            entry.status_label = m.status_label;
        }
        if let Some(name) = m.file_name {
            if !entry.file_names.contains(&name) {
                entry.file_names.push(name);
            }
        }
        if let Some(text) = m.text {
            if !entry.texts.contains(&text) {
                entry.texts.push(text);
            }
        }
    }

    fn finish(mut self, format: &DocumentFormat) -> Vec<CandidateArtifact> {
        self.entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });

        self.entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| CandidateArtifact {
                ordinal: i + 1,
                display_name: display_name(&e, format),
                internal_id: e.internal_id,
                uri: e.uri,
                status_label: e.status_label,
                score: e.score,
                matched_by: e.matched_by.iter().map(|s| s.to_string()).collect(),
            })
            .collect()
    }
}

/// First name ending in the expected extension; else the link text; else
/// the URI's last path segment; else the default filename.
fn display_name(entry: &Entry, format: &DocumentFormat) -> String {
    let suffix = format!(".{}", format.extension);
    let segment = last_segment(&entry.uri);

    let with_extension = entry
        .file_names
        .iter()
        .chain(entry.texts.iter())
        .chain(segment.iter())
        .find(|n| n.to_ascii_lowercase().ends_with(&suffix));

    with_extension
        .or_else(|| entry.texts.first())
        .or(segment.as_ref())
        .cloned()
        .unwrap_or_else(|| format.default_filename.clone())
}

fn last_segment(uri: &str) -> Option<String> {
    let parsed = url::Url::parse(uri).ok()?;
    parsed
        .path_segments()?
        .rev()
        .find(|s| !s.is_empty())
        .map(String::from)
}
