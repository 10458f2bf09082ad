// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! The individual scan strategies and the DOM helpers they share.
//!
//! All scanning is synchronous over a parsed [`Html`] document. Inline
//! handlers and script bodies are only read as text; route and identifier
//! are pulled out with regexes.

use crate::config::{DocumentFormat, TargetProfile};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use url::Url;

/// Elements that can reference a document, plus scripts, in DOM order.
const NODE_SELECTOR: &str = "a, area, button, input[type='button'], input[type='submit'], \
                             input[type='image'], [onclick], script";

fn node_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse(NODE_SELECTOR).expect("node selector is valid"))
}

fn cell_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| {
        Selector::parse("td, [role='gridcell'], [role='cell']").expect("cell selector is valid")
    })
}

fn handler_target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:location(?:\.href)?\s*=|window\.open\()\s*['"]([^'"]+)['"]"#)
            .expect("handler target regex is valid")
    })
}

/// Everything a strategy needs to scan one document.
pub(crate) struct ScanContext<'a> {
    nodes: Vec<ElementRef<'a>>,
    base: Option<Url>,
    profile: &'a TargetProfile,
    format: &'a DocumentFormat,
    route: &'a Regex,
    file_name: &'a Regex,
}

impl<'a> ScanContext<'a> {
    pub(crate) fn new(
        document: &'a Html,
        base_url: &str,
        profile: &'a TargetProfile,
        format: &'a DocumentFormat,
        route: &'a Regex,
        file_name: &'a Regex,
    ) -> Self {
        Self {
            nodes: document.select(node_selector()).collect(),
            base: Url::parse(base_url).ok(),
            profile,
            format,
            route,
            file_name,
        }
    }

    /// Number of anchor elements on the page.
    pub(crate) fn link_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|el| el.value().name() == "a")
            .count()
    }

    fn elements(&self) -> impl Iterator<Item = (usize, &ElementRef<'a>)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, el)| el.value().name() != "script")
    }

    fn resolve(&self, raw: &str) -> String {
        match &self.base {
            Some(base) => base
                .join(raw)
                .map(String::from)
                .unwrap_or_else(|_| raw.to_string()),
            None => raw.to_string(),
        }
    }

    fn internal_id(&self, uri: &str) -> Option<String> {
        self.route
            .captures(uri)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Where an element points: a usable `href`, else the route found in its
    /// inline handler.
    fn target(&self, el: &ElementRef<'_>) -> Option<String> {
        let href = el
            .value()
            .attr("href")
            .map(str::trim)
            .filter(|h| usable_href(h));
        let raw = match href {
            Some(h) => h.to_string(),
            None => {
                let handler = el.value().attr("onclick")?;
                handler_route(handler, self.route)?
            }
        };
        Some(self.resolve(&raw))
    }

    /// A match for `el` pointing at `uri`.
    fn describe(&self, position: usize, el: &ElementRef<'_>, uri: String) -> ScanMatch {
        let row = row_of(el);
        let text = element_text(el);
        ScanMatch {
            internal_id: self.internal_id(&uri),
            uri,
            text: Some(text).filter(|t| !t.is_empty()),
            file_name: row.as_ref().and_then(|r| self.row_file_name(r)),
            status_label: row
                .as_ref()
                .and_then(row_status)
                .or_else(|| el.value().attr("title").map(|t| t.trim().to_string()))
                .filter(|s| !s.is_empty()),
            position,
        }
    }

    fn row_file_name(&self, row: &ElementRef<'_>) -> Option<String> {
        row.select(cell_selector()).find_map(|cell| {
            // Raw text, so a name on its own line is not joined to the label above it.
            let raw = cell.text().collect::<String>();
            self.file_name
                .captures(&raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|name| !name.is_empty())
        })
    }

    fn ends_with_extension(&self, uri: &str) -> bool {
        let path = match Url::parse(uri) {
            Ok(u) => u.path().to_string(),
            Err(_) => uri.split(['?', '#']).next().unwrap_or("").to_string(),
        };
        path.to_ascii_lowercase()
            .ends_with(&format!(".{}", self.format.extension))
    }
}

/// One element (or script reference) a strategy believes is a document.
#[derive(Debug, Clone)]
pub(crate) struct ScanMatch {
    pub uri: String,
    pub internal_id: Option<String>,
    /// Visible text of the element.
    pub text: Option<String>,
    /// Filename found in a sibling cell of the same row.
    pub file_name: Option<String>,
    pub status_label: Option<String>,
    /// Index in document order.
    pub position: usize,
}

impl ScanMatch {
    pub(crate) fn key(&self) -> &str {
        self.internal_id.as_deref().unwrap_or(&self.uri)
    }
}

/// Discovery strategies, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    Extension,
    Signature,
    Keyword,
    Structural,
    EmbeddedReference,
    LastResort,
}

impl ScanStrategy {
    /// The strategies that always run. [`ScanStrategy::LastResort`] runs
    /// only when none of these found anything.
    pub const PRIMARY: [ScanStrategy; 5] = [
        ScanStrategy::Extension,
        ScanStrategy::Signature,
        ScanStrategy::Keyword,
        ScanStrategy::Structural,
        ScanStrategy::EmbeddedReference,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScanStrategy::Extension => "extension",
            ScanStrategy::Signature => "signature",
            ScanStrategy::Keyword => "keyword",
            ScanStrategy::Structural => "structural",
            ScanStrategy::EmbeddedReference => "embedded-reference",
            ScanStrategy::LastResort => "last-resort",
        }
    }

    pub fn weight(&self) -> f32 {
        match self {
            ScanStrategy::Extension | ScanStrategy::Signature => 3.0,
            ScanStrategy::Keyword | ScanStrategy::Structural | ScanStrategy::EmbeddedReference => {
                2.0
            }
            ScanStrategy::LastResort => 0.5,
        }
    }

    pub(crate) fn scan(&self, ctx: &ScanContext<'_>) -> Vec<ScanMatch> {
        match self {
            ScanStrategy::Extension => ctx
                .elements()
                .filter_map(|(pos, el)| {
                    let uri = ctx.target(el)?;
                    ctx.ends_with_extension(&uri)
                        .then(|| ctx.describe(pos, el, uri))
                })
                .collect(),

            ScanStrategy::Signature => ctx
                .elements()
                .filter(|(_, el)| has_signature(el, ctx.profile))
                .filter_map(|(pos, el)| {
                    let uri = ctx.target(el)?;
                    Some(ctx.describe(pos, el, uri))
                })
                .collect(),

            ScanStrategy::Keyword => ctx
                .elements()
                .filter_map(|(pos, el)| {
                    let uri = ctx.target(el)?;
                    let text = element_text(el).to_lowercase();
                    let path = uri_path(&uri).to_lowercase();
                    let hit = ctx
                        .profile
                        .keywords
                        .iter()
                        .any(|k| text.contains(k.as_str()) || path.contains(k.as_str()));
                    hit.then(|| ctx.describe(pos, el, uri))
                })
                .collect(),

            ScanStrategy::Structural => ctx
                .elements()
                .filter_map(|(pos, el)| {
                    let row = row_of(el)?;
                    ctx.row_file_name(&row)?;
                    let uri = ctx.target(el)?;
                    Some(ctx.describe(pos, el, uri))
                })
                .collect(),

            ScanStrategy::EmbeddedReference => {
                let mut out = Vec::new();
                for (pos, el) in ctx.nodes.iter().enumerate() {
                    if el.value().name() == "script" {
                        let body: String = el.text().collect();
                        for m in ctx.route.find_iter(&body) {
                            let uri = ctx.resolve(m.as_str());
                            out.push(ScanMatch {
                                internal_id: ctx.internal_id(&uri),
                                uri,
                                text: None,
                                file_name: None,
                                status_label: None,
                                position: pos,
                            });
                        }
                    } else if let Some(handler) = el.value().attr("onclick") {
                        for m in ctx.route.find_iter(handler) {
                            let uri = ctx.resolve(m.as_str());
                            out.push(ctx.describe(pos, el, uri));
                        }
                    }
                }
                out
            }

            ScanStrategy::LastResort => {
                if ctx.link_count() >= ctx.profile.last_resort_link_bound {
                    return Vec::new();
                }
                ctx.elements()
                    .filter(|(_, el)| el.value().name() == "a")
                    .find_map(|(pos, el)| {
                        let uri = ctx.target(el)?;
                        Some(ctx.describe(pos, el, uri))
                    })
                    .into_iter()
                    .collect()
            }
        }
    }
}

/// Whether an `href` leaves the current page. Fragments, script URLs and
/// mail links never point at a document.
fn usable_href(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    !href.is_empty()
        && !href.starts_with('#')
        && !lower.starts_with("javascript:")
        && !lower.starts_with("mailto:")
}

/// Route referenced by an inline handler, read as text only.
fn handler_route(handler: &str, route: &Regex) -> Option<String> {
    if let Some(c) = handler_target_re().captures(handler) {
        return c.get(1).map(|m| m.as_str().to_string());
    }
    route.find(handler).map(|m| m.as_str().to_string())
}

fn has_signature(el: &ElementRef<'_>, profile: &TargetProfile) -> bool {
    let by_class = el
        .value()
        .classes()
        .any(|c| profile.signature_classes.iter().any(|s| s == c));
    let by_handler = el
        .value()
        .attr("onclick")
        .is_some_and(|h| profile.handler_signatures.iter().any(|s| h.contains(s.as_str())));
    by_class || by_handler
}

/// Closest enclosing table or grid row.
fn row_of<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.ancestors().filter_map(ElementRef::wrap).find(|a| {
        a.value().name() == "tr" || a.value().attr("role") == Some("row")
    })
}

fn row_status(row: &ElementRef<'_>) -> Option<String> {
    row.select(cell_selector()).find_map(|cell| {
        let class = cell.value().attr("class")?.to_lowercase();
        if class.contains("status") || class.contains("situacao") {
            Some(element_text(&cell)).filter(|t| !t.is_empty())
        } else {
            None
        }
    })
}

fn uri_path(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(u) => u.path().to_string(),
        Err(_) => uri.to_string(),
    }
}

/// Whitespace-normalised visible text of an element.
pub(crate) fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(strategy: ScanStrategy, html: &str) -> Vec<ScanMatch> {
        let profile = TargetProfile::default();
        let format = DocumentFormat::default();
        let route = Regex::new(&profile.route_pattern).unwrap();
        let file_name = Regex::new(r"(?i)([^\n]+\.pdf)").unwrap();
        let doc = Html::parse_document(html);
        let ctx = ScanContext::new(
            &doc,
            "https://example.com/app/Produto.aspx/Consultar",
            &profile,
            &format,
            &route,
            &file_name,
        );
        strategy.scan(&ctx)
    }

    #[test]
    fn test_handler_route_extraction() {
        let route = Regex::new(r"[\w./~-]*Download\w*/(\d+)").unwrap();
        assert_eq!(
            handler_route("location.href = '../DownloadConsultaPublica/77';", &route).as_deref(),
            Some("../DownloadConsultaPublica/77")
        );
        assert_eq!(
            handler_route("window.open(\"/x/y.pdf\")", &route).as_deref(),
            Some("/x/y.pdf")
        );
        assert_eq!(
            handler_route("doPostBack('DownloadArquivo/12')", &route).as_deref(),
            Some("DownloadArquivo/12")
        );
        assert!(handler_route("alert(1)", &route).is_none());
    }

    #[test]
    fn test_unusable_hrefs_fall_back_to_handler() {
        let found = scan(
            ScanStrategy::Signature,
            r##"<a class="linkDownloadRelatorio" href="#"
                  onclick="location.href = '../DownloadConsultaPublica/5'">Baixar</a>
                <a class="linkDownloadRelatorio" href="javascript:void(0)">Sem rota</a>"##,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].uri,
            "https://example.com/app/DownloadConsultaPublica/5"
        );
        assert_eq!(found[0].internal_id.as_deref(), Some("5"));
    }

    #[test]
    fn test_extension_ignores_query_string() {
        let found = scan(
            ScanStrategy::Extension,
            r#"<a href="/docs/a.PDF?v=2">A</a><a href="/docs/b.html">B</a>"#,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uri, "https://example.com/docs/a.PDF?v=2");
    }

    #[test]
    fn test_structural_reads_sibling_cell() {
        let found = scan(
            ScanStrategy::Structural,
            r#"<table>
                <tr><td>Nota Tecnica.pdf</td><td class="colSituacao">Ativo</td>
                    <td><a href="/get/1">abrir</a></td></tr>
                <tr><td>sem arquivo</td><td><a href="/get/2">abrir</a></td></tr>
               </table>"#,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name.as_deref(), Some("Nota Tecnica.pdf"));
        assert_eq!(found[0].status_label.as_deref(), Some("Ativo"));
    }

    #[test]
    fn test_embedded_reads_scripts_without_running_them() {
        let found = scan(
            ScanStrategy::EmbeddedReference,
            r#"<script>var u = '/REP2/DownloadConsultaPublica/42'; alert(u);</script>"#,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].internal_id.as_deref(), Some("42"));
        assert_eq!(found[0].uri, "https://example.com/REP2/DownloadConsultaPublica/42");
    }

    #[test]
    fn test_last_resort_respects_link_bound() {
        let one = scan(ScanStrategy::LastResort, r#"<a href="/only">x</a>"#);
        assert_eq!(one.len(), 1);

        let many = scan(
            ScanStrategy::LastResort,
            r#"<a href="/a">a</a><a href="/b">b</a><a href="/c">c</a>"#,
        );
        assert!(many.is_empty());
    }
}
