// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Turns a validated capture into the artifact handed back to the caller.

use crate::config::DocumentFormat;
use crate::renderer::CapturedResponse;
use crate::types::{CandidateArtifact, RetrievedArtifact};
use std::time::Duration;

/// Build the artifact. Assumes `response.body` already passed validation.
pub fn package(
    response: CapturedResponse,
    candidate: &CandidateArtifact,
    format: &DocumentFormat,
    elapsed: Duration,
) -> RetrievedArtifact {
    let source = response
        .suggested_filename
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(&candidate.display_name);
    let filename = derive_filename(source, format);
    let size_bytes = response.body.len();

    RetrievedArtifact {
        bytes: response.body,
        filename,
        content_type: format.content_type.clone(),
        size_bytes,
        elapsed_ms: elapsed.as_millis() as u64,
    }
}

/// Sanitise a name to `[A-Za-z0-9_.-]` and make sure it carries the
/// format's extension.
pub fn derive_filename(name: &str, format: &DocumentFormat) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.chars().all(|c| c == '_' || c == '.') {
        return format.default_filename.clone();
    }

    let suffix = format!(".{}", format.extension);
    if cleaned.to_ascii_lowercase().ends_with(&suffix) {
        cleaned
    } else {
        format!("{cleaned}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str) -> CandidateArtifact {
        CandidateArtifact {
            ordinal: 1,
            display_name: name.to_string(),
            internal_id: None,
            uri: "https://x/a".into(),
            status_label: None,
            score: 3.0,
            matched_by: Vec::new(),
        }
    }

    #[test]
    fn test_sanitises_and_appends_extension() {
        let fmt = DocumentFormat::default();
        assert_eq!(derive_filename("Nota Técnica", &fmt), "Nota_T_cnica.pdf");
        assert_eq!(derive_filename("a/b\\c.PDF", &fmt), "a_b_c.PDF");
        assert_eq!(derive_filename("   ", &fmt), "documento.pdf");
        assert_eq!(derive_filename("///", &fmt), "documento.pdf");
    }

    #[test]
    fn test_suggested_name_wins() {
        let fmt = DocumentFormat::default();
        let resp = CapturedResponse::download(
            "https://x/d/1",
            Some("Condicoes Gerais.pdf"),
            b"%PDF-1.4".to_vec(),
        );
        let artifact = package(resp, &candidate("Baixar"), &fmt, Duration::from_millis(1500));
        assert_eq!(artifact.filename, "Condicoes_Gerais.pdf");
        assert_eq!(artifact.content_type, "application/pdf");
        assert_eq!(artifact.size_bytes, 8);
        assert_eq!(artifact.elapsed_ms, 1500);
    }

    #[test]
    fn test_falls_back_to_display_name() {
        let fmt = DocumentFormat::default();
        let resp = CapturedResponse::response("https://x/d/1", None, b"%PDF-".to_vec());
        let artifact = package(resp, &candidate("Regulamento.pdf"), &fmt, Duration::ZERO);
        assert_eq!(artifact.filename, "Regulamento.pdf");
    }
}
