// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Magic-byte validation of retrieved payloads.

use crate::config::DocumentFormat;
use crate::error::{FetchError, InvalidContentKind};

/// Prefixes that mark a markup document served in place of the file.
const MARKUP_PREFIXES: &[&[u8]] = &[b"<!doctype", b"<html", b"<?xml", b"<head", b"<body"];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Bytes of payload shown in debug logs.
const PREVIEW_LEN: usize = 500;

/// Checks that a payload carries the expected format's signature.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    signature: Vec<u8>,
    extension: String,
}

impl ContentValidator {
    pub fn new(format: &DocumentFormat) -> Self {
        Self {
            signature: format.signature.clone(),
            extension: format.extension.to_ascii_uppercase(),
        }
    }

    pub fn validate(&self, bytes: &[u8]) -> Result<(), FetchError> {
        if bytes.is_empty() {
            return Err(FetchError::InvalidContent {
                kind: InvalidContentKind::Empty,
                message: "retrieved document is empty".to_string(),
            });
        }
        if bytes.starts_with(&self.signature) {
            return Ok(());
        }

        tracing::debug!(
            length = bytes.len(),
            preview = %preview(bytes),
            "payload failed signature check"
        );

        if looks_like_markup(bytes) {
            return Err(FetchError::InvalidContent {
                kind: InvalidContentKind::Markup,
                message: "received an HTML page instead of the document; the session may have expired"
                    .to_string(),
            });
        }
        Err(FetchError::InvalidContent {
            kind: InvalidContentKind::Signature,
            message: format!("retrieved file is not a valid {}", self.extension),
        })
    }
}

fn looks_like_markup(bytes: &[u8]) -> bool {
    let rest = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let start = rest
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(rest.len());
    let rest = &rest[start..];
    MARKUP_PREFIXES.iter().any(|prefix| {
        rest.len() >= prefix.len() && rest[..prefix.len()].eq_ignore_ascii_case(prefix)
    })
}

/// Printable prefix of a payload for logs.
fn preview(bytes: &[u8]) -> String {
    let end = bytes.len().min(PREVIEW_LEN);
    String::from_utf8_lossy(&bytes[..end])
        .chars()
        .map(|c| if c.is_control() && c != '\n' { '.' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ContentValidator {
        ContentValidator::new(&DocumentFormat::default())
    }

    fn kind(bytes: &[u8]) -> InvalidContentKind {
        match validator().validate(bytes) {
            Err(FetchError::InvalidContent { kind, .. }) => kind,
            other => panic!("expected invalid content, got {other:?}"),
        }
    }

    #[test]
    fn test_accepts_signature() {
        assert!(validator().validate(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3").is_ok());
    }

    #[test]
    fn test_markup_variants() {
        assert_eq!(kind(b"<!DOCTYPE html><html>"), InvalidContentKind::Markup);
        assert_eq!(kind(b"\xEF\xBB\xBF  \r\n<HTML><body>expired"), InvalidContentKind::Markup);
        assert_eq!(kind(b"<?xml version=\"1.0\"?>"), InvalidContentKind::Markup);
        assert_eq!(kind(b"\n<body>"), InvalidContentKind::Markup);
    }

    #[test]
    fn test_other_payloads() {
        assert_eq!(kind(b""), InvalidContentKind::Empty);
        assert_eq!(kind(b"PK\x03\x04zip"), InvalidContentKind::Signature);
        assert_eq!(kind(b" %PDF-1.4"), InvalidContentKind::Signature);
    }

    #[test]
    fn test_messages() {
        let err = validator().validate(b"GIF89a").unwrap_err();
        assert_eq!(err.to_string(), "retrieved file is not a valid PDF");
        let err = validator().validate(b"<html>").unwrap_err();
        assert!(err.to_string().contains("session may have expired"));
    }

    #[test]
    fn test_preview_masks_control_bytes() {
        assert_eq!(preview(b"ab\x00c"), "ab.c");
    }
}
