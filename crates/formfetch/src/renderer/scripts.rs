// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! JavaScript snippets evaluated inside the page.
//!
//! ## Security: no captured code is executed
//!
//! Every snippet is a fixed template. Values taken from the page (URIs,
//! identifiers) or from the caller (selectors) are escaped for a JS string
//! literal and injected only into string positions, never into code
//! positions. Inline handler text read from the page is never evaluated.

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::Deserialize;

/// Clear the value of the first element matching `selector`.
pub fn clear_field(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector('{}');
            if (!el) return false;
            el.focus();
            el.value = '';
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return true;
        }})()"#,
        sanitize_js_string(selector)
    )
}

/// Fetch `uri` from inside the page (cookies included) and return the body
/// as base64 together with its byte length.
pub fn in_context_fetch(uri: &str) -> String {
    format!(
        r#"(async () => {{
            const resp = await fetch('{}', {{ credentials: 'include' }});
            const buf = new Uint8Array(await resp.arrayBuffer());
            let bin = '';
            const chunk = 0x8000;
            for (let i = 0; i < buf.length; i += chunk) {{
                bin += String.fromCharCode.apply(null, buf.subarray(i, i + chunk));
            }}
            return {{
                status: resp.status,
                url: resp.url,
                contentType: resp.headers.get('content-type'),
                length: buf.length,
                data: btoa(bin)
            }};
        }})()"#,
        sanitize_js_string(uri)
    )
}

/// Click the element that references a candidate.
///
/// Matches on the internal id inside the inline handler first, then on
/// the resolved or raw `href`.
pub fn click_candidate(internal_id: Option<&str>, uri: &str) -> String {
    format!(
        r#"(() => {{
            const id = '{}';
            const uri = '{}';
            const els = Array.from(document.querySelectorAll('a, button, input, [onclick]'));
            const target = els.find(el => id && (el.getAttribute('onclick') || '').includes(id))
                || els.find(el => el.href === uri || el.getAttribute('href') === uri);
            if (!target) return {{ success: false }};
            target.click();
            return {{ success: true }};
        }})()"#,
        sanitize_js_string(internal_id.unwrap_or("")),
        sanitize_js_string(uri)
    )
}

/// Point the current page at `uri`.
pub fn assign_location(uri: &str) -> String {
    format!(
        "(() => {{ window.location.href = '{}'; return true; }})()",
        sanitize_js_string(uri)
    )
}

/// Bytes returned by [`in_context_fetch`], decoded.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub status: u16,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFetchResult {
    status: u16,
    #[serde(default)]
    url: String,
    content_type: Option<String>,
    length: usize,
    data: String,
}

/// Decode the value produced by [`in_context_fetch`].
///
/// Fails when the decoded length differs from the length the page
/// reported, which would mean the transfer mangled the bytes.
pub fn decode_fetch_result(value: serde_json::Value) -> Result<FetchedBytes> {
    let raw: RawFetchResult =
        serde_json::from_value(value).context("unexpected in-page fetch result shape")?;
    let body = base64::engine::general_purpose::STANDARD
        .decode(raw.data.as_bytes())
        .context("in-page fetch returned invalid base64")?;
    if body.len() != raw.length {
        bail!(
            "in-page fetch length mismatch: page reported {} bytes, decoded {}",
            raw.length,
            body.len()
        );
    }
    Ok(FetchedBytes {
        status: raw.status,
        url: raw.url,
        content_type: raw.content_type,
        body,
    })
}

/// Sanitize a string for safe injection into a JavaScript string literal.
///
/// Escapes all characters that could break out of a JS string context:
/// - Backslashes, single/double quotes, backticks
/// - Newlines, carriage returns, tabs
/// - HTML script tags
/// - Null bytes
pub fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize_js_string("hello"), "hello");
        assert_eq!(sanitize_js_string("it's"), "it\\'s");
        assert_eq!(sanitize_js_string("a\"b"), "a\\\"b");
        assert_eq!(sanitize_js_string("abc\0def"), "abcdef");
    }

    #[test]
    fn test_sanitize_script_breakout() {
        let sanitized = sanitize_js_string("</script><script>alert(1)</script>");
        assert!(!sanitized.contains("</script>"));
        assert!(sanitized.contains("\\x3c/script\\x3e"));
    }

    #[test]
    fn test_fetch_script_escapes_uri() {
        let js = in_context_fetch("https://x/a'); alert('1");
        assert!(js.contains("fetch('https://x/a\\'); alert(\\'1'"));
        assert!(js.contains("credentials: 'include'"));
    }

    #[test]
    fn test_click_script_embeds_id_and_uri() {
        let js = click_candidate(Some("991"), "https://x/DownloadConsultaPublica/991");
        assert!(js.contains("const id = '991';"));
        assert!(js.contains("const uri = 'https://x/DownloadConsultaPublica/991';"));
        let js = click_candidate(None, "https://x/a.pdf");
        assert!(js.contains("const id = '';"));
    }

    #[test]
    fn test_decode_fetch_result() {
        let value = json!({
            "status": 200,
            "url": "https://x/doc",
            "contentType": "application/pdf",
            "length": 8,
            "data": "JVBERi0xLjQ="
        });
        let fetched = decode_fetch_result(value).unwrap();
        assert_eq!(fetched.body, b"%PDF-1.4");
        assert_eq!(fetched.content_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let value = json!({
            "status": 200,
            "contentType": null,
            "length": 99,
            "data": "JVBERi0xLjQ="
        });
        let err = decode_fetch_result(value).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }
}
