//! Environment readiness check.

use formfetch::renderer::chromium::find_chromium;
use formfetch::FetchConfig;

/// One readiness check.
#[derive(Debug, Clone)]
pub struct Check {
    pub ok: bool,
    pub message: String,
}

/// Run every check against `config`.
pub fn checks(config: &FetchConfig) -> Vec<Check> {
    let mut out = Vec::new();

    match find_chromium(config.browser.chromium_path.as_deref()) {
        Some(path) => out.push(Check {
            ok: true,
            message: format!("Chromium found: {}", path.display()),
        }),
        None => out.push(Check {
            ok: false,
            message: "Chromium NOT found. Set FORMFETCH_CHROMIUM_PATH or install google-chrome."
                .to_string(),
        }),
    }

    match url::Url::parse(&config.entry_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => out.push(Check {
            ok: true,
            message: format!("Entry URL: {url}"),
        }),
        _ => out.push(Check {
            ok: false,
            message: format!("Entry URL is not an http(s) URL: {}", config.entry_url),
        }),
    }

    let tmp = std::env::temp_dir();
    out.push(Check {
        ok: tmp.is_dir(),
        message: format!("Temp dir for browser profiles: {}", tmp.display()),
    });

    out
}

/// Print the checks; returns whether everything passed.
pub fn run(config: &FetchConfig) -> bool {
    println!("Formfetch Doctor");
    println!("================");
    println!();
    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    let results = checks(config);
    for check in &results {
        let tag = if check.ok { "[OK]" } else { "[!!]" };
        println!("{tag} {}", check.message);
    }

    let ready = results.iter().all(|c| c.ok);
    println!();
    println!("Status: {}", if ready { "READY" } else { "NOT READY" });
    println!(
        "Timeouts: navigation {}s, attempt {}s, request {}s",
        config.navigation_timeout.as_secs(),
        config.attempt_timeout.as_secs(),
        config.request_timeout.as_secs()
    );
    ready
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_entry_url_is_flagged() {
        let config = FetchConfig {
            entry_url: "ftp://example.com/form".to_string(),
            ..FetchConfig::default()
        };
        let results = checks(&config);
        assert!(results
            .iter()
            .any(|c| !c.ok && c.message.contains("ftp://example.com/form")));
    }
}
