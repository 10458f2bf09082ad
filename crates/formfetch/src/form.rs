// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Search form automation: load the entry page, fill the key, submit.

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::renderer::PageContext;
use crate::types::SearchKey;
use std::time::Duration;

/// Ordered alternative selectors for one logical element.
pub struct SelectorChain<'a> {
    name: &'static str,
    selectors: &'a [String],
}

impl<'a> SelectorChain<'a> {
    pub fn new(name: &'static str, selectors: &'a [String]) -> Self {
        Self { name, selectors }
    }

    /// First selector that resolves to an element.
    ///
    /// Lookup errors count as a miss for that selector only.
    pub async fn locate(&self, page: &dyn PageContext) -> Result<&'a str, FetchError> {
        for selector in self.selectors {
            match page.exists(selector).await {
                Ok(true) => {
                    tracing::debug!(chain = self.name, selector = %selector, "selector matched");
                    return Ok(selector.as_str());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(chain = self.name, selector = %selector, error = %e, "selector lookup failed");
                }
            }
        }
        Err(FetchError::ElementNotFound {
            chain: self.name.to_string(),
            tried: self.selectors.to_vec(),
        })
    }
}

/// Drive the search form from the entry page to the result view.
pub async fn submit_search(
    page: &dyn PageContext,
    key: &SearchKey,
    config: &FetchConfig,
) -> Result<(), FetchError> {
    open_entry(page, config).await?;
    fill_and_submit(page, key, config).await
}

/// Load the entry page and let it settle.
pub async fn open_entry(page: &dyn PageContext, config: &FetchConfig) -> Result<(), FetchError> {
    let nav = page
        .navigate(&config.entry_url, config.navigation_timeout)
        .await
        .map_err(FetchError::session)?;
    tracing::debug!(url = %nav.final_url, load_ms = nav.load_time_ms, "entry page loaded");

    settle(config.entry_settle).await;
    Ok(())
}

/// Type the key into the search input, submit, and wait for the result view.
pub async fn fill_and_submit(
    page: &dyn PageContext,
    key: &SearchKey,
    config: &FetchConfig,
) -> Result<(), FetchError> {
    let input = SelectorChain::new("search input", &config.input_selectors)
        .locate(page)
        .await?;
    page.type_into(input, key.as_str())
        .await
        .map_err(FetchError::session)?;

    let submit = SelectorChain::new("submit", &config.submit_selectors)
        .locate(page)
        .await?;
    page.click(submit).await.map_err(FetchError::session)?;

    // Postback forms may or may not navigate; take whichever comes first.
    tokio::select! {
        res = page.wait_for_navigation(config.submit_grace) => {
            if let Err(e) = res {
                tracing::debug!(error = %e, "no navigation after submit");
            }
        }
        _ = tokio::time::sleep(config.submit_grace) => {
            tracing::debug!("submit grace period elapsed");
        }
    }
    Ok(())
}

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedPage;

    fn quick_config() -> FetchConfig {
        FetchConfig {
            entry_settle: Duration::ZERO,
            submit_grace: Duration::from_millis(10),
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_chain_prefers_first_match() {
        let page = ScriptedPage::new("https://x/")
            .with_selectors(&["input[type='text']", "#txtNumeroProcesso"]);
        let cfg = quick_config();
        let found = SelectorChain::new("search input", &cfg.input_selectors)
            .locate(&page)
            .await
            .unwrap();
        assert_eq!(found, "#txtNumeroProcesso");
    }

    #[tokio::test]
    async fn test_generic_fallback() {
        let page = ScriptedPage::new("https://x/")
            .with_selectors(&["input[type='text']", "input[type='submit']"]);
        let key = SearchKey::parse("15414.900381/2013-67").unwrap();
        submit_search(&page, &key, &quick_config()).await.unwrap();

        let calls = page.calls();
        assert!(calls.contains(&"type input[type='text'] 15414.900381/2013-67".to_string()));
        assert!(calls.contains(&"click input[type='submit']".to_string()));
    }

    #[tokio::test]
    async fn test_missing_submit_names_the_chain() {
        let page = ScriptedPage::new("https://x/").with_selectors(&["#txtNumeroProcesso"]);
        let key = SearchKey::parse("123").unwrap();
        let err = submit_search(&page, &key, &quick_config()).await.unwrap_err();
        match err {
            FetchError::ElementNotFound { chain, tried } => {
                assert_eq!(chain, "submit");
                assert_eq!(tried.len(), 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_grace_period_bounds_unsettled_navigation() {
        let page = ScriptedPage::new("https://x/").hanging_navigation();
        let key = SearchKey::parse("123").unwrap();
        let config = FetchConfig {
            submit_grace: Duration::from_millis(50),
            ..quick_config()
        };

        let started = std::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(5), fill_and_submit(&page, &key, &config))
            .await
            .expect("submit should not wait for navigation")
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(page.calls().contains(&"click #btnConsultar".to_string()));
    }

    #[tokio::test]
    async fn test_entry_navigation_failure_is_session_error() {
        let page = ScriptedPage::new("https://x/").failing_navigation("net::ERR_NAME_NOT_RESOLVED");
        let key = SearchKey::parse("123").unwrap();
        let err = submit_search(&page, &key, &quick_config()).await.unwrap_err();
        assert_eq!(err.category(), "session_error");
        assert!(err.to_string().contains("ERR_NAME_NOT_RESOLVED"));
    }
}
