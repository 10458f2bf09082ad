// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Browser session lifecycle.
//!
//! A session is one isolated browser context bound to exactly one request.
//! It is never pooled and never shared. Teardown happens on every exit path:
//! an explicit [`SessionHandle::close`], or `Drop` when the request future is
//! cancelled by an outer deadline.

use crate::error::FetchError;
use crate::renderer::{PageContext, Renderer};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on a best-effort browser shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens sessions on a renderer and tracks how many are live.
pub struct SessionManager {
    renderer: Arc<dyn Renderer>,
    open: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer,
            open: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Launch a fresh isolated browser context.
    pub async fn open(&self) -> Result<SessionHandle, FetchError> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("sess-{n}");

        let context = self.renderer.new_context().await.map_err(|e| {
            tracing::warn!(session = %id, error = %format!("{e:#}"), "failed to open browser session");
            FetchError::session(e)
        })?;

        self.open.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session = %id, "session opened");

        Ok(SessionHandle {
            id,
            page: Arc::from(context),
            open: Arc::clone(&self.open),
            closed: false,
        })
    }

    /// Open a session, run `f` against its page and close it again,
    /// whatever `f` returns.
    pub async fn scoped<F, Fut, T>(&self, f: F) -> Result<T, FetchError>
    where
        F: FnOnce(Arc<dyn PageContext>) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut handle = self.open().await?;
        let result = handle.with_page(f).await;
        handle.close().await;
        result
    }

    /// Number of sessions opened and not yet released.
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

/// Exclusive handle on one live browser session.
pub struct SessionHandle {
    id: String,
    page: Arc<dyn PageContext>,
    open: Arc<AtomicUsize>,
    closed: bool,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `f` with the session's page.
    pub async fn with_page<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Arc<dyn PageContext>) -> Fut,
        Fut: Future<Output = T>,
    {
        f(Arc::clone(&self.page)).await
    }

    /// Release the session. Idempotent and never fails; shutdown problems
    /// are logged and swallowed.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.open.fetch_sub(1, Ordering::SeqCst);

        match tokio::time::timeout(CLOSE_TIMEOUT, self.page.close()).await {
            Ok(Ok(())) => tracing::debug!(session = %self.id, "session closed"),
            Ok(Err(e)) => {
                tracing::warn!(session = %self.id, error = %format!("{e:#}"), "session close failed")
            }
            Err(_) => tracing::warn!(session = %self.id, "session close timed out"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.open.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(session = %self.id, "session dropped while open, scheduling teardown");

        let page = Arc::clone(&self.page);
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if tokio::time::timeout(CLOSE_TIMEOUT, page.close()).await.is_err() {
                        tracing::warn!(session = %id, "deferred session close timed out");
                    }
                });
            }
            Err(_) => tracing::warn!(session = %id, "no runtime to tear down dropped session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedPage, ScriptedRenderer};
    use crate::renderer::NoopRenderer;

    #[tokio::test]
    async fn test_open_and_close_track_count() {
        let renderer = Arc::new(ScriptedRenderer::new(ScriptedPage::new("https://x/")));
        let manager = SessionManager::new(renderer.clone());

        let mut handle = manager.open().await.unwrap();
        assert_eq!(handle.id(), "sess-1");
        assert_eq!(manager.open_sessions(), 1);

        handle.close().await;
        handle.close().await;
        assert!(handle.is_closed());
        assert_eq!(manager.open_sessions(), 0);
        assert_eq!(renderer.closed_contexts(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_session() {
        let renderer = Arc::new(ScriptedRenderer::new(ScriptedPage::new("https://x/")));
        let manager = SessionManager::new(renderer.clone());

        let handle = manager.open().await.unwrap();
        drop(handle);
        assert_eq!(manager.open_sessions(), 0);

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(renderer.closed_contexts(), 1);
    }

    #[tokio::test]
    async fn test_scoped_closes_on_error() {
        let renderer = Arc::new(ScriptedRenderer::new(ScriptedPage::new("https://x/")));
        let manager = SessionManager::new(renderer.clone());

        let result: Result<(), FetchError> = manager
            .scoped(|_page| async { Err(FetchError::NoCandidates) })
            .await;
        assert!(matches!(result, Err(FetchError::NoCandidates)));
        assert_eq!(manager.open_sessions(), 0);
        assert_eq!(renderer.closed_contexts(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_is_session_error() {
        let manager = SessionManager::new(Arc::new(NoopRenderer));
        let err = manager.open().await.err().unwrap();
        assert_eq!(err.category(), "session_error");
        assert_eq!(manager.open_sessions(), 0);
    }
}
