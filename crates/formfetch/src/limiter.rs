// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Admission control for browser sessions.
//!
//! Requests beyond the cap wait in FIFO order on a fair semaphore. The
//! active and queued counters belong to the limiter instance.

use crate::error::FetchError;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Snapshot of the limiter's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStats {
    pub active: usize,
    pub queued: usize,
    pub capacity: Option<usize>,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    queued: AtomicUsize,
}

/// Caps the number of simultaneous pipeline runs.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Option<Arc<Semaphore>>,
    capacity: Option<usize>,
    counters: Arc<Counters>,
}

impl ConcurrencyLimiter {
    /// `None` admits everything immediately while still counting.
    pub fn new(capacity: Option<usize>) -> Self {
        let capacity = capacity.filter(|&c| c > 0);
        Self {
            semaphore: capacity.map(|c| Arc::new(Semaphore::new(c))),
            capacity,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Wait for a slot. The slot is held until the permit is dropped.
    pub async fn acquire(&self) -> Result<LimiterPermit, FetchError> {
        let permit = match &self.semaphore {
            None => None,
            Some(semaphore) => {
                self.counters.queued.fetch_add(1, Ordering::SeqCst);
                let _queued = QueuedGuard(&self.counters);
                let permit = Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| FetchError::Session("concurrency limiter closed".to_string()))?;
                Some(permit)
            }
        };
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        Ok(LimiterPermit {
            counters: Arc::clone(&self.counters),
            _permit: permit,
        })
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            active: self.counters.active.load(Ordering::SeqCst),
            queued: self.counters.queued.load(Ordering::SeqCst),
            capacity: self.capacity,
        }
    }
}

/// Decrements `queued` when the wait ends, including by cancellation.
struct QueuedGuard<'a>(&'a Counters);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An admitted slot.
pub struct LimiterPermit {
    counters: Arc<Counters>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}
