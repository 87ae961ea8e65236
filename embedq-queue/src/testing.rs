//! Deterministic collaborators for tests.
//!
//! Enabled by the `testing` feature.

use crate::backend::{BackendError, EmbeddingBackend};
use crate::clock::Clock;
use async_trait::async_trait;
use embedq_cache::Embedding;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Settable clock.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
    hour: AtomicU32,
}

impl ManualClock {
    /// Clock reading `now_ms` at local hour `hour`.
    pub fn new(now_ms: i64, hour: u32) -> Self {
        Self {
            millis: AtomicI64::new(now_ms),
            hour: AtomicU32::new(hour % 24),
        }
    }

    /// Set the local hour.
    pub fn set_hour(&self, hour: u32) {
        self.hour.store(hour % 24, Ordering::SeqCst);
    }

    /// Set the Unix time.
    pub fn set_millis(&self, now_ms: i64) {
        self.millis.store(now_ms, Ordering::SeqCst);
    }

    /// Move time forward.
    pub fn advance_millis(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn local_hour(&self) -> u32 {
        self.hour.load(Ordering::SeqCst)
    }
}

/// Backend returning deterministic vectors of a fixed dimensionality.
#[derive(Debug)]
pub struct ScriptedBackend {
    dimension: usize,
    calls: AtomicUsize,
    pending_failures: AtomicUsize,
    always_fail: AtomicBool,
    failing_texts: Mutex<HashSet<String>>,
    latency: Duration,
}

impl ScriptedBackend {
    /// Backend producing `dimension`-long vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            pending_failures: AtomicUsize::new(0),
            always_fail: AtomicBool::new(false),
            failing_texts: Mutex::new(HashSet::new()),
            latency: Duration::ZERO,
        }
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `n` calls.
    pub fn fail_next(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched off.
    pub fn fail_always(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Fail every call for `text`.
    pub fn fail_on(&self, text: impl Into<String>) {
        if let Ok(mut texts) = self.failing_texts.lock() {
            texts.insert(text.into());
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Vector this backend returns for `text`.
    pub fn vector_for(&self, text: &str) -> Embedding {
        let seed = text
            .bytes()
            .fold(17u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
        (0..self.dimension)
            .map(|i| {
                let mixed = seed.wrapping_add(i as u32).wrapping_mul(2_654_435_761);
                (mixed % 2000) as f32 / 1000.0 - 1.0
            })
            .collect()
    }

    fn should_fail(&self, text: &str) -> bool {
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        let scripted = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        scripted
            || self
                .failing_texts
                .lock()
                .map(|texts| texts.contains(text))
                .unwrap_or(false)
    }
}

#[async_trait]
impl EmbeddingBackend for ScriptedBackend {
    async fn generate(&self, text: &str) -> Result<Embedding, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.should_fail(text) {
            return Err(BackendError::Unavailable("scripted failure".into()));
        }
        Ok(self.vector_for(text))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
