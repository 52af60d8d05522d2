//! In-process counters exposed over the stats endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters accumulated since process start. Shared between the scheduler,
/// the orchestrator, and the web layer.
#[derive(Debug, Default)]
pub struct Metrics {
    cycles_run: AtomicU64,
    posts_succeeded: AtomicU64,
    posts_failed: AtomicU64,
    fallbacks_attempted: AtomicU64,
    persistence_failures_swallowed: AtomicU64,
}

/// A point-in-time copy of the counters, for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub cycles_run: u64,
    pub posts_succeeded: u64,
    pub posts_failed: u64,
    pub fallbacks_attempted: u64,
    pub persistence_failures_swallowed: u64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.posts_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.posts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures_swallowed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            posts_succeeded: self.posts_succeeded.load(Ordering::Relaxed),
            posts_failed: self.posts_failed.load(Ordering::Relaxed),
            fallbacks_attempted: self.fallbacks_attempted.load(Ordering::Relaxed),
            persistence_failures_swallowed: self
                .persistence_failures_swallowed
                .load(Ordering::Relaxed),
        }
    }
}
