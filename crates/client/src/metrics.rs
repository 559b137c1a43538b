//! Request metrics.
//!
//! The pipeline reports one start and one finish event per logical request,
//! regardless of outcome. Retries and the post-refresh replay belong to the
//! same logical request.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::request::RequestMethod;

const RECENT_CAPACITY: usize = 100;

/// Outcome of one logical request.
#[derive(Debug, Clone)]
pub struct RequestMetric {
    pub method: RequestMethod,
    pub path: String,
    pub success: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Snapshot of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSummary {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl MetricsSummary {
    /// Requests started but not yet finished.
    pub fn in_flight(&self) -> u64 {
        self.started.saturating_sub(self.succeeded + self.failed)
    }
}

/// In-process request counters plus a bounded list of recent outcomes.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    recent: Mutex<VecDeque<RequestMetric>>,
}

impl RequestMetrics {
    /// Create empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a logical request.
    pub fn request_started(&self, method: RequestMethod, path: &str) {
        self.started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%method, path, "request started");
    }

    /// Record the end of a logical request.
    pub fn request_finished(&self, metric: RequestMetric) {
        if metric.success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(metric);
    }

    /// Current counters.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Most recent outcomes, oldest first.
    pub fn recent(&self) -> Vec<RequestMetric> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.started.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(success: bool) -> RequestMetric {
        RequestMetric {
            method: RequestMethod::Get,
            path: "/x".into(),
            success,
            status: Some(if success { 200 } else { 500 }),
            error: (!success).then(|| "boom".to_string()),
            duration: Duration::from_millis(3),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_counters() {
        let metrics = RequestMetrics::new();
        metrics.request_started(RequestMethod::Get, "/x");
        metrics.request_started(RequestMethod::Get, "/x");
        metrics.request_finished(metric(true));

        let summary = metrics.summary();
        assert_eq!(summary.started, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.in_flight(), 1);

        metrics.request_finished(metric(false));
        assert_eq!(metrics.summary().failed, 1);
        assert_eq!(metrics.recent().len(), 2);
        assert_eq!(metrics.recent()[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_recent_is_bounded() {
        let metrics = RequestMetrics::new();
        for _ in 0..(RECENT_CAPACITY + 10) {
            metrics.request_finished(metric(true));
        }
        assert_eq!(metrics.recent().len(), RECENT_CAPACITY);
    }

    #[test]
    fn test_reset() {
        let metrics = RequestMetrics::new();
        metrics.request_started(RequestMethod::Post, "/y");
        metrics.request_finished(metric(true));
        metrics.reset();
        assert_eq!(metrics.summary(), MetricsSummary::default());
        assert!(metrics.recent().is_empty());
    }
}
