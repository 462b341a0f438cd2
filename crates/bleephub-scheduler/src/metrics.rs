//! Scheduler counters for the introspection endpoints.

use bleephub_core::run::RunResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct SchedulerMetrics {
    /// Workflows accepted by submit.
    pub workflow_submissions: AtomicU64,
    /// Job request envelopes created.
    pub job_dispatches: AtomicU64,
    pub completions_success: AtomicU64,
    pub completions_failure: AtomicU64,
    pub completions_cancelled: AtomicU64,
    pub completions_skipped: AtomicU64,
    pub completions_other: AtomicU64,
    /// Workflows currently not completed.
    pub active_workflows: AtomicU64,
    /// Open runner sessions.
    pub active_sessions: AtomicU64,
    started: Instant,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self {
            workflow_submissions: AtomicU64::new(0),
            job_dispatches: AtomicU64::new(0),
            completions_success: AtomicU64::new(0),
            completions_failure: AtomicU64::new(0),
            completions_cancelled: AtomicU64::new(0),
            completions_skipped: AtomicU64::new(0),
            completions_other: AtomicU64::new(0),
            active_workflows: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submission(&self) {
        self.workflow_submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.job_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self, result: &RunResult) {
        let counter = match result {
            RunResult::Success => &self.completions_success,
            RunResult::Failure => &self.completions_failure,
            RunResult::Cancelled => &self.completions_cancelled,
            RunResult::Skipped => &self.completions_skipped,
            RunResult::Other(_) => &self.completions_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_workflows(&self, count: usize) {
        self.active_workflows.store(count as u64, Ordering::Relaxed);
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.store(count as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let job_completions = [
            ("success", &self.completions_success),
            ("failure", &self.completions_failure),
            ("cancelled", &self.completions_cancelled),
            ("skipped", &self.completions_skipped),
            ("other", &self.completions_other),
        ]
        .into_iter()
        .map(|(kind, counter)| (kind.to_string(), counter.load(Ordering::Relaxed)))
        .filter(|(_, n)| *n > 0)
        .collect();

        MetricsSnapshot {
            workflow_submissions: self.workflow_submissions.load(Ordering::Relaxed),
            job_dispatches: self.job_dispatches.load(Ordering::Relaxed),
            job_completions,
            active_workflows: self.active_workflows.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub workflow_submissions: u64,
    pub job_dispatches: u64,
    pub job_completions: BTreeMap<String, u64>,
    pub active_workflows: u64,
    pub active_sessions: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counts_completions_by_result() {
        let metrics = SchedulerMetrics::new();
        metrics.record_submission();
        metrics.record_dispatch();
        metrics.record_dispatch();
        metrics.record_completion(&RunResult::Success);
        metrics.record_completion(&RunResult::Failure);
        metrics.record_completion(&RunResult::Success);
        metrics.set_active_sessions(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.workflow_submissions, 1);
        assert_eq!(snapshot.job_dispatches, 2);
        assert_eq!(
            snapshot.job_completions,
            BTreeMap::from([("failure".to_string(), 1), ("success".to_string(), 2)])
        );
        assert_eq!(snapshot.active_sessions, 2);
    }
}
