//! Counters kept by an outcome reporter.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::Outcome;

/// Outcome counters, by job.
#[derive(Debug, Default)]
pub struct ReporterMetrics {
    succeeded: AtomicU64,
    retryable: AtomicU64,
    discarded: AtomicU64,
    duplicates: AtomicU64,
    missing: AtomicU64,
}

impl ReporterMetrics {
    /// Records a forwarded outcome.
    pub fn record(&self, outcome: &Outcome) {
        let jobs = outcome.jobs.len() as u64;
        let counter = if outcome.is_success() {
            &self.succeeded
        } else if outcome.force_discard {
            &self.discarded
        } else {
            &self.retryable
        };
        counter.fetch_add(jobs, Ordering::Relaxed);
    }

    /// Records dropped duplicate job identifiers.
    pub fn record_duplicates(&self, count: usize) {
        self.duplicates.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records jobs that had to be reconciled.
    pub fn record_missing(&self, count: usize) {
        self.missing.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns the number of delivered jobs.
    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Returns the number of jobs failed with a retryable error.
    #[must_use]
    pub fn retryable(&self) -> u64 {
        self.retryable.load(Ordering::Relaxed)
    }

    /// Returns the number of jobs failed terminally.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Returns the number of dropped duplicate reports.
    #[must_use]
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Returns the number of reconciled jobs.
    #[must_use]
    pub fn missing(&self) -> u64 {
        self.missing.load(Ordering::Relaxed)
    }

    /// Returns the number of jobs with a forwarded outcome.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.succeeded() + self.retryable() + self.discarded()
    }

    /// Converts the counters to JSON.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "succeeded": self.succeeded(),
            "retryable": self.retryable(),
            "discarded": self.discarded(),
            "duplicates": self.duplicates(),
            "missing": self.missing(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::JobError;

    #[test]
    fn test_counts_by_job() {
        let metrics = ReporterMetrics::default();
        metrics.record(&Outcome::succeeded_all(vec!["a".into(), "b".into()]));
        metrics.record(&Outcome::retry("c", JobError::new(503, "busy")));
        metrics.record(&Outcome::discard("d", JobError::new(400, "bad")));
        metrics.record_duplicates(1);

        assert_eq!(metrics.succeeded(), 2);
        assert_eq!(metrics.retryable(), 1);
        assert_eq!(metrics.discarded(), 1);
        assert_eq!(metrics.total(), 4);
        assert_eq!(metrics.to_dict()["duplicates"], 1);
    }
}
