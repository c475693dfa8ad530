//! Status classification.
//!
//! Each external system has one immutable table mapping a response status to
//! a terminal (`true`) or retryable (`false`) decision. Tables are built once
//! per process and shared read-only. Statuses missing from a table are
//! retryable.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::errors::{JobError, TransportError, STATUS_INTERNAL};

/// First status treated as a failure.
pub const FAILURE_THRESHOLD: u16 = 300;

/// An immutable status table for one external system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPolicy {
    name: &'static str,
    table: HashMap<u16, bool>,
}

impl StatusPolicy {
    /// Builds a table from terminal and retryable statuses.
    #[must_use]
    pub fn new(name: &'static str, terminal: &[u16], retryable: &[u16]) -> Self {
        let table = terminal
            .iter()
            .map(|code| (*code, true))
            .chain(retryable.iter().map(|code| (*code, false)))
            .collect();
        Self { name, table }
    }

    /// Returns the external system this table belongs to.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if the status is terminal. Unlisted statuses are not.
    #[must_use]
    pub fn classify(&self, status: u16) -> bool {
        self.table.get(&status).copied().unwrap_or(false)
    }

    /// Returns true if the status must be classified as a failure.
    #[must_use]
    pub fn is_failure(status: u16) -> bool {
        status >= FAILURE_THRESHOLD
    }

    /// Returns the number of listed statuses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if no status is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Table for the Amplitude HTTP API.
pub fn amplitude() -> &'static StatusPolicy {
    static POLICY: OnceLock<StatusPolicy> = OnceLock::new();
    POLICY.get_or_init(|| {
        StatusPolicy::new("amplitude", &[400, 413, 422], &[429, 500, 502, 503, 504])
    })
}

/// Table for the Mailchimp marketing API.
pub fn mailchimp() -> &'static StatusPolicy {
    static POLICY: OnceLock<StatusPolicy> = OnceLock::new();
    POLICY.get_or_init(|| {
        StatusPolicy::new(
            "mailchimp",
            &[400, 405, 414, 422],
            &[401, 403, 404, 429, 500, 503],
        )
    })
}

/// Table for the Segment tracking API.
pub fn segment() -> &'static StatusPolicy {
    static POLICY: OnceLock<StatusPolicy> = OnceLock::new();
    POLICY.get_or_init(|| StatusPolicy::new("segment", &[400], &[]))
}

/// How a destination turns a single call result into a discard decision.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// The destination's status table.
    pub status: &'static StatusPolicy,
    /// Whether a failed transport call is terminal.
    pub discard_on_transport_error: bool,
}

impl DeliveryPolicy {
    /// Creates a delivery policy.
    #[must_use]
    pub fn new(status: &'static StatusPolicy, discard_on_transport_error: bool) -> Self {
        Self {
            status,
            discard_on_transport_error,
        }
    }

    /// Classifies a received response status.
    #[must_use]
    pub fn classify_status(&self, status: u16) -> bool {
        self.status.classify(status)
    }

    /// Converts a transport failure into the error and discard flag of an
    /// outcome. Cancellation is never terminal.
    #[must_use]
    pub fn classify_transport(&self, error: &TransportError) -> (JobError, bool) {
        let job_error = crate::errors::RelayError::from(error.clone()).to_job_error();
        if error.is_cancellation() {
            return (job_error, false);
        }
        (
            JobError::new(STATUS_INTERNAL, job_error.message),
            self.discard_on_transport_error,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amplitude_table() {
        let policy = amplitude();
        for code in [400, 413, 422] {
            assert!(policy.classify(code), "{code} should be terminal");
        }
        for code in [429, 500, 502, 503, 504] {
            assert!(!policy.classify(code), "{code} should be retryable");
        }
    }

    #[test]
    fn test_mailchimp_table() {
        let policy = mailchimp();
        for code in [400, 405, 414, 422] {
            assert!(policy.classify(code));
        }
        for code in [401, 403, 404, 429, 500, 503] {
            assert!(!policy.classify(code));
        }
        assert_eq!(policy.len(), 10);
    }

    #[test]
    fn test_segment_table() {
        let policy = segment();
        assert!(policy.classify(400));
        for code in [401, 404, 413, 429, 500, 503] {
            assert!(!policy.classify(code));
        }
    }

    #[test]
    fn test_unknown_statuses_are_retryable() {
        for policy in [amplitude(), mailchimp(), segment()] {
            for code in [300, 301, 418, 451, 507, 599] {
                assert!(!policy.classify(code), "{} {code}", policy.name());
            }
        }
    }

    #[test]
    fn test_failure_threshold() {
        assert!(!StatusPolicy::is_failure(200));
        assert!(!StatusPolicy::is_failure(299));
        assert!(StatusPolicy::is_failure(300));
        assert!(StatusPolicy::is_failure(500));
    }

    #[test]
    fn test_transport_classification() {
        let strict = DeliveryPolicy::new(amplitude(), true);
        let (error, discard) = strict.classify_transport(&TransportError::connect("refused"));
        assert!(discard);
        assert_eq!(error.status_code, 500);

        let lenient = DeliveryPolicy::new(segment(), false);
        let (_, discard) = lenient.classify_transport(&TransportError::timeout("slow"));
        assert!(!discard);

        let (error, discard) = strict.classify_transport(&TransportError::cancelled("shutdown"));
        assert!(!discard);
        assert_eq!(error.status_code, 499);
    }

    #[test]
    fn test_tables_are_shared() {
        assert!(std::ptr::eq(amplitude(), amplitude()));
    }
}
