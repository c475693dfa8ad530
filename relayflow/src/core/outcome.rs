//! The structured result of attempting to deliver one or more jobs.

use std::fmt;
use std::sync::Arc;

use crate::action::Action;
use crate::errors::{JobError, RelayError};

/// The result of a delivery attempt, consumed by the scheduler.
///
/// A job identifier appears in at most one outcome per attempt. When
/// `force_discard` is set the failure is terminal regardless of the remaining
/// retry budget.
#[derive(Clone, Default)]
pub struct Outcome {
    /// Identifiers of the jobs this outcome applies to.
    pub jobs: Vec<String>,
    /// The failure, if any.
    pub error: Option<JobError>,
    /// Marks the failure as terminal.
    pub force_discard: bool,
    /// Derived actions to schedule as new jobs. Only ever set on success.
    pub on_succeeded: Vec<Arc<dyn Action>>,
}

impl Outcome {
    /// Creates a success outcome for one job.
    #[must_use]
    pub fn succeeded(job_id: impl Into<String>) -> Self {
        Self::succeeded_all(vec![job_id.into()])
    }

    /// Creates a success outcome for several jobs at once.
    #[must_use]
    pub fn succeeded_all(jobs: Vec<String>) -> Self {
        Self {
            jobs,
            ..Self::default()
        }
    }

    /// Creates a retryable failure for one job.
    #[must_use]
    pub fn retry(job_id: impl Into<String>, error: JobError) -> Self {
        Self::failed(vec![job_id.into()], error, false)
    }

    /// Creates a terminal failure for one job.
    #[must_use]
    pub fn discard(job_id: impl Into<String>, error: JobError) -> Self {
        Self::failed(vec![job_id.into()], error, true)
    }

    /// Creates a failure for several jobs.
    #[must_use]
    pub fn failed(jobs: Vec<String>, error: JobError, force_discard: bool) -> Self {
        Self {
            jobs,
            error: Some(error),
            force_discard,
            on_succeeded: Vec::new(),
        }
    }

    /// Creates a failure from a relay error, terminal when the error always is.
    #[must_use]
    pub fn from_error(job_id: impl Into<String>, error: &RelayError) -> Self {
        Self::failed(
            vec![job_id.into()],
            error.to_job_error(),
            error.is_always_terminal(),
        )
    }

    /// Attaches derived actions to a success outcome.
    ///
    /// Failures never carry cascades; derived actions passed to a failed
    /// outcome are dropped.
    #[must_use]
    pub fn with_cascade(mut self, actions: Vec<Arc<dyn Action>>) -> Self {
        if self.is_success() {
            self.on_succeeded.extend(actions);
        } else if !actions.is_empty() {
            tracing::warn!(
                jobs = ?self.jobs,
                dropped = actions.len(),
                "Cascade attached to a failed outcome was dropped"
            );
        }
        self
    }

    /// Returns true if the delivery succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns true if the failure is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.error.is_some() && self.force_discard
    }

    /// Returns true if the failure can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.error.is_some() && !self.force_discard
    }

    /// Returns the status code of the failure, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.error.as_ref().map(|e| e.status_code)
    }

    /// Converts to a JSON representation suitable for event sinks.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "jobs": self.jobs,
            "error": self.error.as_ref().map(JobError::to_dict),
            "force_discard": self.force_discard,
            "on_succeeded": self.on_succeeded.iter().map(|a| a.name().to_string()).collect::<Vec<_>>(),
        })
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("jobs", &self.jobs)
            .field("error", &self.error)
            .field("force_discard", &self.force_discard)
            .field(
                "on_succeeded",
                &self.on_succeeded.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
