//! Outcome reporting.
//!
//! An action's `load` pushes outcomes through an [`OutcomeReporter`] as soon
//! as each job is settled; the caller consumes them from the paired
//! [`OutcomeStream`]. The reporter enforces the delivery contract: a job
//! identifier is forwarded at most once, and [`OutcomeReporter::reconcile`]
//! settles any job the action left unreported.

mod metrics;

pub use metrics::ReporterMetrics;

use dashmap::DashSet;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::core::{Batch, Outcome};
use crate::errors::{JobError, RelayError, STATUS_INTERNAL};
use crate::events::{
    EventSink, NoOpEventSink, DELIVERY_DISCARDED, DELIVERY_DUPLICATE, DELIVERY_FAILED,
    DELIVERY_MISSING, DELIVERY_SUCCEEDED,
};

/// Creates a reporter and the stream its outcomes are delivered to.
///
/// `capacity` bounds the number of outcomes buffered before `report` waits
/// for the consumer.
#[must_use]
pub fn outcome_channel(capacity: usize) -> (OutcomeReporter, OutcomeStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let reporter = OutcomeReporter {
        tx,
        action: Arc::from(""),
        reported: Arc::new(DashSet::new()),
        metrics: Arc::new(ReporterMetrics::default()),
        sink: Arc::new(NoOpEventSink),
        cancellation: None,
    };
    (reporter, OutcomeStream { rx })
}

/// The sending half of an outcome stream. Cheap to clone.
#[derive(Clone)]
pub struct OutcomeReporter {
    tx: mpsc::Sender<Outcome>,
    action: Arc<str>,
    reported: Arc<DashSet<String>>,
    metrics: Arc<ReporterMetrics>,
    sink: Arc<dyn EventSink>,
    cancellation: Option<Arc<CancellationToken>>,
}

impl OutcomeReporter {
    /// Sets the action name used in logs and events.
    #[must_use]
    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Arc::from(action);
        self
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the cancellation token observed by the executor.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns the counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<ReporterMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns the lifecycle event sink.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    /// Returns true if the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }

    /// Returns the error reported for jobs skipped after cancellation.
    #[must_use]
    pub fn cancellation_error(&self) -> Option<JobError> {
        let token = self.cancellation.as_ref().filter(|t| t.is_cancelled())?;
        let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
        Some(RelayError::Cancelled(reason).to_job_error())
    }

    /// Returns true if an outcome was already forwarded for the job.
    #[must_use]
    pub fn is_reported(&self, job_id: &str) -> bool {
        self.reported.contains(job_id)
    }

    /// Forwards an outcome.
    ///
    /// Job identifiers that already have an outcome are removed first; an
    /// outcome left with no job is dropped.
    pub async fn report(&self, mut outcome: Outcome) {
        let before = outcome.jobs.len();
        outcome.jobs.retain(|id| self.reported.insert(id.clone()));
        let dropped = before - outcome.jobs.len();

        if dropped > 0 {
            warn!(action = %self.action, dropped, "Dropped duplicate outcome for reported jobs");
            self.metrics.record_duplicates(dropped);
            self.sink.try_emit(
                DELIVERY_DUPLICATE,
                Some(serde_json::json!({"action": &*self.action, "dropped": dropped})),
            );
            if outcome.jobs.is_empty() {
                return;
            }
        }

        self.observe(&outcome);
        self.metrics.record(&outcome);

        if self.tx.send(outcome).await.is_err() {
            debug!(action = %self.action, "Outcome stream closed, outcome not delivered");
        }
    }

    fn observe(&self, outcome: &Outcome) {
        let event_type = match &outcome.error {
            None => {
                info!(
                    action = %self.action,
                    jobs = ?outcome.jobs,
                    cascades = outcome.on_succeeded.len(),
                    "Delivered"
                );
                DELIVERY_SUCCEEDED
            }
            Some(error) => {
                warn!(
                    action = %self.action,
                    jobs = ?outcome.jobs,
                    status_code = error.status_code,
                    force_discard = outcome.force_discard,
                    error = %error.message,
                    "Delivery failed"
                );
                if outcome.force_discard {
                    DELIVERY_DISCARDED
                } else {
                    DELIVERY_FAILED
                }
            }
        };

        let mut data = outcome.to_dict();
        data["action"] = serde_json::json!(&*self.action);
        self.sink.try_emit(event_type, Some(data));
    }

    /// Reports a retryable failure for every job of the batch that has no
    /// outcome yet. Returns the number of such jobs.
    pub async fn reconcile(&self, batch: &Batch) -> usize {
        let missing: Vec<String> = batch
            .job_ids()
            .into_iter()
            .filter(|id| !self.is_reported(id))
            .collect();
        if missing.is_empty() {
            return 0;
        }

        warn!(action = %self.action, count = missing.len(), "Jobs left without outcome");
        self.metrics.record_missing(missing.len());
        self.sink.try_emit(
            DELIVERY_MISSING,
            Some(serde_json::json!({"action": &*self.action, "jobs": &missing})),
        );

        let error = self
            .cancellation_error()
            .unwrap_or_else(|| JobError::new(STATUS_INTERNAL, "No outcome reported for job"));
        let count = missing.len();
        for id in missing {
            self.report(Outcome::retry(id, error.clone())).await;
        }
        count
    }
}

impl std::fmt::Debug for OutcomeReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeReporter")
            .field("action", &self.action)
            .field("reported", &self.reported.len())
            .finish_non_exhaustive()
    }
}

/// The receiving half of an outcome stream.
///
/// The stream ends once every reporter clone is dropped, which the delivery
/// runner does after reconciliation.
#[derive(Debug)]
pub struct OutcomeStream {
    rx: mpsc::Receiver<Outcome>,
}

impl OutcomeStream {
    /// Waits for the next outcome.
    pub async fn recv(&mut self) -> Option<Outcome> {
        self.rx.recv().await
    }

    /// Waits for the stream to end and returns every outcome in emission
    /// order.
    pub async fn collect_all(mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}

impl Stream for OutcomeStream {
    type Item = Outcome;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Event, Job};
    use crate::events::CollectingEventSink;
    use futures::StreamExt;

    fn batch() -> Batch {
        Batch::new(vec![Event::new()
            .with_job(Job::new(Vec::new()).with_id("a"))
            .with_job(Job::new(Vec::new()).with_id("b"))])
    }

    #[tokio::test]
    async fn test_duplicates_are_dropped() {
        let sink = Arc::new(CollectingEventSink::new());
        let (reporter, stream) = outcome_channel(8);
        let reporter = reporter.with_action("track").with_sink(sink.clone());

        reporter.report(Outcome::succeeded("a")).await;
        reporter
            .report(Outcome::retry("a", JobError::new(500, "late")))
            .await;
        let metrics = reporter.metrics();
        drop(reporter);

        let outcomes = stream.collect_all().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        assert_eq!(metrics.duplicates(), 1);
        assert_eq!(sink.events_of_type(DELIVERY_DUPLICATE).len(), 1);
    }

    #[tokio::test]
    async fn test_partial_duplicate_keeps_new_jobs() {
        let (reporter, mut stream) = outcome_channel(8);
        reporter.report(Outcome::succeeded("a")).await;
        reporter
            .report(Outcome::succeeded_all(vec!["a".into(), "b".into()]))
            .await;
        drop(reporter);

        assert_eq!(stream.recv().await.unwrap().jobs, vec!["a"]);
        assert_eq!(stream.recv().await.unwrap().jobs, vec!["b"]);
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_reports_missing_as_retryable() {
        let sink = Arc::new(CollectingEventSink::new());
        let (reporter, stream) = outcome_channel(8);
        let reporter = reporter.with_sink(sink.clone());
        reporter.report(Outcome::succeeded("a")).await;

        assert_eq!(reporter.reconcile(&batch()).await, 1);
        assert_eq!(reporter.reconcile(&batch()).await, 0);
        drop(reporter);

        let outcomes: Vec<Outcome> = stream.collect().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].jobs, vec!["b"]);
        assert!(outcomes[1].is_retryable());
        assert_eq!(outcomes[1].status_code(), Some(500));
        assert_eq!(sink.events_of_type(DELIVERY_MISSING).len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_after_cancellation_uses_client_closed() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("shutdown");
        let (reporter, stream) = outcome_channel(8);
        let reporter = reporter.with_cancellation(token);
        assert!(reporter.is_cancelled());

        reporter.reconcile(&batch()).await;
        drop(reporter);

        let outcomes = stream.collect_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status_code() == Some(499)));
        assert!(outcomes.iter().all(Outcome::is_retryable));
    }

    #[tokio::test]
    async fn test_report_after_stream_dropped_does_not_block() {
        let (reporter, stream) = outcome_channel(1);
        drop(stream);
        reporter.report(Outcome::succeeded("a")).await;
        assert!(reporter.is_reported("a"));
    }
}
