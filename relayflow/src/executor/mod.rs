//! Delivery executor.
//!
//! [`deliver`] runs an action's `load` over a batch on the runtime and hands
//! back the outcome stream. Per-job actions implement [`JobDelivery`] and
//! delegate their `load` to [`load_each`], which attempts jobs one at a time,
//! in batch order, and never lets one job's failure stop the others.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info_span, Instrument};

use crate::action::Action;
use crate::cancellation::CancellationToken;
use crate::core::{Batch, Event, Job, Outcome};
use crate::errors::JobError;
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::DeliverySpanAttributes;
use crate::policy::{DeliveryPolicy, StatusPolicy};
use crate::reporter::{outcome_channel, OutcomeReporter, OutcomeStream};
use crate::transport::{HttpRequest, HttpTransport};

/// Default number of outcomes buffered between `load` and its consumer.
pub const DEFAULT_CAPACITY: usize = 64;

/// Delivers a single job with exactly one external write attempt.
#[async_trait]
pub trait JobDelivery: Send + Sync {
    /// Decodes the job, performs the external write and classifies the
    /// result.
    async fn deliver_job(&self, event: &Event, job: &Job) -> Outcome;
}

/// Delivers every job of the batch sequentially, reporting one outcome each.
///
/// Jobs reached after cancellation are reported as retryable failures
/// without being attempted.
pub async fn load_each<D>(delivery: &D, batch: &Batch, reporter: &OutcomeReporter)
where
    D: JobDelivery + ?Sized,
{
    for (event, job) in batch.jobs() {
        if let Some(error) = reporter.cancellation_error() {
            reporter.report(Outcome::retry(job.id.clone(), error)).await;
            continue;
        }

        let span = info_span!("job", job_id = %job.id, event_id = %event.id);
        let outcome = delivery.deliver_job(event, job).instrument(span).await;
        reporter.report(outcome).await;
    }
}

/// Sends one HTTP request and classifies its result for the job.
///
/// A transport failure goes through the policy's transport flag. A response
/// with a failure status carries that status and the response body, and is
/// terminal according to the status table.
pub async fn send_classified(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    policy: &DeliveryPolicy,
    job_id: &str,
) -> Outcome {
    match transport.send(request).await {
        Err(err) => {
            let (error, discard) = policy.classify_transport(&err);
            Outcome::failed(vec![job_id.to_string()], error, discard)
        }
        Ok(response) if StatusPolicy::is_failure(response.status) => Outcome::failed(
            vec![job_id.to_string()],
            JobError::new(response.status, response.body),
            policy.classify_status(response.status),
        ),
        Ok(_) => Outcome::succeeded(job_id),
    }
}

/// Options of a delivery run.
#[derive(Clone)]
pub struct DeliveryOptions {
    /// Outcomes buffered before `load` waits for the consumer.
    pub capacity: usize,
    /// Receives lifecycle events.
    pub sink: Arc<dyn EventSink>,
    /// Stops attempting jobs once cancelled.
    pub cancellation: Option<Arc<CancellationToken>>,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            sink: Arc::new(NoOpEventSink),
            cancellation: None,
        }
    }
}

impl DeliveryOptions {
    /// Sets the buffer capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Runs `load` for the batch and returns the stream of its outcomes.
///
/// Must be called from within a Tokio runtime. Every job of the batch yields
/// exactly one outcome on the stream, even when `load` skips a job or
/// panics; the stream ends once the run is settled.
#[must_use]
pub fn deliver(action: Arc<dyn Action>, batch: Arc<Batch>, options: DeliveryOptions) -> OutcomeStream {
    let (reporter, stream) = outcome_channel(options.capacity);
    let mut reporter = reporter.with_action(action.name()).with_sink(options.sink);
    if let Some(token) = options.cancellation {
        reporter = reporter.with_cancellation(token);
    }

    let span = DeliverySpanAttributes::new(action.name(), &batch).span();
    tokio::spawn(
        async move {
            let load = {
                let batch = Arc::clone(&batch);
                let reporter = reporter.clone();
                tokio::spawn(async move { action.load(&batch, &reporter).await }.in_current_span())
            };
            if let Err(err) = load.await {
                error!(error = %err, "Load task failed");
            }
            reporter.reconcile(&batch).await;
        }
        .instrument(span),
    );

    stream
}

/// Runs `load` for the batch and waits for every outcome.
pub async fn deliver_all(action: Arc<dyn Action>, batch: Arc<Batch>, options: DeliveryOptions) -> Vec<Outcome> {
    deliver(action, batch, options).collect_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Schedule;
    use crate::errors::{RelayError, TransportError};
    use crate::events::{CollectingEventSink, DELIVERY_MISSING};
    use crate::policy;
    use crate::transport::{HttpResponse, MockHttpTransport};
    use parking_lot::Mutex;

    /// Fails jobs whose payload is "fail", panics on "panic", skips "skip".
    struct Scripted {
        attempted: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                attempted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobDelivery for Scripted {
        async fn deliver_job(&self, _event: &Event, job: &Job) -> Outcome {
            self.attempted.lock().push(job.id.clone());
            match job.data.as_slice() {
                b"fail" => Outcome::discard(job.id.clone(), JobError::new(422, "invalid")),
                _ => Outcome::succeeded(job.id.clone()),
            }
        }
    }

    #[async_trait]
    impl Action for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn schedule(&self) -> Option<Schedule> {
            None
        }

        fn marshal(&self) -> Result<Job, RelayError> {
            Ok(Job::new(Vec::new()))
        }

        async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
            for (event, job) in batch.jobs() {
                match job.data.as_slice() {
                    b"skip" => {}
                    b"panic" => panic!("driver crashed"),
                    _ => reporter.report(self.deliver_job(event, job).await).await,
                }
            }
        }
    }

    fn job(id: &str, data: &[u8]) -> Job {
        Job::new(data.to_vec()).with_id(id)
    }

    #[tokio::test]
    async fn test_one_outcome_per_job_across_events() {
        let batch = Arc::new(Batch::new(vec![
            Event::new().with_job(job("a", b"ok")).with_job(job("b", b"fail")),
            Event::new(),
            Event::new()
                .with_job(job("c", b"ok"))
                .with_job(job("d", b"ok"))
                .with_job(job("e", b"fail")),
        ]));

        let outcomes = deliver_all(Arc::new(Scripted::new()), batch.clone(), DeliveryOptions::default()).await;

        assert_eq!(outcomes.len(), batch.job_count());
        let ids: Vec<_> = outcomes.iter().flat_map(|o| o.jobs.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(outcomes.iter().filter(|o| o.is_terminal()).count(), 2);
    }

    #[tokio::test]
    async fn test_skipped_jobs_are_reconciled() {
        let sink = Arc::new(CollectingEventSink::new());
        let batch = Arc::new(Batch::new(vec![Event::new()
            .with_job(job("a", b"ok"))
            .with_job(job("b", b"skip"))]));

        let outcomes = deliver_all(
            Arc::new(Scripted::new()),
            batch,
            DeliveryOptions::default().with_sink(sink.clone()),
        )
        .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].jobs, vec!["b"]);
        assert!(outcomes[1].is_retryable());
        assert_eq!(sink.events_of_type(DELIVERY_MISSING).len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_load_still_settles_every_job() {
        let batch = Arc::new(Batch::new(vec![Event::new()
            .with_job(job("a", b"ok"))
            .with_job(job("b", b"panic"))
            .with_job(job("c", b"ok"))]));

        let outcomes = deliver_all(Arc::new(Scripted::new()), batch, DeliveryOptions::default()).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(outcomes[1..].iter().all(Outcome::is_retryable));
    }

    #[tokio::test]
    async fn test_load_each_stops_attempting_after_cancellation() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("shutdown");
        let (reporter, stream) = outcome_channel(8);
        let reporter = reporter.with_cancellation(token);
        let delivery = Scripted::new();
        let batch = Batch::new(vec![Event::new().with_job(job("a", b"ok")).with_job(job("b", b"ok"))]);

        load_each(&delivery, &batch, &reporter).await;
        drop(reporter);

        let outcomes = stream.collect_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.is_retryable() && o.status_code() == Some(499)));
        assert!(delivery.attempted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_send_classified() {
        let policy = DeliveryPolicy::new(policy::amplitude(), true);
        let request = HttpRequest::post_form("https://example.com", Vec::new());

        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(422, "{\"error\":\"invalid\"}")));
        let outcome = send_classified(&mock, request.clone(), &policy, "j").await;
        assert!(outcome.force_discard);
        assert_eq!(outcome.status_code(), Some(422));
        assert_eq!(outcome.error.unwrap().message, "{\"error\":\"invalid\"}");

        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .returning(|_| Ok(HttpResponse::new(503, "unavailable")));
        let outcome = send_classified(&mock, request.clone(), &policy, "j").await;
        assert!(outcome.is_retryable());

        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .returning(|_| Err(TransportError::connect("refused")));
        let outcome = send_classified(&mock, request.clone(), &policy, "j").await;
        assert!(outcome.is_terminal());
        assert_eq!(outcome.status_code(), Some(500));

        let mut mock = MockHttpTransport::new();
        mock.expect_send().returning(|_| Ok(HttpResponse::new(204, "")));
        let outcome = send_classified(&mock, request, &policy, "j").await;
        assert!(outcome.is_success());
    }
}
