//! Cascade expansion.
//!
//! A successful outcome may carry derived actions. The engine turns each of
//! them into a brand-new event holding one freshly marshalled job, so the
//! scheduler can queue it through the same pipeline as any other job.
//! Cascades are one hop deep: events created by a cascade never expand
//! further.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::{Batch, Event, Outcome};
use crate::events::{EventSink, NoOpEventSink, CASCADE_SCHEDULED, CASCADE_SUPPRESSED};

/// Maximum number of cascade hops from a source event.
pub const MAX_CASCADE_DEPTH: u8 = 1;

/// A derived job ready to be queued for an action of the origin's
/// destination.
#[derive(Debug, Clone)]
pub struct ScheduledCascade {
    /// Name of the action the job belongs to.
    pub action: String,
    /// The new event owning the job.
    pub event: Event,
}

/// Expands derived actions of successful outcomes into new events.
#[derive(Clone)]
pub struct CascadeEngine {
    max_depth: u8,
    sink: Arc<dyn EventSink>,
}

impl Default for CascadeEngine {
    fn default() -> Self {
        Self {
            max_depth: MAX_CASCADE_DEPTH,
            sink: Arc::new(NoOpEventSink),
        }
    }
}

impl CascadeEngine {
    /// Creates an engine with the default depth bound.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sink receiving cascade events.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Expands the derived actions of one outcome.
    ///
    /// Each derived action is marshalled into a new job owned by a new event
    /// carrying the originating job's effective context, with the cascade depth
    /// increased by one. Failed outcomes and origins already at the maximum
    /// depth expand to nothing; a derived action that fails to marshal is
    /// skipped.
    #[must_use]
    pub fn expand(&self, origin: &Event, outcome: &Outcome) -> Vec<ScheduledCascade> {
        if outcome.on_succeeded.is_empty() {
            return Vec::new();
        }
        if !outcome.is_success() {
            self.suppress(origin, outcome, "failed outcome");
            return Vec::new();
        }
        if origin.cascade_depth >= self.max_depth {
            self.suppress(origin, outcome, "maximum cascade depth reached");
            return Vec::new();
        }

        let context = outcome
            .jobs
            .first()
            .and_then(|id| origin.jobs.iter().find(|job| &job.id == id))
            .map_or(origin.context.as_slice(), |job| origin.context_for(job));

        let mut scheduled = Vec::with_capacity(outcome.on_succeeded.len());
        for action in &outcome.on_succeeded {
            let job = match action.marshal() {
                Ok(job) => job,
                Err(err) => {
                    warn!(
                        origin_event = %origin.id,
                        action = action.name(),
                        error = %err,
                        "Derived action could not be marshalled"
                    );
                    continue;
                }
            };

            let mut event = Event::new()
                .with_context(context.to_vec())
                .with_job(job);
            event.cascade_depth = origin.cascade_depth + 1;

            debug!(origin_event = %origin.id, event_id = %event.id, action = action.name(), "Cascade scheduled");
            self.sink.try_emit(
                CASCADE_SCHEDULED,
                Some(serde_json::json!({
                    "origin_event": origin.id,
                    "event_id": event.id,
                    "action": action.name(),
                })),
            );
            scheduled.push(ScheduledCascade {
                action: action.name().to_string(),
                event,
            });
        }
        scheduled
    }

    /// Expands every outcome of a run, matching each to its origin event by
    /// job identifier.
    #[must_use]
    pub fn expand_batch(&self, batch: &Batch, outcomes: &[Outcome]) -> Vec<ScheduledCascade> {
        outcomes
            .iter()
            .filter(|outcome| !outcome.on_succeeded.is_empty())
            .filter_map(|outcome| {
                let origin = outcome
                    .jobs
                    .first()
                    .and_then(|id| batch.event_for_job(id))?;
                Some(self.expand(origin, outcome))
            })
            .flatten()
            .collect()
    }

    fn suppress(&self, origin: &Event, outcome: &Outcome, reason: &str) {
        debug!(origin_event = %origin.id, reason, "Cascade suppressed");
        self.sink.try_emit(
            CASCADE_SUPPRESSED,
            Some(serde_json::json!({
                "origin_event": origin.id,
                "reason": reason,
                "actions": outcome.on_succeeded.len(),
            })),
        );
    }
}

impl std::fmt::Debug for CascadeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeEngine")
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::core::Job;
    use crate::destinations::topic::Publish;
    use crate::errors::JobError;
    use crate::events::CollectingEventSink;

    fn derived() -> Arc<dyn Action> {
        Arc::new(Publish::new(b"derived".to_vec()))
    }

    fn origin() -> Event {
        Event::new()
            .with_context(br#"{"ip":"10.0.0.1"}"#.to_vec())
            .with_job(Job::new(Vec::new()).with_id("origin-job"))
    }

    #[test]
    fn test_expand_creates_fresh_events() {
        let origin = origin();
        let outcome = Outcome::succeeded("origin-job").with_cascade(vec![derived(), derived()]);

        let scheduled = CascadeEngine::new().expand(&origin, &outcome);

        assert_eq!(scheduled.len(), 2);
        for cascade in &scheduled {
            assert_eq!(cascade.action, "publish");
            assert_ne!(cascade.event.id, origin.id);
            assert_eq!(cascade.event.cascade_depth, 1);
            assert_eq!(cascade.event.context, origin.context);
            assert_eq!(cascade.event.jobs.len(), 1);
            assert_ne!(cascade.event.jobs[0].id, "origin-job");
        }
        assert_ne!(scheduled[0].event.jobs[0].id, scheduled[1].event.jobs[0].id);
    }

    #[test]
    fn test_expand_uses_job_context() {
        let own_job = Job::new(Vec::new())
            .with_id("own-job")
            .with_context(br#"{"ip":"10.0.0.2"}"#.to_vec());
        let origin = origin().with_job(own_job);
        let engine = CascadeEngine::new();

        let outcome = Outcome::succeeded("own-job").with_cascade(vec![derived()]);
        let own = engine.expand(&origin, &outcome);
        assert_eq!(own[0].event.context, br#"{"ip":"10.0.0.2"}"#.to_vec());

        let outcome = Outcome::succeeded("origin-job").with_cascade(vec![derived()]);
        let inherited = engine.expand(&origin, &outcome);
        assert_eq!(inherited[0].event.context, origin.context);
    }

    #[test]
    fn test_no_expansion_from_failures() {
        let mut outcome = Outcome::retry("origin-job", JobError::new(500, "boom"));
        outcome.on_succeeded.push(derived());
        let sink = Arc::new(CollectingEventSink::new());

        let scheduled = CascadeEngine::new()
            .with_sink(sink.clone())
            .expand(&origin(), &outcome);

        assert!(scheduled.is_empty());
        assert_eq!(sink.events_of_type(CASCADE_SUPPRESSED).len(), 1);
    }

    #[test]
    fn test_depth_is_bounded() {
        let engine = CascadeEngine::new();
        let outcome = Outcome::succeeded("origin-job").with_cascade(vec![derived()]);

        let first = engine.expand(&origin(), &outcome);
        assert_eq!(first.len(), 1);

        let second = engine.expand(&first[0].event, &outcome);
        assert!(second.is_empty());
    }

    #[test]
    fn test_expand_batch_matches_origins() {
        let batch = Batch::new(vec![origin()]);
        let outcomes = vec![
            Outcome::succeeded("origin-job").with_cascade(vec![derived()]),
            Outcome::succeeded("unknown-job").with_cascade(vec![derived()]),
        ];

        let scheduled = CascadeEngine::new().expand_batch(&batch, &outcomes);
        assert_eq!(scheduled.len(), 1);
    }
}
