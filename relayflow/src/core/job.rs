//! Jobs, the events that own them, and the batches handed to `Load`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::generate_id;

/// A durable unit of delivery work.
///
/// Jobs are created by the payload codec at transform time and are read-only
/// while being delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier.
    pub id: String,
    /// Serialized action payload.
    #[serde(with = "crate::codec::base64_bytes")]
    pub data: Vec<u8>,
    /// Serialized request context. Empty means the owning event's context
    /// applies.
    #[serde(default, with = "crate::codec::base64_bytes")]
    pub context: Vec<u8>,
    /// Schema version of the payload, for versioned destinations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// When the job was created. Defaults to the time it was read.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job with a fresh identifier around the given payload.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            id: generate_id(),
            data,
            context: Vec::new(),
            version: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the request context bytes.
    #[must_use]
    pub fn with_context(mut self, context: Vec<u8>) -> Self {
        self.context = context;
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// A source occurrence owning an ordered sequence of jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier.
    pub id: String,
    /// When the event was received upstream.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    /// Serialized request context (device, location, network, app).
    #[serde(default, with = "crate::codec::base64_bytes")]
    pub context: Vec<u8>,
    /// Jobs scoped to the action being loaded.
    #[serde(default)]
    pub jobs: Vec<Job>,
    /// Number of cascade hops between this event and a source event.
    #[serde(default)]
    pub cascade_depth: u8,
}

impl Event {
    /// Creates an empty event with a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: generate_id(),
            received_at: Utc::now(),
            context: Vec::new(),
            jobs: Vec::new(),
            cascade_depth: 0,
        }
    }

    /// Sets the received timestamp.
    #[must_use]
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Sets the request context bytes.
    #[must_use]
    pub fn with_context(mut self, context: Vec<u8>) -> Self {
        self.context = context;
        self
    }

    /// Appends a job.
    #[must_use]
    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    /// Returns the context that applies to a job: its own when set, the
    /// event's otherwise.
    #[must_use]
    pub fn context_for<'a>(&'a self, job: &'a Job) -> &'a [u8] {
        if job.context.is_empty() {
            &self.context
        } else {
            &job.context
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

/// A batch of events dequeued by the scheduler for one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Events in dequeue order.
    pub events: Vec<Event>,
}

impl Batch {
    /// Creates a batch from events.
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Returns the total number of jobs across every event.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.events.iter().map(|e| e.jobs.len()).sum()
    }

    /// Returns true if the batch carries no job.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.job_count() == 0
    }

    /// Iterates over every job together with its owning event, in order.
    pub fn jobs(&self) -> impl Iterator<Item = (&Event, &Job)> {
        self.events
            .iter()
            .flat_map(|event| event.jobs.iter().map(move |job| (event, job)))
    }

    /// Returns every job identifier, in order.
    #[must_use]
    pub fn job_ids(&self) -> Vec<String> {
        self.jobs().map(|(_, job)| job.id.clone()).collect()
    }

    /// Finds the event owning a job.
    #[must_use]
    pub fn event_for_job(&self, job_id: &str) -> Option<&Event> {
        self.events
            .iter()
            .find(|event| event.jobs.iter().any(|job| job.id == job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Batch {
        Batch::new(vec![
            Event::new()
                .with_job(Job::new(b"{}".to_vec()).with_id("a"))
                .with_job(Job::new(b"{}".to_vec()).with_id("b")),
            Event::new(),
            Event::new().with_job(Job::new(b"{}".to_vec()).with_id("c")),
        ])
    }

    #[test]
    fn test_job_count_and_ids() {
        let batch = batch();
        assert_eq!(batch.job_count(), 3);
        assert_eq!(batch.job_ids(), vec!["a", "b", "c"]);
        assert!(!batch.is_empty());
        assert!(Batch::default().is_empty());
    }

    #[test]
    fn test_event_for_job() {
        let batch = batch();
        let owner = batch.event_for_job("c").unwrap();
        assert_eq!(owner.jobs[0].id, "c");
        assert!(batch.event_for_job("missing").is_none());
    }

    #[test]
    fn test_context_falls_back_to_event() {
        let event = Event::new().with_context(b"{\"ip\":\"1.2.3.4\"}".to_vec());
        let plain = Job::new(Vec::new());
        let own = Job::new(Vec::new()).with_context(b"{}".to_vec());

        assert_eq!(event.context_for(&plain), b"{\"ip\":\"1.2.3.4\"}");
        assert_eq!(event.context_for(&own), b"{}");
    }

    #[test]
    fn test_fresh_ids_differ() {
        assert_ne!(Job::new(Vec::new()).id, Job::new(Vec::new()).id);
        assert_ne!(Event::new().id, Event::new().id);
    }

    #[test]
    fn test_job_serializes_bytes_as_base64() {
        let job = Job::new(b"hello".to_vec()).with_id("j1").with_version("v2.0");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["data"], "aGVsbG8=");
        assert_eq!(json["version"], "v2.0");

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_missing_timestamps_default_to_now() {
        let before = Utc::now();
        let job: Job = serde_json::from_value(serde_json::json!({"id": "j1", "data": "e30="})).unwrap();
        assert_eq!(job.data, b"{}");
        assert!(job.created_at >= before);

        let event: Event = serde_json::from_value(serde_json::json!({
            "id": "e1",
            "jobs": [{"id": "j2", "data": ""}],
        }))
        .unwrap();
        assert!(event.received_at >= before);
        assert_eq!(event.jobs[0].id, "j2");
    }
}
