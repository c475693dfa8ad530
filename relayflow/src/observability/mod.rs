//! Logging setup and delivery span helpers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::Span;
use tracing_subscriber::EnvFilter;

use crate::core::Batch;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs a human-readable subscriber filtered by `RUST_LOG`.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .try_init();
}

/// Installs a JSON subscriber filtered by `RUST_LOG`.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init_json_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Attributes describing one delivery run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliverySpanAttributes {
    /// Destination name.
    pub destination: Option<String>,
    /// Action name.
    pub action: String,
    /// Number of events in the batch.
    pub events: usize,
    /// Number of jobs in the batch.
    pub jobs: usize,
}

impl DeliverySpanAttributes {
    /// Describes a run of the action over the batch.
    #[must_use]
    pub fn new(action: impl Into<String>, batch: &Batch) -> Self {
        Self {
            destination: None,
            action: action.into(),
            events: batch.events.len(),
            jobs: batch.job_count(),
        }
    }

    /// Sets the destination name.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Converts to OpenTelemetry-style attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        if let Some(ref destination) = self.destination {
            attrs.insert("delivery.destination".to_string(), destination.clone());
        }
        attrs.insert("delivery.action".to_string(), self.action.clone());
        attrs.insert("delivery.events".to_string(), self.events.to_string());
        attrs.insert("delivery.jobs".to_string(), self.jobs.to_string());
        attrs
    }

    /// Opens the span a delivery run executes in.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "deliver",
            destination = self.destination.as_deref().unwrap_or(""),
            action = %self.action,
            events = self.events,
            jobs = self.jobs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Event, Job};

    #[test]
    fn test_attributes() {
        let batch = Batch::new(vec![
            Event::new().with_job(Job::new(Vec::new())),
            Event::new().with_job(Job::new(Vec::new())).with_job(Job::new(Vec::new())),
        ]);
        let attrs = DeliverySpanAttributes::new("track", &batch).with_destination("amplitude");
        let otel = attrs.to_otel_attributes();

        assert_eq!(otel["delivery.destination"], "amplitude");
        assert_eq!(otel["delivery.jobs"], "3");
        assert_eq!(otel["delivery.events"], "2");
        let _span = attrs.span();
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_json_tracing();
    }
}
