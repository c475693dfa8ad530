//! Lifecycle events emitted while delivering jobs.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A job was delivered.
pub const DELIVERY_SUCCEEDED: &str = "delivery.succeeded";
/// A job failed and may be retried.
pub const DELIVERY_FAILED: &str = "delivery.failed";
/// A job failed terminally.
pub const DELIVERY_DISCARDED: &str = "delivery.discarded";
/// A second outcome for an already reported job was dropped.
pub const DELIVERY_DUPLICATE: &str = "delivery.duplicate";
/// A job received no outcome from its action and was reported as retryable.
pub const DELIVERY_MISSING: &str = "delivery.missing";
/// A derived action was turned into a new job.
pub const CASCADE_SCHEDULED: &str = "cascade.scheduled";
/// A derived action was not expanded.
pub const CASCADE_SUPPRESSED: &str = "cascade.suppressed";
