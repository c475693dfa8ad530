//! # Relayflow
//!
//! A delivery engine that pushes jobs produced by a data pipeline to
//! external systems and reports a structured outcome for every job.
//!
//! Relayflow provides:
//!
//! - **Actions and destinations**: typed payloads marshalled into jobs and
//!   loaded in batches against an external system
//! - **Status classification**: per-destination tables deciding whether a
//!   failed delivery is retried or discarded
//! - **Outcome reporting**: exactly one outcome per job, even when a load
//!   skips jobs, panics or is cancelled
//! - **Cascades**: follow-up actions scheduled from successful deliveries
//! - **Built-in destinations**: Amplitude, Mailchimp, Segment, object
//!   stores, document stores, message brokers and SQL databases
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relayflow::prelude::*;
//! use relayflow::destinations::segment::{Segment, SegmentOptions};
//!
//! let segment = Segment::new(SegmentOptions::new("write-key"), Arc::new(ReqwestTransport::new()))?;
//! let action = segment.actions().remove("track").unwrap();
//!
//! let outcomes = deliver_all(action, Arc::new(batch), DeliveryOptions::default()).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod action;
pub mod cancellation;
pub mod cascade;
pub mod codec;
pub mod core;
pub mod destinations;
pub mod errors;
pub mod events;
pub mod executor;
pub mod flows;
pub mod observability;
pub mod policy;
pub mod reporter;
pub mod retry;
pub mod testing;
pub mod transport;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionRegistry, Destination};
    pub use crate::cancellation::CancellationToken;
    pub use crate::cascade::{CascadeEngine, ScheduledCascade};
    pub use crate::codec::Payload;
    pub use crate::core::{Batch, DestinationOptions, Event, Job, Outcome, Schedule, Secret};
    pub use crate::errors::{JobError, RelayError, SqlError, TransportError, ValidationError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{deliver, deliver_all, DeliveryOptions, JobDelivery};
    pub use crate::flows::{Actions, Flow};
    pub use crate::reporter::{OutcomeReporter, OutcomeStream};
    pub use crate::retry::{Disposition, RetryPolicy};
    #[cfg(feature = "http")]
    pub use crate::transport::ReqwestTransport;
    pub use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
    pub use crate::utils::{generate_id, generate_insert_id};
}
