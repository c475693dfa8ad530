//! Actions and destinations.
//!
//! An [`Action`] is one schedulable operation of a destination: it turns a
//! business object into a job (`marshal`) and later pushes a batch of those
//! jobs to the external system (`load`). A [`Destination`] groups the
//! actions sharing one external system and one connection.

mod destination;
mod registry;

pub use destination::Destination;
pub use registry::ActionRegistry;

use async_trait::async_trait;

use crate::core::{Batch, Job, Schedule};
use crate::errors::RelayError;
use crate::reporter::OutcomeReporter;

/// One schedulable operation of a destination.
#[async_trait]
pub trait Action: Send + Sync {
    /// Returns the action name, unique within its destination.
    fn name(&self) -> &str;

    /// Overrides the destination's default schedule.
    fn schedule(&self) -> Option<Schedule> {
        None
    }

    /// Serializes the action into a new job. Secrets are never persisted.
    fn marshal(&self) -> Result<Job, RelayError>;

    /// Delivers every job of the batch, reporting exactly one outcome per
    /// job (or one for the whole batch, for transactional actions).
    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter);
}
