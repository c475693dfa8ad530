//! The destination trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::Action;
use crate::core::DestinationOptions;
use crate::errors::RelayError;

/// A named external system and the actions it supports.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Returns the destination name, e.g. `amplitude` or `blob(archive)`.
    fn name(&self) -> String;

    /// Returns the options shared by every action.
    fn options(&self) -> &DestinationOptions;

    /// Returns the actions, by name, bound to the destination's connection.
    fn actions(&self) -> HashMap<String, Arc<dyn Action>>;

    /// Prepares the connection when the scheduler starts.
    async fn init(&self) -> Result<(), RelayError> {
        Ok(())
    }

    /// Releases the connection when the scheduler stops.
    async fn shutdown(&self) -> Result<(), RelayError> {
        Ok(())
    }
}
