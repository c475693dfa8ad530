//! Registry resolving actions by destination and action name.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::{Action, Destination};
use crate::core::Schedule;
use crate::errors::RelayError;

/// Registered destinations, looked up by name.
#[derive(Default)]
pub struct ActionRegistry {
    destinations: RwLock<HashMap<String, Arc<dyn Destination>>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a destination, replacing one with the same name.
    pub fn register(&self, destination: Arc<dyn Destination>) {
        let name = destination.name();
        if self
            .destinations
            .write()
            .insert(name.clone(), destination)
            .is_some()
        {
            warn!(destination = %name, "Replaced registered destination");
        }
    }

    /// Returns a destination by name.
    #[must_use]
    pub fn destination(&self, name: &str) -> Option<Arc<dyn Destination>> {
        self.destinations.read().get(name).cloned()
    }

    /// Returns the action registered under the destination.
    #[must_use]
    pub fn resolve(&self, destination: &str, action: &str) -> Option<Arc<dyn Action>> {
        self.destination(destination)?.actions().remove(action)
    }

    /// Returns the schedule of an action: its own override, or its
    /// destination's default.
    #[must_use]
    pub fn schedule_for(&self, destination: &str, action: &str) -> Option<Schedule> {
        let dest = self.destination(destination)?;
        let resolved = dest.actions().remove(action)?;
        Some(
            resolved
                .schedule()
                .unwrap_or_else(|| dest.options().default_schedule.clone()),
        )
    }

    /// Lists registered destination names, sorted.
    #[must_use]
    pub fn list_destinations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.destinations.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs every destination's init hook. Stops at the first failure.
    pub async fn init_all(&self) -> Result<(), RelayError> {
        let destinations: Vec<_> = self.destinations.read().values().cloned().collect();
        for destination in destinations {
            destination.init().await?;
            info!(destination = %destination.name(), "Destination initialized");
        }
        Ok(())
    }

    /// Runs every destination's shutdown hook, logging failures.
    pub async fn shutdown_all(&self) {
        let destinations: Vec<_> = self.destinations.read().values().cloned().collect();
        for destination in destinations {
            if let Err(err) = destination.shutdown().await {
                warn!(destination = %destination.name(), error = %err, "Destination shutdown failed");
            }
        }
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("destinations", &self.list_destinations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destinations::driver::env_of;
    use crate::destinations::topic::{Driver, Topic, TopicOptions};
    use crate::testing::MemoryTopic;

    fn topic() -> Arc<dyn Destination> {
        let options = TopicOptions::new("events", Driver::Kafka, "orders").with_interval("@every 5m");
        let env = env_of(&[("KAFKA_BROKERS", "localhost:9092")]);
        Arc::new(
            Topic::with_env(options, &env)
                .unwrap()
                .with_publisher(Arc::new(MemoryTopic::new())),
        )
    }

    #[test]
    fn test_resolve_and_schedule() {
        let registry = ActionRegistry::new();
        registry.register(topic());

        assert_eq!(registry.list_destinations(), vec!["topic(events)"]);
        let action = registry.resolve("topic(events)", "publish").unwrap();
        assert_eq!(action.name(), "publish");
        assert!(registry.resolve("topic(events)", "write").is_none());
        assert!(registry.resolve("blob(x)", "write").is_none());

        let schedule = registry.schedule_for("topic(events)", "publish").unwrap();
        assert_eq!(schedule.interval, "@every 5m");
        assert_eq!(schedule.max_retries, 72);
    }

    #[tokio::test]
    async fn test_lifecycle_hooks() {
        let registry = ActionRegistry::new();
        registry.register(topic());
        registry.init_all().await.unwrap();
        registry.shutdown_all().await;
    }
}
