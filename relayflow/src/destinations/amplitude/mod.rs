//! Amplitude destination.
//!
//! Event actions post to the HTTP API v2. Group memberships and user
//! mappings go through their own form endpoints. The API key stays in the
//! destination options and is only added to the request at load time.

mod actions;
mod objects;

pub use actions::{Alias, Group, Identify, Page, Screen, Track};
pub use objects::{Event, Identification, UserMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::{default_true, driver, HttpBinding};
use crate::action::{Action, Destination};
use crate::core::{DestinationOptions, Schedule, Secret};
use crate::errors::ValidationError;
use crate::policy::{self, DeliveryPolicy};
use crate::transport::HttpTransport;

/// Payload version of every Amplitude job.
pub const VERSION: &str = "v2.0";

pub(crate) const EVENTS_URL: &str = "https://api2.amplitude.com/2/httpapi";
pub(crate) const GROUP_URL: &str = "https://api.amplitude.com/groupidentify";
pub(crate) const ALIAS_URL: &str = "https://api.amplitude.com/usermap";

/// Options of the Amplitude destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeOptions {
    /// Project API key.
    #[serde(default)]
    pub api_key: Secret,
    /// Schedule shared by every action.
    #[serde(flatten)]
    pub schedule: Schedule,
    /// Whether a failed transport call discards the job.
    #[serde(default = "default_true")]
    pub discard_on_transport_error: bool,
}

impl Default for AmplitudeOptions {
    fn default() -> Self {
        Self {
            api_key: Secret::default(),
            schedule: Schedule::default(),
            discard_on_transport_error: true,
        }
    }
}

impl AmplitudeOptions {
    /// Creates options with an API key.
    #[must_use]
    pub fn new(api_key: impl Into<Secret>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Sets whether transport failures discard jobs.
    #[must_use]
    pub fn with_discard_on_transport_error(mut self, discard: bool) -> Self {
        self.discard_on_transport_error = discard;
        self
    }

    /// Fills schedule defaults and checks the API key.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        self.schedule.fill_defaults();
        let mut fail = ValidationError::new("destination/amplitude: Failed to load");
        if self.api_key.is_empty() {
            fail.push("Amplitude API key must be set", &driver::path("amplitude", Some("APIKey")));
        }
        fail.into_result()
    }
}

/// The Amplitude destination.
pub struct Amplitude {
    binding: HttpBinding,
}

impl Amplitude {
    /// Validates the options and binds the HTTP transport.
    pub fn new(mut options: AmplitudeOptions, transport: Arc<dyn HttpTransport>) -> Result<Self, ValidationError> {
        options.validate()?;
        Ok(Self {
            binding: HttpBinding {
                transport,
                credential: options.api_key,
                policy: DeliveryPolicy::new(policy::amplitude(), options.discard_on_transport_error),
                options: Arc::new(DestinationOptions::versioned(options.schedule, VERSION)),
            },
        })
    }
}

#[async_trait]
impl Destination for Amplitude {
    fn name(&self) -> String {
        "amplitude".to_string()
    }

    fn options(&self) -> &DestinationOptions {
        &self.binding.options
    }

    fn actions(&self) -> HashMap<String, Arc<dyn Action>> {
        let binding = &self.binding;
        let actions: Vec<Arc<dyn Action>> = vec![
            Arc::new(Identify::bound(binding.clone())),
            Arc::new(Track::bound(binding.clone())),
            Arc::new(Group::bound(binding.clone())),
            Arc::new(Alias::bound(binding.clone())),
            Arc::new(Page::bound(binding.clone())),
            Arc::new(Screen::bound(binding.clone())),
        ];
        actions
            .into_iter()
            .map(|action| (action.name().to_string(), action))
            .collect()
    }
}
