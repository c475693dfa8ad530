//! Amplitude actions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::objects::{Event, Identification, UserMap};
use super::{ALIAS_URL, EVENTS_URL, GROUP_URL, VERSION};
use crate::action::Action;
use crate::codec::{self, Payload};
use crate::core::{Batch, Context, Event as SourceEvent, Job, Outcome};
use crate::destinations::{unbound, HttpBinding};
use crate::errors::RelayError;
use crate::executor::{load_each, JobDelivery};
use crate::reporter::OutcomeReporter;
use crate::transport::HttpRequest;
use crate::utils::generate_insert_id;

/// The part of every event action's payload read at load time.
#[derive(Deserialize)]
struct EventsPayload {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Serialize)]
struct EventsBody<'a> {
    api_key: &'a str,
    events: &'a [Event],
}

/// Posts the job's events to the HTTP API, with the job's context applied
/// as event properties.
async fn send_events(binding: Option<&HttpBinding>, event: &SourceEvent, job: &Job) -> Outcome {
    let Some(binding) = binding else {
        return unbound(job, "amplitude");
    };
    let (payload, context): (EventsPayload, Context) = match binding.decode(event, job) {
        Ok(decoded) => decoded,
        Err(err) => return Outcome::from_error(job.id.clone(), &err),
    };

    let mut events = payload.events;
    for item in &mut events {
        item.context = Some(context.clone());
    }

    let body = EventsBody {
        api_key: binding.credential.expose(),
        events: &events,
    };
    match HttpRequest::post_json(EVENTS_URL, &body) {
        Ok(request) => {
            let request = request
                .with_header("Accept", "*/*")
                .with_header("Content-Type", "application/json");
            binding.send(request, job).await
        }
        Err(err) => Outcome::from_error(job.id.clone(), &RelayError::from(err)),
    }
}

/// Gives every event one shared insertion id and the view name.
fn stamp_views(events: &mut [Event], insert_id: &str, kind: &str) {
    for item in events {
        item.insert_id = insert_id.to_string();
        item.event = format!("Viewed {kind} '{}'", item.event);
    }
}

macro_rules! event_action {
    ($(#[$meta:meta])* $name:ident, $action:literal, $view:expr) => {
        $(#[$meta])*
        #[derive(Clone, Default, Serialize, Deserialize)]
        pub struct $name {
            /// Events to send.
            pub events: Vec<Event>,
            #[serde(skip)]
            insert_id: Option<String>,
            #[serde(skip)]
            pub(crate) binding: Option<HttpBinding>,
        }

        impl $name {
            /// Creates the action around its events.
            #[must_use]
            pub fn new(events: Vec<Event>) -> Self {
                Self {
                    events,
                    ..Self::default()
                }
            }

            /// Sets the insertion id stamped on view events, so marshalling
            /// the same source message twice yields the same token.
            #[must_use]
            pub fn with_insert_id(mut self, insert_id: impl Into<String>) -> Self {
                self.insert_id = Some(insert_id.into());
                self
            }

            pub(crate) fn bound(binding: HttpBinding) -> Self {
                Self {
                    binding: Some(binding),
                    ..Self::default()
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("events", &self.events)
                    .field("insert_id", &self.insert_id)
                    .finish_non_exhaustive()
            }
        }

        impl Payload for $name {}

        #[async_trait]
        impl Action for $name {
            fn name(&self) -> &str {
                $action
            }

            fn marshal(&self) -> Result<Job, RelayError> {
                let view: Option<&str> = $view;
                match view {
                    Some(kind) => {
                        let mut prepared = self.clone();
                        let insert_id = self.insert_id.clone().unwrap_or_else(generate_insert_id);
                        stamp_views(&mut prepared.events, &insert_id, kind);
                        codec::marshal(&prepared, Some(VERSION))
                    }
                    None => codec::marshal(self, Some(VERSION)),
                }
            }

            async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
                load_each(self, batch, reporter).await;
            }
        }

        #[async_trait]
        impl JobDelivery for $name {
            async fn deliver_job(&self, event: &SourceEvent, job: &Job) -> Outcome {
                send_events(self.binding.as_ref(), event, job).await
            }
        }
    };
}

event_action!(
    /// Sets user properties.
    Identify,
    "identify",
    None
);

event_action!(
    /// Records an event, optionally with revenue.
    Track,
    "track",
    None
);

event_action!(
    /// Records page views, named `Viewed page '<name>'`.
    Page,
    "page",
    Some("page")
);

event_action!(
    /// Records screen views, named `Viewed screen '<name>'`.
    Screen,
    "screen",
    Some("screen")
);

/// Adds users to a group. On success, a `Group` track event is cascaded so
/// the membership shows up in the user's history.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Group {
    /// Group memberships.
    pub identification: Vec<Identification>,
    #[serde(skip)]
    pub(crate) binding: Option<HttpBinding>,
}

impl Group {
    /// Creates the action around its memberships.
    #[must_use]
    pub fn new(identification: Vec<Identification>) -> Self {
        Self {
            identification,
            binding: None,
        }
    }

    pub(crate) fn bound(binding: HttpBinding) -> Self {
        Self {
            identification: Vec::new(),
            binding: Some(binding),
        }
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("identification", &self.identification)
            .finish_non_exhaustive()
    }
}

impl Payload for Group {}

#[async_trait]
impl Action for Group {
    fn name(&self) -> &str {
        "group"
    }

    fn marshal(&self) -> Result<Job, RelayError> {
        codec::marshal(self, Some(VERSION))
    }

    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
        load_each(self, batch, reporter).await;
    }
}

#[async_trait]
impl JobDelivery for Group {
    async fn deliver_job(&self, event: &SourceEvent, job: &Job) -> Outcome {
        let Some(binding) = &self.binding else {
            return unbound(job, "amplitude");
        };
        let (group, context): (Group, Context) = match binding.decode(event, job) {
            Ok(decoded) => decoded,
            Err(err) => return Outcome::from_error(job.id.clone(), &err),
        };
        let identification = match serde_json::to_string(&group.identification) {
            Ok(identification) => identification,
            Err(err) => return Outcome::from_error(job.id.clone(), &RelayError::from(err)),
        };

        let request = HttpRequest::post_form(
            GROUP_URL,
            vec![
                ("api_key".to_string(), binding.credential.expose().to_string()),
                ("identification".to_string(), identification),
            ],
        );
        let outcome = binding.send(request, job).await;
        if !outcome.is_success() {
            return outcome;
        }

        let user_id = group
            .identification
            .first()
            .map(|i| i.user_id.clone())
            .unwrap_or_default();
        let history: Arc<dyn Action> = Arc::new(Track::new(vec![Event::from_context(
            "Group",
            user_id,
            &context,
            event.received_at,
        )]));
        outcome.with_cascade(vec![history])
    }
}

/// Merges user identities.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Alias {
    /// Identity mappings.
    pub mapping: Vec<UserMap>,
    #[serde(skip)]
    pub(crate) binding: Option<HttpBinding>,
}

impl Alias {
    /// Creates the action around its mappings.
    #[must_use]
    pub fn new(mapping: Vec<UserMap>) -> Self {
        Self {
            mapping,
            binding: None,
        }
    }

    pub(crate) fn bound(binding: HttpBinding) -> Self {
        Self {
            mapping: Vec::new(),
            binding: Some(binding),
        }
    }
}

impl fmt::Debug for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alias")
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

impl Payload for Alias {}

#[async_trait]
impl Action for Alias {
    fn name(&self) -> &str {
        "alias"
    }

    fn marshal(&self) -> Result<Job, RelayError> {
        codec::marshal(self, Some(VERSION))
    }

    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
        load_each(self, batch, reporter).await;
    }
}

#[async_trait]
impl JobDelivery for Alias {
    async fn deliver_job(&self, event: &SourceEvent, job: &Job) -> Outcome {
        let Some(binding) = &self.binding else {
            return unbound(job, "amplitude");
        };
        let (alias, _): (Alias, Context) = match binding.decode(event, job) {
            Ok(decoded) => decoded,
            Err(err) => return Outcome::from_error(job.id.clone(), &err),
        };
        let mapping = match serde_json::to_string(&alias.mapping) {
            Ok(mapping) => mapping,
            Err(err) => return Outcome::from_error(job.id.clone(), &RelayError::from(err)),
        };

        let request = HttpRequest::post_form(
            ALIAS_URL,
            vec![
                ("api_key".to_string(), binding.credential.expose().to_string()),
                ("mapping".to_string(), mapping),
            ],
        );
        binding.send(request, job).await
    }
}
