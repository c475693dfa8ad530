//! Segment destination.
//!
//! Every action forwards the analytics message as is to the tracking API,
//! with the job's context applied. Segment answers 200 to almost everything;
//! a 400 (invalid JSON or a request too large) is the only terminal status.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{driver, unbound, HttpBinding};
use crate::action::{Action, Destination};
use crate::codec::{self, Payload};
use crate::core::{self as messages, Batch, Common, Context, DestinationOptions, Event, Job, Outcome, Schedule, Secret};
use crate::errors::{RelayError, ValidationError};
use crate::executor::{load_each, JobDelivery};
use crate::policy::{self, DeliveryPolicy};
use crate::reporter::OutcomeReporter;
use crate::transport::{HttpRequest, HttpTransport};

/// Payload version of every Segment job.
pub const VERSION: &str = "v1.0";

const API_URL: &str = "https://api.segment.io/v1";

/// Options of the Segment destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentOptions {
    /// Source write key.
    #[serde(default)]
    pub write_key: Secret,
    /// Schedule shared by every action.
    #[serde(flatten)]
    pub schedule: Schedule,
    /// Whether a failed transport call discards the job.
    #[serde(default)]
    pub discard_on_transport_error: bool,
}

impl SegmentOptions {
    /// Creates options with a write key.
    #[must_use]
    pub fn new(write_key: impl Into<Secret>) -> Self {
        Self {
            write_key: write_key.into(),
            ..Self::default()
        }
    }

    /// Makes the destination load in realtime.
    #[must_use]
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.schedule.realtime = realtime;
        self
    }

    /// Fills schedule defaults and checks the write key.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        self.schedule.fill_defaults();
        let mut fail = ValidationError::new("destination/segment: Failed to load");
        if self.write_key.is_empty() {
            fail.push("Segment WriteKey must be set", &driver::path("segment", Some("WriteKey")));
        }
        fail.into_result()
    }
}

/// The Segment destination.
pub struct Segment {
    binding: HttpBinding,
}

impl Segment {
    /// Validates the options and binds the HTTP transport.
    pub fn new(mut options: SegmentOptions, transport: Arc<dyn HttpTransport>) -> Result<Self, ValidationError> {
        options.validate()?;
        Ok(Self {
            binding: HttpBinding {
                transport,
                credential: options.write_key,
                policy: DeliveryPolicy::new(policy::segment(), options.discard_on_transport_error),
                options: Arc::new(DestinationOptions::versioned(options.schedule, VERSION)),
            },
        })
    }
}

#[async_trait]
impl Destination for Segment {
    fn name(&self) -> String {
        "segment".to_string()
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

/// An analytics message accepted by the tracking API.
pub trait Message: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static {
    /// Endpoint and action name.
    const ACTION: &'static str;

    /// Returns the fields shared by every message.
    fn common_mut(&mut self) -> &mut Common;
}

macro_rules! impl_message {
    ($($message:ty => $action:literal),* $(,)?) => {
        $(
            impl Message for $message {
                const ACTION: &'static str = $action;

                fn common_mut(&mut self) -> &mut Common {
                    &mut self.common
                }
            }
        )*
    };
}

impl_message! {
    messages::Identify => "identify",
    messages::Track => "track",
    messages::Group => "group",
    messages::Alias => "alias",
    messages::Page => "page",
    messages::Screen => "screen",
}

/// Forwards one analytics message. The job payload is the message itself.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Call<M: Message> {
    /// The message.
    pub message: M,
    #[serde(skip)]
    binding: Option<HttpBinding>,
}

/// Forwards an identify call.
pub type Identify = Call<messages::Identify>;
/// Forwards a track call.
pub type Track = Call<messages::Track>;
/// Forwards a group call.
pub type Group = Call<messages::Group>;
/// Forwards an alias call.
pub type Alias = Call<messages::Alias>;
/// Forwards a page call.
pub type Page = Call<messages::Page>;
/// Forwards a screen call.
pub type Screen = Call<messages::Screen>;

impl<M: Message> Call<M> {
    /// Wraps a message.
    #[must_use]
    pub fn new(message: M) -> Self {
        Self {
            message,
            binding: None,
        }
    }

    fn bound(binding: HttpBinding) -> Self {
        Self {
            message: M::default(),
            binding: Some(binding),
        }
    }
}

impl<M: Message + fmt::Debug> fmt::Debug for Call<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl<M: Message> Payload for Call<M> {}

#[async_trait]
impl<M: Message> Action for Call<M> {
    fn name(&self) -> &str {
        M::ACTION
    }

    fn marshal(&self) -> Result<Job, RelayError> {
        codec::marshal(self, Some(VERSION))
    }

    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
        load_each(self, batch, reporter).await;
    }
}

#[async_trait]
impl<M: Message> JobDelivery for Call<M> {
    async fn deliver_job(&self, event: &Event, job: &Job) -> Outcome {
        let Some(binding) = &self.binding else {
            return unbound(job, "segment");
        };
        let (mut message, context): (M, Context) = match binding.decode(event, job) {
            Ok(decoded) => decoded,
            Err(err) => return Outcome::from_error(job.id.clone(), &err),
        };
        message.common_mut().context = context;

        match HttpRequest::post_json(format!("{API_URL}/{}", M::ACTION), &message) {
            Ok(request) => {
                let request = request
                    .with_basic_auth(binding.credential.expose())
                    .with_header("Content-Type", "application/json");
                binding.send(request, job).await
            }
            Err(err) => Outcome::from_error(job.id.clone(), &RelayError::from(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::executor::{deliver_all, DeliveryOptions};
    use crate::testing::RecordingTransport;
    use crate::transport::{HttpResponse, MockHttpTransport};
    use serde_json::json;

    async fn load(segment: &Segment, action: &str, job: Job, context: &[u8]) -> Vec<Outcome> {
        let batch = Arc::new(Batch::new(vec![Event::new().with_context(context.to_vec()).with_job(job)]));
        deliver_all(segment.actions().remove(action).unwrap(), batch, DeliveryOptions::default()).await
    }

    #[test]
    fn test_write_key_required() {
        let err = Segment::new(SegmentOptions::default(), Arc::new(RecordingTransport::new()))
            .err()
            .unwrap();
        assert_eq!(err.validations[0].message, "Segment WriteKey must be set");
    }

    #[test]
    fn test_payload_is_the_message() {
        let alias = Alias::new(messages::Alias {
            common: Common::for_user("u1"),
            previous_id: "anon-1".to_string(),
        });
        let job = alias.marshal().unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&job.data).unwrap();
        assert_eq!(raw["previousId"], "anon-1");
        assert_eq!(raw["userId"], "u1");
        assert_eq!(job.version.as_deref(), Some("v1.0"));
    }

    #[tokio::test]
    async fn test_track_forwarded_with_context() {
        let transport = Arc::new(RecordingTransport::new());
        let segment = Segment::new(SegmentOptions::new("wk"), transport.clone()).unwrap();

        let track = Track::new(messages::Track {
            common: Common::for_user("u1"),
            event: "Order completed".to_string(),
            properties: messages::Properties::new().with("revenue", 42.5),
        });
        let outcomes = load(&segment, "track", track.marshal().unwrap(), br#"{"ip":"192.0.2.1"}"#).await;
        assert!(outcomes[0].is_success());

        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://api.segment.io/v1/track");
        assert_eq!(request.headers.get("Authorization").map(String::as_str), Some("Basic d2s="));
        let body = request.json_body().unwrap();
        assert_eq!(body["event"], "Order completed");
        assert_eq!(body["context"]["ip"], "192.0.2.1");
        assert_eq!(body["properties"], json!({"revenue": 42.5}));
    }

    #[tokio::test]
    async fn test_only_400_is_terminal() {
        let transport = Arc::new(
            RecordingTransport::new()
                .with_response(HttpResponse::new(400, "invalid"))
                .with_response(HttpResponse::new(413, "too large")),
        );
        let segment = Segment::new(SegmentOptions::new("wk"), transport).unwrap();

        let job = Identify::default().marshal().unwrap();
        assert!(load(&segment, "identify", job, b"").await[0].is_terminal());
        let job = Identify::default().marshal().unwrap();
        assert!(load(&segment, "identify", job, b"").await[0].is_retryable());
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable() {
        let mut mock = MockHttpTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Err(TransportError::timeout("deadline exceeded")));
        let segment = Segment::new(SegmentOptions::new("wk"), Arc::new(mock)).unwrap();

        let outcomes = load(&segment, "page", Page::default().marshal().unwrap(), b"").await;
        assert!(outcomes[0].is_retryable());
        assert_eq!(outcomes[0].status_code(), Some(500));
    }
}
