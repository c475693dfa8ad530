//! Mailchimp destination.
//!
//! Subscribes users to an audience. Members are upserted by subscriber hash,
//! the MD5 digest of the lower-cased email address.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{default_true, driver, unbound, HttpBinding};
use crate::action::{Action, Destination};
use crate::codec::{self, Payload};
use crate::core::{Batch, Context, DestinationOptions, Event, Job, Outcome, Schedule, Secret};
use crate::errors::{RelayError, ValidationError};
use crate::executor::{load_each, JobDelivery};
use crate::policy::{self, DeliveryPolicy};
use crate::reporter::OutcomeReporter;
use crate::transport::{HttpRequest, HttpTransport};
use crate::utils::rfc3339;

/// Payload version of every Mailchimp job.
pub const VERSION: &str = "v3.0";

/// Options of the Mailchimp destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailchimpOptions {
    /// API key.
    #[serde(default)]
    pub api_key: Secret,
    /// Datacenter of the account, e.g. `us19`.
    #[serde(default)]
    pub datacenter_id: String,
    /// Audience new members are added to.
    #[serde(default)]
    pub audience_id: String,
    /// New members are `pending` until they confirm when enabled.
    #[serde(default)]
    pub enable_double_opt_in: bool,
    /// Schedule shared by every action.
    #[serde(flatten)]
    pub schedule: Schedule,
    /// Whether a failed transport call discards the job.
    #[serde(default = "default_true")]
    pub discard_on_transport_error: bool,
}

impl MailchimpOptions {
    /// Creates options for an audience.
    #[must_use]
    pub fn new(
        api_key: impl Into<Secret>,
        datacenter_id: impl Into<String>,
        audience_id: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            datacenter_id: datacenter_id.into(),
            audience_id: audience_id.into(),
            enable_double_opt_in: false,
            schedule: Schedule::default(),
            discard_on_transport_error: true,
        }
    }

    /// Enables double opt-in.
    #[must_use]
    pub fn with_double_opt_in(mut self, enabled: bool) -> Self {
        self.enable_double_opt_in = enabled;
        self
    }

    /// Fills schedule defaults and checks every required option.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        self.schedule.fill_defaults();
        let mut fail = ValidationError::new("destination/mailchimp: Failed to load");
        if self.api_key.is_empty() {
            fail.push("Mailchimp API key must be set", &driver::path("mailchimp", Some("APIKey")));
        }
        if self.datacenter_id.is_empty() {
            fail.push(
                "Mailchimp datacenter must be set",
                &driver::path("mailchimp", Some("DatacenterID")),
            );
        }
        if self.audience_id.is_empty() {
            fail.push(
                "Mailchimp audience must be set",
                &driver::path("mailchimp", Some("AudienceID")),
            );
        }
        fail.into_result()
    }

    fn status_if_new(&self) -> &'static str {
        if self.enable_double_opt_in {
            "pending"
        } else {
            "subscribed"
        }
    }
}

/// The Mailchimp destination.
pub struct Mailchimp {
    binding: HttpBinding,
    options: Arc<MailchimpOptions>,
}

impl Mailchimp {
    /// Validates the options and binds the HTTP transport.
    pub fn new(mut options: MailchimpOptions, transport: Arc<dyn HttpTransport>) -> Result<Self, ValidationError> {
        options.validate()?;
        let binding = HttpBinding {
            transport,
            credential: Secret::new(format!("anystring:{}", options.api_key.expose())),
            policy: DeliveryPolicy::new(policy::mailchimp(), options.discard_on_transport_error),
            options: Arc::new(DestinationOptions::versioned(options.schedule.clone(), VERSION)),
        };
        Ok(Self {
            binding,
            options: Arc::new(options),
        })
    }
}

#[async_trait]
impl Destination for Mailchimp {
    fn name(&self) -> String {
        "mailchimp".to_string()
    }

    fn options(&self) -> &DestinationOptions {
        &self.binding.options
    }

    fn actions(&self) -> HashMap<String, Arc<dyn Action>> {
        let identify = Identify {
            binding: Some(self.binding.clone()),
            options: Some(self.options.clone()),
            ..Identify::default()
        };
        HashMap::from([("identify".to_string(), Arc::new(identify) as Arc<dyn Action>)])
    }
}

fn serialize_rfc3339<S: Serializer>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&rfc3339(timestamp))
}

/// Coordinates of the signup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignupLocation {
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
}

/// A list member as sent to the members API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signup {
    /// Status applied when the member does not exist yet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_if_new: String,
    /// Email address.
    #[serde(rename = "email_address")]
    pub email: String,
    /// First name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub first_name: String,
    /// Last name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_name: String,
    /// IP address the member signed up from.
    #[serde(default)]
    pub ip_signup: String,
    /// When the member signed up.
    #[serde(serialize_with = "serialize_rfc3339")]
    pub timestamp_signup: DateTime<Utc>,
    /// Where the member signed up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SignupLocation>,
}

impl Default for Signup {
    fn default() -> Self {
        Self {
            status_if_new: String::new(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            ip_signup: String::new(),
            timestamp_signup: DateTime::<Utc>::UNIX_EPOCH,
            location: None,
        }
    }
}

impl Signup {
    /// Returns the subscriber hash: the hex MD5 of the lower-cased email.
    #[must_use]
    pub fn subscriber_hash(&self) -> String {
        hex::encode(Md5::digest(self.email.to_lowercase().as_bytes()))
    }
}

/// Adds or updates an audience member.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Identify {
    /// The member.
    #[serde(flatten)]
    pub signup: Signup,
    #[serde(skip)]
    binding: Option<HttpBinding>,
    #[serde(skip)]
    options: Option<Arc<MailchimpOptions>>,
}

impl Identify {
    /// Creates the action around a member.
    #[must_use]
    pub fn new(signup: Signup) -> Self {
        Self {
            signup,
            ..Self::default()
        }
    }
}

impl fmt::Debug for Identify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identify")
            .field("signup", &self.signup)
            .finish_non_exhaustive()
    }
}

impl Payload for Identify {}

#[async_trait]
impl Action for Identify {
    fn name(&self) -> &str {
        "identify"
    }

    fn marshal(&self) -> Result<Job, RelayError> {
        let mut prepared = self.clone();
        prepared.signup.email = prepared.signup.email.to_lowercase();
        prepared.signup.timestamp_signup = prepared.signup.timestamp_signup.trunc_subsecs(0);
        codec::marshal(&prepared, Some(VERSION))
    }

    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
        load_each(self, batch, reporter).await;
    }
}

#[async_trait]
impl JobDelivery for Identify {
    async fn deliver_job(&self, event: &Event, job: &Job) -> Outcome {
        let (Some(binding), Some(options)) = (&self.binding, &self.options) else {
            return unbound(job, "mailchimp");
        };
        let (identify, _): (Identify, Context) = match binding.decode(event, job) {
            Ok(decoded) => decoded,
            Err(err) => return Outcome::from_error(job.id.clone(), &err),
        };

        let mut body = identify.signup;
        body.status_if_new = options.status_if_new().to_string();
        let url = format!(
            "https://{}.api.mailchimp.com/3.0/lists/{}/members/{}",
            options.datacenter_id,
            options.audience_id,
            body.subscriber_hash()
        );

        match HttpRequest::put_json(url, &body) {
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
