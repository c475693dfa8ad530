//! Built-in destinations.
//!
//! | Destination | Name | Version | Actions |
//! |---|---|---|---|
//! | [`amplitude`] | `amplitude` | v2.0 | identify, track, group, alias, page, screen |
//! | [`mailchimp`] | `mailchimp` | v3.0 | identify |
//! | [`segment`] | `segment` | v1.0 | identify, track, group, alias, page, screen |
//! | [`blob`] | `blob(<name>)` | | write |
//! | [`docstore`] | `docstore(<name>)` | | put |
//! | [`topic`] | `topic(<name>)` | | publish |
//! | [`sqlike`] | `sqlike(<name>)` | | run-statements, run-operation |
//!
//! A destination is built from validated options and the client it talks
//! through. The actions it exposes share that client; actions built by hand
//! (e.g. by a flow) only need to be marshalled.

pub mod amplitude;
pub mod blob;
pub mod docstore;
pub mod driver;
pub mod mailchimp;
pub mod segment;
pub mod sqlike;
pub mod topic;

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::codec;
use crate::core::{Context, DestinationOptions, Event, Job, Outcome, Secret};
use crate::errors::RelayError;
use crate::policy::DeliveryPolicy;
use crate::transport::{HttpRequest, HttpTransport};

pub(crate) fn default_true() -> bool {
    true
}

/// The HTTP client shared by the actions of an API destination.
#[derive(Clone)]
pub(crate) struct HttpBinding {
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) credential: Secret,
    pub(crate) policy: DeliveryPolicy,
    pub(crate) options: Arc<DestinationOptions>,
}

impl HttpBinding {
    /// Decodes a job's payload and context, rejecting unknown versions.
    pub(crate) fn decode<T: DeserializeOwned>(
        &self,
        event: &Event,
        job: &Job,
    ) -> Result<(T, Context), RelayError> {
        if !self.options.supports_version(job.version.as_deref()) {
            return Err(RelayError::encoding(format!(
                "Unsupported payload version: {}",
                job.version.as_deref().unwrap_or("none")
            )));
        }
        let payload = codec::decode(job)?;
        let context = codec::decode_context(event, job)?;
        Ok((payload, context))
    }

    /// Sends the request and classifies the result with the destination's
    /// policy.
    pub(crate) async fn send(&self, request: HttpRequest, job: &Job) -> Outcome {
        crate::executor::send_classified(self.transport.as_ref(), request, &self.policy, &job.id).await
    }
}

/// Outcome of a job loaded through an action that was never bound to its
/// destination's client.
pub(crate) fn unbound(job: &Job, destination: &str) -> Outcome {
    Outcome::from_error(
        job.id.clone(),
        &RelayError::config(format!("{destination}: action is not bound to a client")),
    )
}
