//! Message broker destination.
//!
//! Publishes one message per job to a topic or queue. The broker connection
//! is opened outside of this crate and bound with [`Topic::with_publisher`];
//! [`Topic::driver_url`] computes the URL to open it with.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::driver::{self, EnvLookup, Params, ProcessEnv};
use crate::action::{Action, Destination};
use crate::codec::{self, Payload};
use crate::core::{Batch, DestinationOptions, Event, Job, Outcome, Schedule};
use crate::errors::{RelayError, ValidationError};
use crate::executor::{load_each, JobDelivery};
use crate::reporter::OutcomeReporter;
use crate::transport::{BrokerMessage, TopicPublisher};

/// Supported message brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Driver {
    /// AWS SNS. Connection: `arn:aws:sns:<region>:<id>:<topic>`.
    #[serde(rename = "aws/sns")]
    AwsSns,
    /// AWS SQS. Connection: `arn:aws:sqs:<region>:<id>:<queue>` or
    /// `sqs.<region>.amazonaws.com/<id>/<queue>`.
    #[serde(rename = "aws/sqs")]
    AwsSqs,
    /// Azure Service Bus. Connection: `<topic>`.
    #[serde(rename = "azure/servicebus")]
    AzureServiceBus,
    /// Google Pub/Sub. Connection: `<project>/<topic>`.
    #[serde(rename = "google/pubsub")]
    GooglePubSub,
    /// Apache Kafka. Connection: `<topic>`.
    #[serde(rename = "kafka")]
    Kafka,
    /// NATS. Connection: `<subject>`.
    #[serde(rename = "nats")]
    Nats,
    /// RabbitMQ. Connection: `<exchange>`.
    #[serde(rename = "rabbitmq")]
    RabbitMq,
}

/// Options of a topic destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicOptions {
    /// Name of the destination, e.g. `orders`.
    #[serde(default)]
    pub name: String,
    /// Broker driver.
    #[serde(default)]
    pub driver: Option<Driver>,
    /// Driver-specific connection string.
    #[serde(default)]
    pub connection: String,
    /// Driver-specific parameters, e.g. `region`.
    #[serde(default)]
    pub params: Params,
    /// Schedule shared by every action.
    #[serde(flatten)]
    pub schedule: Schedule,
}

impl TopicOptions {
    /// Creates options for a driver and connection.
    #[must_use]
    pub fn new(name: impl Into<String>, driver: Driver, connection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: Some(driver),
            connection: connection.into(),
            params: Params::new(),
            schedule: Schedule::default(),
        }
    }

    /// Adds a driver parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Sets the load interval.
    #[must_use]
    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.schedule.interval = interval.into();
        self
    }

    /// Returns the computed destination name, `topic(<name>)`.
    #[must_use]
    pub fn destination_name(&self) -> String {
        format!("topic({})", self.name)
    }

    /// Fills schedule defaults and checks every required option and
    /// environment variable.
    pub fn validate(&mut self, env: &dyn EnvLookup) -> Result<(), ValidationError> {
        self.schedule.fill_defaults();
        let mut fail = ValidationError::new("topic: Failed to load");

        if self.name.is_empty() {
            fail.push("Topic name must be set", &driver::path("topic", Some("Name")));
        }
        let name = self.destination_name();
        if self.driver.is_none() {
            fail.push("Topic driver must be set", &driver::path(&name, Some("Driver")));
        }
        if self.connection.is_empty() {
            fail.push("Topic connection must be set", &driver::path(&name, Some("Connection")));
        }

        match self.driver {
            Some(Driver::AwsSns | Driver::AwsSqs) => {
                driver::require_aws(env, &self.params, &mut fail, &name);
            }
            Some(Driver::AzureServiceBus) => {
                driver::require_env(env, &mut fail, "SERVICEBUS_CONNECTION_STRING", &name);
            }
            Some(Driver::GooglePubSub) => {
                driver::require_env(env, &mut fail, "GOOGLE_APPLICATION_CREDENTIALS", &name);
            }
            Some(Driver::Kafka) => driver::require_env(env, &mut fail, "KAFKA_BROKERS", &name),
            Some(Driver::Nats) => driver::require_env(env, &mut fail, "NATS_SERVER_URL", &name),
            Some(Driver::RabbitMq) => {
                driver::require_env(env, &mut fail, "RABBIT_SERVER_URL", &name);
            }
            None => {}
        }

        fail.into_result()
    }
}

/// A message broker destination.
pub struct Topic {
    options: TopicOptions,
    destination_options: DestinationOptions,
    publisher: Option<Arc<dyn TopicPublisher>>,
}

impl Topic {
    /// Validates the options against the process environment.
    pub fn new(options: TopicOptions) -> Result<Self, ValidationError> {
        Self::with_env(options, &ProcessEnv)
    }

    /// Validates the options against the given environment.
    pub fn with_env(mut options: TopicOptions, env: &dyn EnvLookup) -> Result<Self, ValidationError> {
        options.validate(env)?;
        let destination_options = DestinationOptions::unversioned(options.schedule.clone());
        Ok(Self {
            options,
            destination_options,
            publisher: None,
        })
    }

    /// Binds the broker connection shared by every load.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn TopicPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Returns the validated options.
    #[must_use]
    pub fn options_ref(&self) -> &TopicOptions {
        &self.options
    }

    /// Returns the URL the broker connection is opened with.
    pub fn driver_url(&self) -> Result<String, RelayError> {
        let options = &self.options;
        let url = |scheme: &str| driver::driver_url(scheme, &options.connection, &options.params);
        match options.driver {
            Some(Driver::AwsSns) => Ok(url("awssns:///")),
            Some(Driver::AwsSqs) => sqs_url(&options.connection, &options.params),
            Some(Driver::AzureServiceBus) => Ok(url("azuresb://")),
            Some(Driver::GooglePubSub) => Ok(url("gcppubsub://")),
            Some(Driver::Kafka) => Ok(url("kafka://")),
            Some(Driver::Nats) => Ok(url("nats://")),
            Some(Driver::RabbitMq) => Ok(url("rabbit://")),
            None => Err(RelayError::config(format!(
                "{}: Driver not supported",
                options.destination_name()
            ))),
        }
    }
}

fn sqs_url(connection: &str, params: &Params) -> Result<String, RelayError> {
    if !connection.starts_with("arn:") {
        return Ok(driver::driver_url("awssqs://", connection, params));
    }
    let parts: Vec<&str> = connection.split(':').collect();
    if parts.len() != 6 {
        return Err(RelayError::config(format!("Invalid SQS queue ARN: {connection}")));
    }
    let transformed = format!("{}.{}.amazonaws.com/{}/{}", parts[2], parts[3], parts[4], parts[5]);
    Ok(driver::driver_url("awssqs://", &transformed, params))
}

#[async_trait]
impl Destination for Topic {
    fn name(&self) -> String {
        self.options.destination_name()
    }

    fn options(&self) -> &DestinationOptions {
        &self.destination_options
    }

    fn actions(&self) -> HashMap<String, Arc<dyn Action>> {
        let publish = Publish {
            publisher: self.publisher.clone(),
            ..Publish::default()
        };
        HashMap::from([("publish".to_string(), Arc::new(publish) as Arc<dyn Action>)])
    }

    async fn init(&self) -> Result<(), RelayError> {
        if self.publisher.is_none() {
            return Err(RelayError::config(format!(
                "{}: no publisher bound for {}",
                self.name(),
                self.driver_url()?
            )));
        }
        info!(destination = %self.name(), "Topic ready");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), RelayError> {
        match &self.publisher {
            Some(publisher) => publisher.shutdown().await,
            None => Ok(()),
        }
    }
}

/// Publishes a message to the topic.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Publish {
    /// The message to publish.
    pub message: BrokerMessage,
    #[serde(skip)]
    publisher: Option<Arc<dyn TopicPublisher>>,
}

impl Publish {
    /// Creates an action publishing the given body.
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            message: BrokerMessage::new(body),
            publisher: None,
        }
    }

    /// Adds a metadata entry to the message.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message = self.message.with_metadata(key, value);
        self
    }
}

impl fmt::Debug for Publish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publish")
            .field("message", &self.message)
            .field("bound", &self.publisher.is_some())
            .finish()
    }
}

impl Payload for Publish {}

#[async_trait]
impl Action for Publish {
    fn name(&self) -> &str {
        "publish"
    }

    fn marshal(&self) -> Result<Job, RelayError> {
        codec::marshal(self, None)
    }

    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
        load_each(self, batch, reporter).await;
    }
}

#[async_trait]
impl JobDelivery for Publish {
    async fn deliver_job(&self, _event: &Event, job: &Job) -> Outcome {
        let publish: Publish = match codec::decode(job) {
            Ok(publish) => publish,
            Err(err) => return Outcome::from_error(job.id.clone(), &err),
        };
        let Some(publisher) = &self.publisher else {
            return Outcome::from_error(job.id.clone(), &RelayError::config("topic publisher not bound"));
        };

        match publisher.send(&publish.message).await {
            Ok(()) => Outcome::succeeded(job.id.clone()),
            Err(err) => Outcome::retry(job.id.clone(), err.to_job_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destinations::driver::env_of;
    use crate::executor::{deliver_all, DeliveryOptions};
    use crate::testing::MemoryTopic;
    use pretty_assertions::assert_eq;

    fn kafka_env() -> HashMap<String, String> {
        env_of(&[("KAFKA_BROKERS", "127.0.0.1:9092")])
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let options: TopicOptions = serde_json::from_str("{}").unwrap();
        let err = Topic::with_env(options, &HashMap::<String, String>::new()).err().unwrap();
        let messages: Vec<_> = err.validations.iter().map(|v| v.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Topic name must be set", "Topic driver must be set", "Topic connection must be set"]
        );
        assert_eq!(err.validations[1].path, vec!["Options", "Destinations", "topic()", "Driver"]);
    }

    #[test]
    fn test_driver_env_checked() {
        let options = TopicOptions::new("orders", Driver::Nats, "orders.created");
        let err = Topic::with_env(options, &kafka_env()).err().unwrap();
        assert_eq!(err.validations[0].message, "Environment variable 'NATS_SERVER_URL' not set");
        assert_eq!(err.validations[0].path, vec!["Options", "Destinations", "topic(orders)"]);
    }

    #[test]
    fn test_driver_urls() {
        let topic = Topic::with_env(TopicOptions::new("orders", Driver::Kafka, "orders"), &kafka_env()).unwrap();
        assert_eq!(topic.driver_url().unwrap(), "kafka://orders");
        assert_eq!(topic.options_ref().schedule.max_retries, 72);

        let env = env_of(&[("AWS_ACCESS_KEY_ID", "a"), ("AWS_SECRET_ACCESS_KEY", "b"), ("AWS_REGION", "us-east-2")]);
        let sqs = TopicOptions::new("q", Driver::AwsSqs, "arn:aws:sqs:us-east-2:123456789012:orders");
        let topic = Topic::with_env(sqs, &env).unwrap();
        assert_eq!(
            topic.driver_url().unwrap(),
            "awssqs://sqs.us-east-2.amazonaws.com/123456789012/orders"
        );

        let sns = TopicOptions::new("n", Driver::AwsSns, "arn:aws:sns:us-east-2:1:t").with_param("region", "us-east-2");
        let topic = Topic::with_env(sns, &env).unwrap();
        assert_eq!(topic.driver_url().unwrap(), "awssns:///arn:aws:sns:us-east-2:1:t?region=us-east-2");
    }

    #[test]
    fn test_driver_deserializes_from_name() {
        let options: TopicOptions = serde_json::from_value(serde_json::json!({
            "name": "events",
            "driver": "rabbitmq",
            "connection": "exchange",
            "interval": "@every 30s"
        }))
        .unwrap();
        assert_eq!(options.driver, Some(Driver::RabbitMq));
        assert_eq!(options.schedule.interval, "@every 30s");
    }

    #[tokio::test]
    async fn test_init_requires_publisher() {
        let topic = Topic::with_env(TopicOptions::new("orders", Driver::Kafka, "orders"), &kafka_env()).unwrap();
        assert!(topic.init().await.is_err());
    }

    #[tokio::test]
    async fn test_publish_per_job() {
        let memory = Arc::new(MemoryTopic::new());
        let topic = Topic::with_env(TopicOptions::new("orders", Driver::Kafka, "orders"), &kafka_env())
            .unwrap()
            .with_publisher(memory.clone());
        topic.init().await.unwrap();

        let good = Publish::new(b"hello".to_vec()).with_metadata("source", "api").marshal().unwrap();
        let bad = Job::new(b"{".to_vec());
        let bad_id = bad.id.clone();
        let batch = Arc::new(Batch::new(vec![Event::new().with_job(good).with_job(bad)]));

        let action = topic.actions().remove("publish").unwrap();
        let outcomes = deliver_all(action, batch, DeliveryOptions::default()).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].is_terminal());
        assert_eq!(outcomes[1].jobs, vec![bad_id]);

        let sent = memory.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, b"hello".to_vec());
        assert_eq!(sent[0].metadata.get("source").map(String::as_str), Some("api"));
    }

    #[tokio::test]
    async fn test_send_failure_is_retryable() {
        let memory = Arc::new(MemoryTopic::new().failing("broker down"));
        let topic = Topic::with_env(TopicOptions::new("orders", Driver::Kafka, "orders"), &kafka_env())
            .unwrap()
            .with_publisher(memory);

        let batch = Arc::new(Batch::new(vec![Event::new().with_job(Publish::new(vec![1]).marshal().unwrap())]));
        let outcomes = deliver_all(topic.actions().remove("publish").unwrap(), batch, DeliveryOptions::default()).await;
        assert!(outcomes[0].is_retryable());
    }
}
