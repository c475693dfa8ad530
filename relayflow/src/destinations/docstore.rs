//! Document store destination.
//!
//! Documents are put one by one rather than in a batch so each job gets its
//! own outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
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
use crate::transport::DocumentCollection;

/// Supported document stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Driver {
    /// AWS DynamoDB. Requires the `partition_key` param.
    #[serde(rename = "aws/dynamodb")]
    AwsDynamoDb,
    /// Azure Cosmos DB through its MongoDB API.
    #[serde(rename = "azure/cosmosdb")]
    AzureCosmosDb,
    /// Google Firestore. Requires the `name_field` param.
    #[serde(rename = "google/firestore")]
    GoogleFirestore,
    /// MongoDB. Connection: `<database>/<collection>`.
    #[serde(rename = "mongodb")]
    MongoDb,
}

/// Options of a docstore destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocstoreOptions {
    /// Name of the destination.
    #[serde(default)]
    pub name: String,
    /// Store driver.
    #[serde(default)]
    pub driver: Option<Driver>,
    /// Driver-specific collection path.
    #[serde(default)]
    pub connection: String,
    /// Driver-specific parameters.
    #[serde(default)]
    pub params: Params,
    /// Schedule shared by every action.
    #[serde(flatten)]
    pub schedule: Schedule,
}

impl DocstoreOptions {
    /// Creates options for a driver and collection.
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

    /// Returns the computed destination name, `docstore(<name>)`.
    #[must_use]
    pub fn destination_name(&self) -> String {
        format!("docstore({})", self.name)
    }

    /// Fills schedule defaults and checks every required option and
    /// environment variable.
    pub fn validate(&mut self, env: &dyn EnvLookup) -> Result<(), ValidationError> {
        self.schedule.fill_defaults();
        let mut fail = ValidationError::new("docstore: Failed to load");

        if self.name.is_empty() {
            fail.push("Collection name must be set", &driver::path("docstore", Some("Name")));
        }
        let name = self.destination_name();
        if self.driver.is_none() {
            fail.push("Collection driver must be set", &driver::path(&name, Some("Driver")));
        }
        if self.connection.is_empty() {
            fail.push("Collection connection must be set", &driver::path(&name, Some("Connection")));
        }

        match self.driver {
            Some(Driver::AwsDynamoDb) => {
                driver::require_env(env, &mut fail, "AWS_ACCESS_KEY_ID", &name);
                driver::require_env(env, &mut fail, "AWS_SECRET_ACCESS_KEY", &name);
                driver::require_env(env, &mut fail, "AWS_REGION", &name);
                driver::require_param(&self.params, &mut fail, "partition_key", &name);
            }
            Some(Driver::GoogleFirestore) => {
                driver::require_env(env, &mut fail, "GOOGLE_APPLICATION_CREDENTIALS", &name);
                driver::require_param(&self.params, &mut fail, "name_field", &name);
            }
            Some(Driver::AzureCosmosDb | Driver::MongoDb) => {
                match env.var("MONGO_SERVER_URL") {
                    None => driver::require_env(env, &mut fail, "MONGO_SERVER_URL", &name),
                    Some(url) if !url.starts_with("mongodb://") => fail.push(
                        "Environment variable 'MONGO_SERVER_URL' not valid",
                        &driver::path(&name, None),
                    ),
                    Some(_) => {}
                }
                if self.connection.split('/').count() != 2 {
                    fail.push("Connection string not valid", &driver::path(&name, Some("Connection")));
                }
            }
            None => {}
        }

        fail.into_result()
    }
}

/// A document store destination.
pub struct Docstore {
    options: DocstoreOptions,
    destination_options: DestinationOptions,
    collection: Option<Arc<dyn DocumentCollection>>,
}

impl Docstore {
    /// Validates the options against the process environment.
    pub fn new(options: DocstoreOptions) -> Result<Self, ValidationError> {
        Self::with_env(options, &ProcessEnv)
    }

    /// Validates the options against the given environment.
    pub fn with_env(mut options: DocstoreOptions, env: &dyn EnvLookup) -> Result<Self, ValidationError> {
        options.validate(env)?;
        let destination_options = DestinationOptions::unversioned(options.schedule.clone());
        Ok(Self {
            options,
            destination_options,
            collection: None,
        })
    }

    /// Binds the collection shared by every load.
    #[must_use]
    pub fn with_collection(mut self, collection: Arc<dyn DocumentCollection>) -> Self {
        self.collection = Some(collection);
        self
    }

    /// Returns the URL the collection is opened with.
    pub fn driver_url(&self) -> Result<String, RelayError> {
        let scheme = match self.options.driver {
            Some(Driver::AwsDynamoDb) => "dynamodb://",
            Some(Driver::GoogleFirestore) => "firestore://",
            Some(Driver::AzureCosmosDb | Driver::MongoDb) => "mongo://",
            None => {
                return Err(RelayError::config(format!(
                    "{}: Driver not supported",
                    self.options.destination_name()
                )))
            }
        };
        Ok(driver::driver_url(scheme, &self.options.connection, &self.options.params))
    }
}

#[async_trait]
impl Destination for Docstore {
    fn name(&self) -> String {
        self.options.destination_name()
    }

    fn options(&self) -> &DestinationOptions {
        &self.destination_options
    }

    fn actions(&self) -> HashMap<String, Arc<dyn Action>> {
        let put = Put {
            collection: self.collection.clone(),
            ..Put::default()
        };
        HashMap::from([("put".to_string(), Arc::new(put) as Arc<dyn Action>)])
    }

    async fn init(&self) -> Result<(), RelayError> {
        let url = self.driver_url()?;
        if self.collection.is_none() {
            return Err(RelayError::config(format!("{}: no collection bound for {url}", self.name())));
        }
        info!(destination = %self.name(), url = %url, "Collection ready");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), RelayError> {
        match &self.collection {
            Some(collection) => collection.close().await,
            None => Ok(()),
        }
    }
}

/// Inserts or replaces one document.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Put {
    /// The document.
    pub document: Map<String, Value>,
    #[serde(skip)]
    collection: Option<Arc<dyn DocumentCollection>>,
}

impl Put {
    /// Creates an action putting the document.
    #[must_use]
    pub fn new(document: Map<String, Value>) -> Self {
        Self {
            document,
            collection: None,
        }
    }
}

impl fmt::Debug for Put {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Put").field("document", &self.document).finish()
    }
}

impl Payload for Put {}

#[async_trait]
impl Action for Put {
    fn name(&self) -> &str {
        "put"
    }

    fn marshal(&self) -> Result<Job, RelayError> {
        codec::marshal(self, None)
    }

    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
        load_each(self, batch, reporter).await;
    }
}

#[async_trait]
impl JobDelivery for Put {
    async fn deliver_job(&self, _event: &Event, job: &Job) -> Outcome {
        let put: Put = match codec::decode(job) {
            Ok(put) => put,
            Err(err) => return Outcome::from_error(job.id.clone(), &err),
        };
        let Some(collection) = &self.collection else {
            return Outcome::from_error(job.id.clone(), &RelayError::config("collection not bound"));
        };

        match collection.put(&put.document).await {
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
    use crate::testing::MemoryCollection;
    use serde_json::json;

    fn mongo_env() -> HashMap<String, String> {
        env_of(&[("MONGO_SERVER_URL", "mongodb://localhost:27017")])
    }

    fn document(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_dynamodb_requires_partition_key() {
        let env = env_of(&[
            ("AWS_ACCESS_KEY_ID", "a"),
            ("AWS_SECRET_ACCESS_KEY", "b"),
            ("AWS_REGION", "us-east-1"),
        ]);
        let options = DocstoreOptions::new("users", Driver::AwsDynamoDb, "users");
        let err = Docstore::with_env(options.clone(), &env).err().unwrap();
        assert_eq!(err.validations.len(), 1);
        assert_eq!(err.validations[0].message, "'partition_key' must be set");
        assert_eq!(err.validations[0].path, vec!["Options", "Destinations", "docstore(users)", "Params"]);

        let docstore = Docstore::with_env(options.with_param("partition_key", "id"), &env).unwrap();
        assert_eq!(docstore.driver_url().unwrap(), "dynamodb://users?partition_key=id");
    }

    #[test]
    fn test_mongo_validation() {
        let bad_env = env_of(&[("MONGO_SERVER_URL", "localhost:27017")]);
        let options = DocstoreOptions::new("users", Driver::MongoDb, "users");
        let err = Docstore::with_env(options, &bad_env).err().unwrap();
        let messages: Vec<_> = err.validations.iter().map(|v| v.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Environment variable 'MONGO_SERVER_URL' not valid", "Connection string not valid"]
        );

        let docstore = Docstore::with_env(DocstoreOptions::new("users", Driver::AzureCosmosDb, "app/users"), &mongo_env()).unwrap();
        assert_eq!(docstore.driver_url().unwrap(), "mongo://app/users");
    }

    #[tokio::test]
    async fn test_put_one_document_per_job() {
        let collection = Arc::new(MemoryCollection::new());
        let docstore = Docstore::with_env(DocstoreOptions::new("users", Driver::MongoDb, "app/users"), &mongo_env())
            .unwrap()
            .with_collection(collection.clone());

        let first = Put::new(document(json!({"id": "u1", "plan": "pro"}))).marshal().unwrap();
        let second = Put::new(document(json!({"id": "u2"}))).marshal().unwrap();
        let broken = Job::new(b"[]".to_vec());
        let batch = Arc::new(Batch::new(vec![
            Event::new().with_job(first).with_job(broken),
            Event::new().with_job(second),
        ]));

        let outcomes = deliver_all(docstore.actions().remove("put").unwrap(), batch, DeliveryOptions::default()).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].is_terminal());
        assert!(outcomes[2].is_success());

        let stored = collection.documents();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["plan"], "pro");
    }

    #[tokio::test]
    async fn test_store_error_is_retryable() {
        let docstore = Docstore::with_env(DocstoreOptions::new("users", Driver::MongoDb, "app/users"), &mongo_env())
            .unwrap()
            .with_collection(Arc::new(MemoryCollection::new().failing("write conflict")));

        let job = Put::new(Map::new()).marshal().unwrap();
        let batch = Arc::new(Batch::new(vec![Event::new().with_job(job)]));
        let outcomes = deliver_all(docstore.actions().remove("put").unwrap(), batch, DeliveryOptions::default()).await;
        assert!(outcomes[0].is_retryable());
    }
}
