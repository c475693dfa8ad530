//! Object store destination.

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
use crate::transport::BlobBucket;

/// Supported object stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Driver {
    /// AWS S3, or any S3-compatible store when the `endpoint` param is set.
    #[serde(rename = "aws/s3")]
    AwsS3,
    /// Azure Blob Storage.
    #[serde(rename = "azure/blob")]
    AzureBlob,
    /// Google Cloud Storage.
    #[serde(rename = "google/storage")]
    GoogleStorage,
}

/// Options of a blob destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobOptions {
    /// Name of the destination.
    #[serde(default)]
    pub name: String,
    /// Store driver.
    #[serde(default)]
    pub driver: Option<Driver>,
    /// Bucket name.
    #[serde(default)]
    pub connection: String,
    /// Driver-specific parameters: `region`, `endpoint`, `disableSSL`,
    /// `s3ForcePathStyle`.
    #[serde(default)]
    pub params: Params,
    /// Schedule shared by every action.
    #[serde(flatten)]
    pub schedule: Schedule,
}

impl BlobOptions {
    /// Creates options for a driver and bucket.
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

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u16) -> Self {
        self.schedule.max_retries = max_retries;
        self
    }

    /// Returns the computed destination name, `blob(<name>)`.
    #[must_use]
    pub fn destination_name(&self) -> String {
        format!("blob({})", self.name)
    }

    /// Fills schedule defaults and checks every required option and
    /// environment variable.
    pub fn validate(&mut self, env: &dyn EnvLookup) -> Result<(), ValidationError> {
        self.schedule.fill_defaults();
        let mut fail = ValidationError::new("blob: Failed to load");

        if self.name.is_empty() {
            fail.push("Bucket name must be set", &driver::path("blob", Some("Name")));
        }
        let name = self.destination_name();
        if self.driver.is_none() {
            fail.push("Bucket driver must be set", &driver::path(&name, Some("Driver")));
        }
        if self.connection.is_empty() {
            fail.push("Bucket connection must be set", &driver::path(&name, Some("Connection")));
        }

        match self.driver {
            // S3-compatible stores carry their own credentials.
            Some(Driver::AwsS3) if self.params.contains_key("endpoint") => {}
            Some(Driver::AwsS3) => driver::require_aws(env, &self.params, &mut fail, &name),
            Some(Driver::AzureBlob) => {
                driver::require_env(env, &mut fail, "AZURE_STORAGE_ACCOUNT", &name);
                if !env.is_set("AZURE_STORAGE_KEY") && !env.is_set("AZURE_STORAGE_SAS_TOKEN") {
                    fail.push(
                        "Environment variable 'AZURE_STORAGE_KEY' or 'AZURE_STORAGE_SAS_TOKEN' not set",
                        &driver::path(&name, None),
                    );
                }
            }
            Some(Driver::GoogleStorage) => {
                driver::require_env(env, &mut fail, "GOOGLE_APPLICATION_CREDENTIALS", &name);
            }
            None => {}
        }

        fail.into_result()
    }
}

/// An object store destination.
pub struct Blob {
    options: BlobOptions,
    destination_options: DestinationOptions,
    bucket: Option<Arc<dyn BlobBucket>>,
}

impl Blob {
    /// Validates the options against the process environment.
    pub fn new(options: BlobOptions) -> Result<Self, ValidationError> {
        Self::with_env(options, &ProcessEnv)
    }

    /// Validates the options against the given environment.
    pub fn with_env(mut options: BlobOptions, env: &dyn EnvLookup) -> Result<Self, ValidationError> {
        options.validate(env)?;
        let destination_options = DestinationOptions::unversioned(options.schedule.clone());
        Ok(Self {
            options,
            destination_options,
            bucket: None,
        })
    }

    /// Binds the bucket shared by every load.
    #[must_use]
    pub fn with_bucket(mut self, bucket: Arc<dyn BlobBucket>) -> Self {
        self.bucket = Some(bucket);
        self
    }

    /// Returns the URL the bucket is opened with.
    pub fn driver_url(&self) -> Result<String, RelayError> {
        let scheme = match self.options.driver {
            Some(Driver::AwsS3) => "s3://",
            Some(Driver::AzureBlob) => "azblob://",
            Some(Driver::GoogleStorage) => "gs://",
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
impl Destination for Blob {
    fn name(&self) -> String {
        self.options.destination_name()
    }

    fn options(&self) -> &DestinationOptions {
        &self.destination_options
    }

    fn actions(&self) -> HashMap<String, Arc<dyn Action>> {
        let write = Write {
            bucket: self.bucket.clone(),
            ..Write::default()
        };
        HashMap::from([("write".to_string(), Arc::new(write) as Arc<dyn Action>)])
    }

    async fn init(&self) -> Result<(), RelayError> {
        let url = self.driver_url()?;
        if self.bucket.is_none() {
            return Err(RelayError::config(format!("{}: no bucket bound for {url}", self.name())));
        }
        info!(destination = %self.name(), url = %url, "Bucket ready");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), RelayError> {
        match &self.bucket {
            Some(bucket) => bucket.close().await,
            None => Ok(()),
        }
    }
}

/// Writes a whole object to the bucket.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Write {
    /// Object key.
    pub filename: String,
    /// Object content.
    #[serde(with = "crate::codec::base64_bytes")]
    pub content: Vec<u8>,
    #[serde(skip)]
    bucket: Option<Arc<dyn BlobBucket>>,
}

impl Write {
    /// Creates an action writing the content under the filename.
    #[must_use]
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content,
            bucket: None,
        }
    }
}

impl fmt::Debug for Write {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Write")
            .field("filename", &self.filename)
            .field("content_len", &self.content.len())
            .finish()
    }
}

impl Payload for Write {}

#[async_trait]
impl Action for Write {
    fn name(&self) -> &str {
        "write"
    }

    fn marshal(&self) -> Result<Job, RelayError> {
        codec::marshal(self, None)
    }

    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
        load_each(self, batch, reporter).await;
    }
}

#[async_trait]
impl JobDelivery for Write {
    async fn deliver_job(&self, _event: &Event, job: &Job) -> Outcome {
        let write: Write = match codec::decode(job) {
            Ok(write) => write,
            Err(err) => return Outcome::from_error(job.id.clone(), &err),
        };
        let Some(bucket) = &self.bucket else {
            return Outcome::from_error(job.id.clone(), &RelayError::config("bucket not bound"));
        };

        match bucket.write(&write.filename, &write.content).await {
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
    use crate::testing::MemoryBucket;

    fn gcs_env() -> HashMap<String, String> {
        env_of(&[("GOOGLE_APPLICATION_CREDENTIALS", "/etc/gcp.json")])
    }

    #[test]
    fn test_s3_endpoint_skips_credentials() {
        let options = BlobOptions::new("archive", Driver::AwsS3, "bucket")
            .with_param("endpoint", "http://localhost:9000")
            .with_param("s3ForcePathStyle", "true");
        let blob = Blob::with_env(options, &HashMap::<String, String>::new()).unwrap();
        assert_eq!(blob.name(), "blob(archive)");
        assert_eq!(
            blob.driver_url().unwrap(),
            "s3://bucket?endpoint=http%3A%2F%2Flocalhost%3A9000&s3ForcePathStyle=true"
        );
    }

    #[test]
    fn test_s3_requires_credentials() {
        let options = BlobOptions::new("archive", Driver::AwsS3, "bucket");
        let err = Blob::with_env(options, &HashMap::<String, String>::new()).err().unwrap();
        assert_eq!(err.validations.len(), 3);
        assert_eq!(err.message, "blob: Failed to load");
    }

    #[test]
    fn test_azure_requires_key_or_token() {
        let options = BlobOptions::new("archive", Driver::AzureBlob, "container");
        let env = env_of(&[("AZURE_STORAGE_ACCOUNT", "acct")]);
        let err = Blob::with_env(options.clone(), &env).err().unwrap();
        assert_eq!(err.validations.len(), 1);

        let env = env_of(&[("AZURE_STORAGE_ACCOUNT", "acct"), ("AZURE_STORAGE_SAS_TOKEN", "tok")]);
        let blob = Blob::with_env(options, &env).unwrap();
        assert_eq!(blob.driver_url().unwrap(), "azblob://container");
    }

    #[tokio::test]
    async fn test_write_per_job() {
        let bucket = Arc::new(MemoryBucket::new());
        let blob = Blob::with_env(BlobOptions::new("archive", Driver::GoogleStorage, "bkt"), &gcs_env())
            .unwrap()
            .with_bucket(bucket.clone());
        blob.init().await.unwrap();

        let job = Write::new("2024/01/report.csv", b"a,b\n1,2\n".to_vec()).marshal().unwrap();
        let batch = Arc::new(Batch::new(vec![Event::new().with_job(job)]));
        let outcomes = deliver_all(blob.actions().remove("write").unwrap(), batch, DeliveryOptions::default()).await;

        assert!(outcomes[0].is_success());
        assert_eq!(bucket.object("2024/01/report.csv"), Some(b"a,b\n1,2\n".to_vec()));
    }

    #[tokio::test]
    async fn test_writer_error_is_retryable() {
        let blob = Blob::with_env(BlobOptions::new("archive", Driver::GoogleStorage, "bkt"), &gcs_env())
            .unwrap()
            .with_bucket(Arc::new(MemoryBucket::new().failing("bucket unavailable")));

        let job = Write::new("f", vec![1, 2]).marshal().unwrap();
        let batch = Arc::new(Batch::new(vec![Event::new().with_job(job)]));
        let outcomes = deliver_all(blob.actions().remove("write").unwrap(), batch, DeliveryOptions::default()).await;
        assert!(outcomes[0].is_retryable());
        assert_eq!(outcomes[0].status_code(), Some(500));
    }

    #[tokio::test]
    async fn test_unbound_bucket_is_retryable() {
        let blob = Blob::with_env(BlobOptions::new("archive", Driver::GoogleStorage, "bkt"), &gcs_env()).unwrap();
        assert!(blob.init().await.is_err());

        let job = Write::new("f", vec![1]).marshal().unwrap();
        let batch = Arc::new(Batch::new(vec![Event::new().with_job(job)]));
        let outcomes = deliver_all(blob.actions().remove("write").unwrap(), batch, DeliveryOptions::default()).await;
        assert!(outcomes[0].is_retryable());
    }
}
