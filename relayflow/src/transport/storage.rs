//! Storage and messaging seams for cloud-backed destinations.
//!
//! Drivers (object stores, document databases, message brokers) sit behind
//! these traits. A destination holds one long-lived handle and shares it
//! read-only across concurrent loads.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::errors::RelayError;

/// A bucket in an object store.
#[async_trait]
pub trait BlobBucket: Send + Sync {
    /// Writes a whole object, replacing any existing one with the same key.
    async fn write(&self, key: &str, content: &[u8]) -> Result<(), RelayError>;

    /// Releases the connection.
    async fn close(&self) -> Result<(), RelayError> {
        Ok(())
    }
}

/// A collection in a document store.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Inserts or replaces a document.
    async fn put(&self, document: &Map<String, Value>) -> Result<(), RelayError>;

    /// Releases the connection.
    async fn close(&self) -> Result<(), RelayError> {
        Ok(())
    }
}

/// A message published to a broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Message body.
    #[serde(with = "crate::codec::base64_bytes")]
    pub body: Vec<u8>,
    /// Message attributes.
    #[serde(default, rename = "meta")]
    pub metadata: BTreeMap<String, String>,
}

impl BrokerMessage {
    /// Creates a message without metadata.
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A topic in a message broker.
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Publishes one message.
    async fn send(&self, message: &BrokerMessage) -> Result<(), RelayError>;

    /// Flushes pending messages and releases the connection.
    async fn shutdown(&self) -> Result<(), RelayError> {
        Ok(())
    }
}
