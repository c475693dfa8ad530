//! In-memory clients for testing destinations.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::errors::{RelayError, SqlError, TransportError};
use crate::transport::{
    BlobBucket, BrokerMessage, DocumentCollection, HttpRequest, HttpResponse, HttpTransport,
    SqlConnection, SqlTransaction, TopicPublisher,
};

/// An HTTP transport that records requests and replays queued results.
///
/// Once the queue is drained every request is answered with a 200.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    results: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl RecordingTransport {
    /// Creates a transport answering 200 to everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    #[must_use]
    pub fn with_response(self, response: HttpResponse) -> Self {
        self.results.lock().push_back(Ok(response));
        self
    }

    /// Queues a transport failure.
    #[must_use]
    pub fn with_error(self, error: TransportError) -> Self {
        self.results.lock().push_back(Err(error));
        self
    }

    /// Returns every request sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::ok()))
    }
}

/// An object store bucket kept in memory.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failure: Option<String>,
}

impl MemoryBucket {
    /// Creates an empty bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail with the message.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Returns the content stored under the key.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }
}

#[async_trait]
impl BlobBucket for MemoryBucket {
    async fn write(&self, key: &str, content: &[u8]) -> Result<(), RelayError> {
        if let Some(message) = &self.failure {
            return Err(TransportError::other(message.clone()).into());
        }
        self.objects.lock().insert(key.to_string(), content.to_vec());
        Ok(())
    }
}

/// A document collection kept in memory, in insertion order.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    documents: Mutex<Vec<Map<String, Value>>>,
    failure: Option<String>,
}

impl MemoryCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every put fail with the message.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Returns every stored document.
    #[must_use]
    pub fn documents(&self) -> Vec<Map<String, Value>> {
        self.documents.lock().clone()
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    async fn put(&self, document: &Map<String, Value>) -> Result<(), RelayError> {
        if let Some(message) = &self.failure {
            return Err(TransportError::other(message.clone()).into());
        }
        self.documents.lock().push(document.clone());
        Ok(())
    }
}

/// A broker topic kept in memory.
#[derive(Debug, Default)]
pub struct MemoryTopic {
    messages: Mutex<Vec<BrokerMessage>>,
    failure: Option<String>,
}

impl MemoryTopic {
    /// Creates an empty topic.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send fail with the message.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Returns every published message.
    #[must_use]
    pub fn messages(&self) -> Vec<BrokerMessage> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl TopicPublisher for MemoryTopic {
    async fn send(&self, message: &BrokerMessage) -> Result<(), RelayError> {
        if let Some(failure) = &self.failure {
            return Err(TransportError::other(failure.clone()).into());
        }
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SqlState {
    committed: Vec<(String, Vec<Value>)>,
    executed: Vec<String>,
    rollbacks: usize,
}

/// A SQL connection that records statements.
///
/// Statements executed in a transaction become visible in
/// [`MemorySql::committed`] only once the transaction commits.
#[derive(Debug, Default)]
pub struct MemorySql {
    state: Arc<Mutex<SqlState>>,
    failing: Arc<HashSet<String>>,
}

impl MemorySql {
    /// Creates a connection accepting every statement.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every execution of the query fail.
    #[must_use]
    pub fn fail_on(mut self, query: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.failing).insert(query.into());
        self
    }

    /// Returns committed statements with their arguments, in order.
    #[must_use]
    pub fn committed(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().committed.clone()
    }

    /// Returns every attempted query, committed or not.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// Returns how many transactions were rolled back.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }

    fn attempt(&self, query: &str) -> Result<(), SqlError> {
        attempt(&self.state, &self.failing, query)
    }
}

fn attempt(state: &Mutex<SqlState>, failing: &HashSet<String>, query: &str) -> Result<(), SqlError> {
    state.lock().executed.push(query.to_string());
    if failing.contains(query) {
        return Err(SqlError::new(format!("statement failed: {query}")).with_query(query));
    }
    Ok(())
}

#[async_trait]
impl SqlConnection for MemorySql {
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, SqlError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            failing: Arc::clone(&self.failing),
            pending: Vec::new(),
        }))
    }

    async fn execute(&self, query: &str, args: &[Value]) -> Result<u64, SqlError> {
        self.attempt(query)?;
        self.state
            .lock()
            .committed
            .push((query.to_string(), args.to_vec()));
        Ok(1)
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<SqlState>>,
    failing: Arc<HashSet<String>>,
    pending: Vec<(String, Vec<Value>)>,
}

#[async_trait]
impl SqlTransaction for MemoryTransaction {
    async fn execute(&mut self, query: &str, args: &[Value]) -> Result<u64, SqlError> {
        attempt(&self.state, &self.failing, query)?;
        self.pending.push((query.to_string(), args.to_vec()));
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), SqlError> {
        let this = *self;
        this.state.lock().committed.extend(this.pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SqlError> {
        self.state.lock().rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_transport_replays_queue() {
        let transport = RecordingTransport::new()
            .with_response(HttpResponse::new(429, "slow down"))
            .with_error(TransportError::timeout("deadline"));

        let request = HttpRequest::post_form("https://example.test", Vec::new());
        assert_eq!(transport.send(request.clone()).await.unwrap().status, 429);
        assert!(transport.send(request.clone()).await.is_err());
        assert_eq!(transport.send(request).await.unwrap().status, 200);
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn test_failing_stores() {
        let bucket = MemoryBucket::new().failing("unavailable");
        let err = tokio_test::block_on(bucket.write("key", b"v")).unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(bucket.object("key").is_none());

        let topic = MemoryTopic::new();
        tokio_test::block_on(topic.send(&BrokerMessage::new(b"hi".to_vec()))).unwrap();
        assert_eq!(topic.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_visibility() {
        let sql = MemorySql::new();
        let mut tx = sql.begin().await.unwrap();
        tx.execute("INSERT INTO t VALUES ($1)", &[json!(1)]).await.unwrap();
        assert!(sql.committed().is_empty());
        tx.commit().await.unwrap();
        assert_eq!(sql.committed(), vec![("INSERT INTO t VALUES ($1)".to_string(), vec![json!(1)])]);

        let mut tx = sql.begin().await.unwrap();
        tx.execute("DELETE FROM t", &[]).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(sql.committed().len(), 1);
        assert_eq!(sql.rollbacks(), 1);
    }
}
