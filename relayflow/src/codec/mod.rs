//! Job payload codec.
//!
//! Converts typed action values into durable [`Job`] payloads and back.
//! Secrets are stripped from a copy of the action before it is serialized,
//! so a persisted payload never carries a credential.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::{Context, Event, Job};
use crate::errors::RelayError;

/// A typed action payload that can be persisted as a job.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Clears every field holding a credential.
    ///
    /// Called on a copy of the action right before serialization. The
    /// default implementation is for payloads without secrets.
    fn strip_secrets(&mut self) {}
}

impl Payload for serde_json::Value {}

/// Serializes an action into a new job.
///
/// The job receives a fresh identifier and, for versioned destinations, the
/// given schema version. A payload that cannot be serialized yields a
/// "Bad Request" encoding error and no job.
pub fn marshal<P: Payload>(payload: &P, version: Option<&str>) -> Result<Job, RelayError> {
    let mut stripped = payload.clone();
    stripped.strip_secrets();

    let data = serde_json::to_vec(&stripped)
        .map_err(|err| RelayError::encoding(format!("Bad Request: {err}")))?;

    let job = Job::new(data);
    Ok(match version {
        Some(version) => job.with_version(version),
        None => job,
    })
}

/// Deserializes a job's payload.
pub fn decode<T: DeserializeOwned>(job: &Job) -> Result<T, RelayError> {
    serde_json::from_slice(&job.data).map_err(RelayError::from)
}

/// Deserializes the request context applying to a job.
///
/// Jobs without context bytes fall back to their event's context; when both
/// are empty the default (empty) context is returned.
pub fn decode_context(event: &Event, job: &Job) -> Result<Context, RelayError> {
    let bytes = event.context_for(job);
    if bytes.is_empty() {
        return Ok(Context::default());
    }
    serde_json::from_slice(bytes).map_err(RelayError::from)
}

/// Serde adapter encoding byte buffers as standard base64 strings.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes bytes as a base64 string.
    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserializes bytes from a base64 string; `null` yields no bytes.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Keyed {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        api_key: String,
        name: String,
    }

    impl Payload for Keyed {
        fn strip_secrets(&mut self) {
            self.api_key.clear();
        }
    }

    #[test]
    fn test_marshal_strips_secret() {
        let action = Keyed {
            api_key: "s3cr3t".to_string(),
            name: "n".to_string(),
        };
        let job = marshal(&action, Some("v2.0")).unwrap();

        let raw = String::from_utf8(job.data.clone()).unwrap();
        assert!(!raw.contains("s3cr3t"));
        assert!(!raw.contains("api_key"));
        assert_eq!(job.version.as_deref(), Some("v2.0"));

        // The caller's value keeps its key.
        assert_eq!(action.api_key, "s3cr3t");

        let back: Keyed = decode(&job).unwrap();
        assert_eq!(back.name, "n");
        assert!(back.api_key.is_empty());
    }

    #[test]
    fn test_unversioned_marshal() {
        let job = marshal(&serde_json::json!({"a": 1}), None).unwrap();
        assert!(job.version.is_none());
    }

    #[test]
    fn test_decode_error_is_terminal() {
        let job = Job::new(b"not json".to_vec());
        let err = decode::<Keyed>(&job).unwrap_err();
        assert!(err.is_always_terminal());
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_decode_context_fallbacks() {
        let event = Event::new();
        let job = Job::new(Vec::new());
        assert_eq!(decode_context(&event, &job).unwrap(), Context::default());

        let event = Event::new().with_context(br#"{"ip":"10.0.0.1"}"#.to_vec());
        assert_eq!(decode_context(&event, &job).unwrap().ip, "10.0.0.1");
    }
}
