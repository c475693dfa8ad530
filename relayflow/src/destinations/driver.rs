//! Driver configuration shared by cloud-backed destinations.
//!
//! Cloud drivers read their credentials from environment variables and take
//! driver-specific query parameters. Validation reads the environment
//! through [`EnvLookup`] so it can be exercised without touching the process
//! environment.

use std::collections::{BTreeMap, HashMap};

use crate::errors::ValidationError;

/// Driver-specific query parameters, e.g. `region` or `partition_key`.
pub type Params = BTreeMap<String, String>;

/// Reads configuration from environment variables.
pub trait EnvLookup {
    /// Returns the variable's value; unset and empty variables are `None`.
    fn var(&self, key: &str) -> Option<String>;

    /// Returns true if the variable is set to a non-empty value.
    fn is_set(&self, key: &str) -> bool {
        self.var(key).is_some()
    }
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Builds the validation path of a destination.
#[must_use]
pub fn path(destination: &str, field: Option<&str>) -> Vec<String> {
    let mut path = vec![
        "Options".to_string(),
        "Destinations".to_string(),
        destination.to_string(),
    ];
    if let Some(field) = field {
        path.push(field.to_string());
    }
    path
}

/// Records a problem when an environment variable is missing.
pub fn require_env(env: &dyn EnvLookup, fail: &mut ValidationError, key: &str, destination: &str) {
    if !env.is_set(key) {
        fail.push(
            format!("Environment variable '{key}' not set"),
            &path(destination, None),
        );
    }
}

/// Records a problem when a driver parameter is missing.
pub fn require_param(params: &Params, fail: &mut ValidationError, key: &str, destination: &str) {
    if params.get(key).map_or(true, String::is_empty) {
        fail.push(format!("'{key}' must be set"), &path(destination, Some("Params")));
    }
}

/// Validates AWS credentials. The region may come from `AWS_REGION` or from
/// the `region` parameter.
pub fn require_aws(env: &dyn EnvLookup, params: &Params, fail: &mut ValidationError, destination: &str) {
    require_env(env, fail, "AWS_ACCESS_KEY_ID", destination);
    require_env(env, fail, "AWS_SECRET_ACCESS_KEY", destination);
    let region_param = params.get("region").is_some_and(|r| !r.is_empty());
    if !env.is_set("AWS_REGION") && !region_param {
        fail.push("Environment variable 'AWS_REGION' not set", &path(destination, None));
    }
}

/// Encodes parameters as a query string, sorted by key.
#[must_use]
pub fn encode_params(params: &Params) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", query_escape(key), query_escape(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Builds a driver URL from a scheme, a connection string and parameters.
#[must_use]
pub fn driver_url(scheme: &str, connection: &str, params: &Params) -> String {
    if params.is_empty() {
        format!("{scheme}{connection}")
    } else {
        format!("{scheme}{connection}?{}", encode_params(params))
    }
}

fn query_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
pub(crate) fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_params_sorted_and_escaped() {
        let mut params = Params::new();
        params.insert("region".into(), "us-east-1".into());
        params.insert("endpoint".into(), "http://localhost:9000".into());
        assert_eq!(
            encode_params(&params),
            "endpoint=http%3A%2F%2Flocalhost%3A9000&region=us-east-1"
        );
    }

    #[test]
    fn test_driver_url() {
        let mut params = Params::new();
        assert_eq!(driver_url("s3://", "bucket", &params), "s3://bucket");
        params.insert("region".into(), "eu-west-1".into());
        assert_eq!(driver_url("s3://", "bucket", &params), "s3://bucket?region=eu-west-1");
    }

    #[test]
    fn test_require_aws_region_from_params() {
        let env = env_of(&[("AWS_ACCESS_KEY_ID", "a"), ("AWS_SECRET_ACCESS_KEY", "b")]);
        let mut fail = ValidationError::new("x");
        require_aws(&env, &Params::new(), &mut fail, "blob(b)");
        assert_eq!(fail.validations.len(), 1);

        let mut params = Params::new();
        params.insert("region".into(), "us-east-1".into());
        let mut fail = ValidationError::new("x");
        require_aws(&env, &params, &mut fail, "blob(b)");
        assert!(fail.is_empty());
    }

    #[test]
    fn test_empty_env_is_unset() {
        let env = env_of(&[("KAFKA_BROKERS", "")]);
        assert!(!env.is_set("KAFKA_BROKERS"));
    }
}
