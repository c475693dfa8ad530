//! HTTP transport seam.
//!
//! Destinations build an [`HttpRequest`] and hand it to an
//! [`HttpTransport`]. The transport owns connection pooling, timeouts and
//! cancellation of the network call; destinations only see a received
//! response or a [`TransportError`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::BTreeMap;

use crate::errors::TransportError;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// POST.
    Post,
    /// PUT.
    Put,
}

impl Method {
    /// Returns the method as it appears on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// No body.
    Empty,
    /// A JSON document.
    Json(Vec<u8>),
    /// URL-encoded form fields, in order.
    Form(Vec<(String, String)>),
}

/// A single outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Extra headers.
    pub headers: BTreeMap<String, String>,
    /// Body.
    pub body: Body,
}

impl HttpRequest {
    fn new(method: Method, url: impl Into<String>, body: Body) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body,
        }
    }

    /// Creates a JSON POST.
    pub fn post_json<T: serde::Serialize>(url: impl Into<String>, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(Method::Post, url, Body::Json(serde_json::to_vec(body)?)))
    }

    /// Creates a JSON PUT.
    pub fn put_json<T: serde::Serialize>(url: impl Into<String>, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(Method::Put, url, Body::Json(serde_json::to_vec(body)?)))
    }

    /// Creates a form POST.
    #[must_use]
    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self::new(Method::Post, url, Body::Form(fields))
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a Basic `Authorization` header over the given credentials.
    #[must_use]
    pub fn with_basic_auth(self, credentials: &str) -> Self {
        let encoded = STANDARD.encode(credentials.as_bytes());
        self.with_header("Authorization", format!("Basic {encoded}"))
    }

    /// Returns true when a header with the name is set, ignoring case.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|key| key.eq_ignore_ascii_case(name))
    }

    /// Returns a form field by name.
    #[must_use]
    pub fn form_field(&self, name: &str) -> Option<&str> {
        match &self.body {
            Body::Form(fields) => fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    /// Parses the JSON body.
    #[must_use]
    pub fn json_body(&self) -> Option<serde_json::Value> {
        match &self.body {
            Body::Json(bytes) => serde_json::from_slice(bytes).ok(),
            _ => None,
        }
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Creates an empty 200 response.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(200, "")
    }
}

/// Performs one HTTP exchange.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends the request and returns the response, whatever its status.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by `reqwest`.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport around an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
fn map_reqwest_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::connect(err.to_string())
    } else {
        TransportError::other(err.to_string())
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
        };

        if !request.has_header("Accept") {
            builder = builder.header("Accept", "*/*");
        }
        if matches!(request.body, Body::Json(_)) && !request.has_header("Content-Type") {
            builder = builder.header("Content-Type", "application/json");
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            Body::Empty => builder,
            Body::Json(bytes) => builder.body(bytes),
            Body::Form(fields) => builder.form(&fields),
        };

        let response = builder.send().await.map_err(|e| map_reqwest_error(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| map_reqwest_error(&e))?;

        Ok(HttpResponse { status, body })
    }
}
