//! Request and response model types.

use crate::{OutboxError, OutboxResult};
use chrono::{DateTime, Utc};
use courier_config_and_utils::DEFAULT_TTL_MS;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Parse a method name, case-insensitively.
    pub fn parse(s: &str) -> OutboxResult<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            other => Err(OutboxError::InvalidRequest(format!(
                "unsupported method: {other}"
            ))),
        }
    }
}

/// Request priority. Carried with the request; delivery order is append order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Ordered header list. Lookups are case-insensitive.
pub type Headers = Vec<(String, String)>;

fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// The durable representation of one outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub id: String,
    pub url: String,
    pub method: RequestMethod,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "ttl_ms", with = "duration_millis")]
    pub ttl: Duration,
    #[serde(default)]
    pub priority: Priority,
}

impl RequestDescriptor {
    /// Start building a request to `url` with a fresh id.
    pub fn builder(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            method: RequestMethod::Get,
            headers: Vec::new(),
            body: Vec::new(),
            created_at: None,
            ttl: Duration::from_millis(DEFAULT_TTL_MS),
            priority: Priority::Normal,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replace an existing header (matched case-insensitively) or append it.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// `created_at + ttl < now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => match self.created_at.checked_add_signed(ttl) {
                Some(deadline) => deadline < now,
                None => false,
            },
            Err(_) => false,
        }
    }

    fn validate(&self) -> OutboxResult<()> {
        if self.id.trim().is_empty() {
            return Err(OutboxError::InvalidRequest("request id is empty".into()));
        }
        Url::parse(&self.url)
            .map_err(|e| OutboxError::InvalidRequest(format!("invalid url {}: {e}", self.url)))?;
        Ok(())
    }
}

/// Builder for [`RequestDescriptor`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    id: String,
    url: String,
    method: RequestMethod,
    headers: Headers,
    body: Vec<u8>,
    created_at: Option<DateTime<Utc>>,
    ttl: Duration,
    priority: Priority,
}

impl RequestBuilder {
    /// Override the generated id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the body and set `Content-Type: application/json`.
    pub fn json_body<T: Serialize>(mut self, value: &T) -> OutboxResult<Self> {
        self.body = serde_json::to_vec(value)?;
        self.headers
            .push(("Content-Type".into(), "application/json".into()));
        Ok(self)
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Backdate or postdate the creation timestamp (defaults to now).
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn build(self) -> OutboxResult<RequestDescriptor> {
        let descriptor = RequestDescriptor {
            id: self.id,
            url: self.url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            ttl: self.ttl,
            priority: self.priority,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Several logical requests merged into one physical call.
///
/// `descriptor.id` is synthetic; outcomes are replicated to every entry of
/// `original_ids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRequestDescriptor {
    pub descriptor: RequestDescriptor,
    pub original_ids: Vec<String>,
}

impl CompositeRequestDescriptor {
    pub fn new(descriptor: RequestDescriptor, original_ids: Vec<String>) -> Self {
        Self {
            descriptor,
            original_ids,
        }
    }
}

/// What the queue persists and what outcomes refer back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    Single(RequestDescriptor),
    Composite(CompositeRequestDescriptor),
}

impl Request {
    pub fn descriptor(&self) -> &RequestDescriptor {
        match self {
            Self::Single(descriptor) => descriptor,
            Self::Composite(composite) => &composite.descriptor,
        }
    }

    pub fn descriptor_mut(&mut self) -> &mut RequestDescriptor {
        match self {
            Self::Single(descriptor) => descriptor,
            Self::Composite(composite) => &mut composite.descriptor,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor().id
    }

    pub fn url(&self) -> &str {
        &self.descriptor().url
    }

    pub fn original_ids(&self) -> Option<&[String]> {
        match self {
            Self::Single(_) => None,
            Self::Composite(composite) => Some(&composite.original_ids),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Composite(_))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.descriptor().is_expired(now)
    }

    pub fn validate(&self) -> OutboxResult<()> {
        self.descriptor().validate()?;
        if let Self::Composite(composite) = self {
            if composite.original_ids.is_empty() {
                return Err(OutboxError::InvalidRequest(format!(
                    "composite {} has no original ids",
                    composite.descriptor.id
                )));
            }
        }
        Ok(())
    }
}

impl From<RequestDescriptor> for Request {
    fn from(descriptor: RequestDescriptor) -> Self {
        Self::Single(descriptor)
    }
}

impl From<CompositeRequestDescriptor> for Request {
    fn from(composite: CompositeRequestDescriptor) -> Self {
        Self::Composite(composite)
    }
}

/// A response from the Rest Transport, carrying the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request: Request,
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn request_id(&self) -> &str {
        self.request.id()
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn body_json(&self) -> OutboxResult<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Why an attempt produced no usable response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Connectivity or timeout failure reported by the transport
    #[error("transport failure: {0}")]
    Transport(String),

    /// The ttl elapsed before the request was dispatched
    #[error("request expired before dispatch")]
    Expired,

    /// The request could not be serialized for persistence
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// The queue could not persist the request
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Result of one transport attempt.
pub type ResponseOutcome = Result<Response, FailureCause>;

/// The payload of a terminal error: a non-2xx response or a failure cause.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorOutcome {
    Response(Response),
    Cause(FailureCause),
}

impl ErrorOutcome {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response(response) => Some(response.status),
            Self::Cause(_) => None,
        }
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::Response(_) => None,
            Self::Cause(cause) => Some(cause),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
