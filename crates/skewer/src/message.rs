//! # Wire messages
//!
//! The envelope exchanged with clients. A request is received once and shared
//! read-only for the rest of the call; every response is a fresh
//! [`WireMessage`] carrying the request's correlation id.

use std::fmt;
use bytes::Bytes;
use serde_json::{Map, Value};
use uuid::Uuid;
use crate::error::PipelineError;

/// `application/json`
pub const APPLICATION_JSON: &str = "application/json";

/// `text/plain`
pub const TEXT_PLAIN: &str = "text/plain";

/// `application/octet-stream`
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A HTTP-style status code attached to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const OK: Status = Status(200);
    pub const BAD_REQUEST: Status = Status(400);
    pub const INTERNAL_SERVER_ERROR: Status = Status(500);

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The body of a [`WireMessage`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// Opaque binary data, e.g. an encoded image.
    Bytes(Bytes),
    /// A UTF-8 string.
    Text(String),
    /// Structured fields.
    Fields(Map<String, Value>),
}

/// # WireMessage
///
/// A request or response envelope. Converters choose which payload variant
/// they read and write according to their protocol; HTTP-style transports also
/// look at `content_type` and `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    correlation_id: Uuid,
    payload: Payload,
    content_type: Option<String>,
    status: Option<Status>,
}

impl WireMessage {
    pub fn new(payload: Payload) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            payload,
            content_type: None,
            status: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Payload::Empty)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Payload::Text(text.into()))
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Payload::Bytes(bytes.into()))
    }

    pub fn fields(fields: Map<String, Value>) -> Self {
        Self::new(Payload::Fields(fields))
    }

    /// Builds the error response for `err`: the error status, a `text/plain`
    /// content type and the message as body.
    pub fn error_response(err: &PipelineError) -> Self {
        Self::text(err.message())
            .with_status(err.status())
            .with_content_type(TEXT_PLAIN)
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Ties this message to `request` by copying its correlation id.
    pub fn respond_to(mut self, request: &WireMessage) -> Self {
        self.correlation_id = request.correlation_id;
        self
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Text payload, or a binary payload that happens to be valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            Payload::Empty | Payload::Fields(_) => None,
        }
    }

    /// Binary view of the payload. Text payloads are returned as their UTF-8 bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Bytes(bytes) => Some(bytes),
            Payload::Text(text) => Some(text.as_bytes()),
            Payload::Empty | Payload::Fields(_) => None,
        }
    }

    /// The payload as a JSON value. Structured fields are returned as an object,
    /// text and bytes are parsed.
    pub fn json_body(&self) -> Result<Value, serde_json::Error> {
        match &self.payload {
            Payload::Fields(fields) => Ok(Value::Object(fields.clone())),
            Payload::Text(text) => serde_json::from_str(text),
            Payload::Bytes(bytes) => serde_json::from_slice(bytes),
            Payload::Empty => serde_json::from_str(""),
        }
    }

    /// `true` when there is nothing to read: no payload, or a zero-length one.
    pub fn is_empty(&self) -> bool {
        match &self.payload {
            Payload::Empty => true,
            Payload::Bytes(bytes) => bytes.is_empty(),
            Payload::Text(text) => text.is_empty(),
            Payload::Fields(fields) => fields.is_empty(),
        }
    }
}

impl Default for WireMessage {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_respond_to_keeps_correlation_id() {
        let request = WireMessage::text("hello");
        let response = WireMessage::text("world").respond_to(&request);
        assert_eq!(request.correlation_id(), response.correlation_id());
        assert_ne!(WireMessage::empty().correlation_id(), request.correlation_id());
    }

    #[test]
    fn test_error_response_is_well_formed() {
        let err = PipelineError::input("Parse json failed.");
        let response = WireMessage::error_response(&err);
        assert_eq!(response.status(), Some(Status::BAD_REQUEST));
        assert_eq!(response.content_type(), Some(TEXT_PLAIN));
        assert_eq!(response.as_text(), Some("Parse json failed."));
    }

    #[test]
    fn test_text_views() {
        let msg = WireMessage::bytes(Bytes::from_static(b"two words"));
        assert_eq!(msg.as_text(), Some("two words"));

        let invalid = WireMessage::bytes(vec![0xff, 0xfe]);
        assert_eq!(invalid.as_text(), None);
        assert_eq!(invalid.as_bytes(), Some(&[0xff, 0xfe][..]));
    }

    #[test]
    fn test_json_body() {
        let msg = WireMessage::text(r#"{"a": 1.0}"#);
        let value = msg.json_body().unwrap();
        assert_eq!(value["a"], 1.0);

        assert!(WireMessage::empty().json_body().is_err());
        assert!(WireMessage::text("{not json").json_body().is_err());
    }

    #[test]
    fn test_is_empty() {
        assert!(WireMessage::empty().is_empty());
        assert!(WireMessage::bytes(Vec::<u8>::new()).is_empty());
        assert!(!WireMessage::text("x").is_empty());
    }
}
