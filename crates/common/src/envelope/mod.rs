//! Message envelope schema
//!
//! Every message between agents is a structured `{envelope, payload}` pair.
//! The envelope carries addressing, typing and lifetime; the payload carries
//! an open-vocabulary `intent` and a JSON body. Signatures cover both halves
//! (see [`Message::signable`]).

mod validate;

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

pub use validate::{
    validate_envelope, validate_message, wire_size, ValidationError, ValidationReport, Violation,
};

pub const PROTOCOL_VERSION: &str = "1.0";
/// Default message lifetime in seconds
pub const DEFAULT_TTL: u64 = 3600;
/// Upper bound on the serialized size of a message
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
/// Body field that replaces an encrypted payload on the wire
pub const ENCRYPTED_BODY_MARKER: &str = "_encrypted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Request,
    Response,
    Notification,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Notification => "notification",
            MessageType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request" => Some(MessageType::Request),
            "response" => Some(MessageType::Response),
            "notification" => Some(MessageType::Notification),
            "error" => Some(MessageType::Error),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressing and lifetime metadata for a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Id of the request a response or error refers to. Always serialized,
    /// as `null` when absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub sender: String,
    pub recipient: String,
    /// RFC 3339 creation time, UTC
    pub timestamp: String,
    pub ttl: u64,
    pub version: String,
}

impl Envelope {
    /// New request envelope stamped with the current time and a fresh id
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            message_type: MessageType::Request,
            correlation_id: None,
            sender: sender.into(),
            recipient: recipient.into(),
            timestamp: now_timestamp(),
            ttl: DEFAULT_TTL,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Parsed creation time, if the timestamp is valid RFC 3339
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// When this message stops being valid
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = i64::try_from(self.ttl).ok()?;
        self.created_at()?
            .checked_add_signed(Duration::try_seconds(ttl)?)
    }

    /// Expired messages, and messages whose timestamp cannot be read, are
    /// treated the same way.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now > expires_at,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub intent: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub body: Value,
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

impl Payload {
    pub fn new(intent: impl Into<String>, body: Value) -> Self {
        Self {
            intent: intent.into(),
            content_type: default_content_type(),
            body,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// The body that stands in for a payload sent encrypted
    pub fn encrypted_placeholder() -> Value {
        json!({ ENCRYPTED_BODY_MARKER: true })
    }

    pub fn is_encrypted_placeholder(&self) -> bool {
        self.body.get(ENCRYPTED_BODY_MARKER) == Some(&Value::Bool(true))
    }
}

/// A complete message: what gets signed, validated and stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub envelope: Envelope,
    pub payload: Payload,
}

/// Borrowed `{envelope, payload}` view, the exact structure that is signed
#[derive(Debug, Serialize)]
pub struct SignableContent<'a> {
    pub envelope: &'a Envelope,
    pub payload: &'a Payload,
}

impl Message {
    pub fn new(envelope: Envelope, payload: Payload) -> Self {
        Self { envelope, payload }
    }

    pub fn request(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        intent: impl Into<String>,
        body: Value,
    ) -> Self {
        Self::new(Envelope::new(sender, recipient), Payload::new(intent, body))
    }

    pub fn response(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        correlation_id: impl Into<String>,
        intent: impl Into<String>,
        body: Value,
    ) -> Self {
        let envelope = Envelope::new(sender, recipient)
            .with_type(MessageType::Response)
            .with_correlation_id(correlation_id);
        Self::new(envelope, Payload::new(intent, body))
    }

    /// Fire-and-forget message; no response is expected
    pub fn notification(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        intent: impl Into<String>,
        body: Value,
    ) -> Self {
        let envelope = Envelope::new(sender, recipient).with_type(MessageType::Notification);
        Self::new(envelope, Payload::new(intent, body))
    }

    pub fn error(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        correlation_id: Option<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        let mut envelope = Envelope::new(sender, recipient).with_type(MessageType::Error);
        envelope.correlation_id = correlation_id;
        let body = json!({
            "error_code": error_code.into(),
            "error_message": error_message.into(),
        });
        Self::new(envelope, Payload::new("error", body))
    }

    pub fn id(&self) -> &str {
        &self.envelope.id
    }

    pub fn signable(&self) -> SignableContent<'_> {
        SignableContent {
            envelope: &self.envelope,
            payload: &self.payload,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.envelope.is_expired()
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Check this message against the schema and size limit
    pub fn validate(&self) -> Result<(), ValidationError> {
        let value = self.to_value().map_err(|_| ValidationError::from(Violation::NotAnObject))?;
        validate_message(&value).into_result()
    }
}

/// Extract `{envelope, payload}` from an untyped message as received
///
/// Returns `None` when either half is missing. The halves are copied as-is,
/// so fields the typed [`Message`] does not model are still covered.
pub fn signable_content(message: &Value) -> Option<Value> {
    let envelope = message.get("envelope")?;
    let payload = message.get("payload")?;
    Some(json!({ "envelope": envelope, "payload": payload }))
}

/// Expiry check on an untyped message; anything unreadable counts as expired
pub fn is_expired_value(message: &Value) -> bool {
    let envelope = match message.get("envelope") {
        Some(envelope) => envelope,
        None => return true,
    };
    let created = match envelope
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
    {
        Some(created) => created,
        None => return true,
    };
    let ttl = envelope
        .get("ttl")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_TTL as i64);
    match Duration::try_seconds(ttl).and_then(|ttl| created.checked_add_signed(ttl)) {
        Some(expires_at) => Utc::now() > expires_at,
        None => true,
    }
}

pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

/// Current UTC time as RFC 3339 with microseconds and a `+00:00` offset
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{sign_json, verify_json, SecretKey};

    #[test]
    fn test_envelope_defaults() {
        let envelope = Envelope::new("vault_a", "vault_b");
        assert!(envelope.id.starts_with("msg_"));
        assert_eq!(envelope.id.len(), 4 + 32);
        assert_eq!(envelope.message_type, MessageType::Request);
        assert_eq!(envelope.ttl, DEFAULT_TTL);
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert!(envelope.correlation_id.is_none());
        assert!(envelope.created_at().is_some());
        assert!(!envelope.is_expired());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Envelope::new("a", "b");
        let b = Envelope::new("a", "b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_wire_shape() {
        let message = Message::request("vault_a", "vault_b", "ping", json!({}));
        let value = message.to_value().unwrap();

        assert_eq!(value["envelope"]["type"], "request");
        assert_eq!(value["envelope"]["correlation_id"], Value::Null);
        assert_eq!(value["payload"]["content_type"], DEFAULT_CONTENT_TYPE);
        assert!(value["envelope"]["timestamp"]
            .as_str()
            .unwrap()
            .ends_with("+00:00"));
    }

    #[test]
    fn test_convenience_constructors() {
        let response = Message::response("b", "a", "msg_1", "pong", json!({ "ok": true }));
        assert_eq!(response.envelope.message_type, MessageType::Response);
        assert_eq!(response.envelope.correlation_id.as_deref(), Some("msg_1"));

        let note = Message::notification("a", "b", "context_exchange", json!(null));
        assert_eq!(note.envelope.message_type, MessageType::Notification);

        let error = Message::error("b", "a", None, "bad_request", "unknown intent");
        assert_eq!(error.envelope.message_type, MessageType::Error);
        assert_eq!(error.payload.intent, "error");
        assert_eq!(error.payload.body["error_code"], "bad_request");
        assert_eq!(error.payload.body["error_message"], "unknown intent");
    }

    #[test]
    fn test_expiry() {
        let mut envelope = Envelope::new("a", "b").with_ttl(60);
        let created = envelope.created_at().unwrap();
        assert!(!envelope.is_expired_at(created + Duration::seconds(59)));
        assert!(envelope.is_expired_at(created + Duration::seconds(61)));

        envelope.timestamp = "yesterday".to_string();
        assert!(envelope.is_expired());
    }

    #[test]
    fn test_expiry_on_raw_values() {
        let fresh = Message::request("a", "b", "ping", json!({})).to_value().unwrap();
        assert!(!is_expired_value(&fresh));

        let old = json!({ "envelope": { "timestamp": "2020-01-01T00:00:00+00:00", "ttl": 60 } });
        assert!(is_expired_value(&old));
        assert!(is_expired_value(&json!({ "envelope": {} })));
        assert!(is_expired_value(&json!({})));
    }

    #[test]
    fn test_encrypted_placeholder() {
        let mut payload = Payload::new("ping", json!({ "text": "hi" }));
        assert!(!payload.is_encrypted_placeholder());
        payload.body = Payload::encrypted_placeholder();
        assert!(payload.is_encrypted_placeholder());
    }

    #[test]
    fn test_typed_and_raw_signable_content_agree() {
        let key = SecretKey::generate();
        let message = Message::request("a", "b", "query", json!({ "q": "weather", "n": 3 }));
        let sig = sign_json(&key, &message.signable()).unwrap();

        let mut raw = message.to_value().unwrap();
        raw["relay_metadata"] = json!({ "hop": 1 });
        let signable = signable_content(&raw).unwrap();
        verify_json(&key.public(), &signable, &sig).unwrap();
    }

    #[test]
    fn test_signable_content_requires_both_halves() {
        assert!(signable_content(&json!({ "envelope": {} })).is_none());
        assert!(signable_content(&json!({ "payload": {} })).is_none());
    }
}
