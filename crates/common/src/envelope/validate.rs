//! Schema validation on untyped JSON
//!
//! Inbound data is checked before it is deserialized, so a malformed message
//! can be described in full instead of failing on the first bad field.

use std::{fmt, io};

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;

use super::{MessageType, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    NotAnObject,
    MissingField(&'static str),
    InvalidType(String),
    UnsupportedVersion(String),
    InvalidTtl,
    TooLarge { size: usize, limit: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::NotAnObject => f.write_str("message must be a JSON object"),
            Violation::MissingField(field) => write!(f, "missing required field: {}", field),
            Violation::InvalidType(t) => write!(f, "invalid message type: {}", t),
            Violation::UnsupportedVersion(v) => write!(f, "unsupported protocol version: {}", v),
            Violation::InvalidTtl => f.write_str("ttl must be a positive integer"),
            Violation::TooLarge { size, limit } => {
                write!(f, "message size ({} bytes) exceeds limit ({} bytes)", size, limit)
            }
        }
    }
}

/// Every violation found in one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: self.errors,
            })
        }
    }

    fn push(&mut self, violation: Violation) {
        self.errors.push(violation);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message: {}", join(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl From<Violation> for ValidationError {
    fn from(violation: Violation) -> Self {
        Self {
            violations: vec![violation],
        }
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A string field that is absent, `null`, not a string, or empty
fn missing_str<'a>(obj: &'a Value, field: &str) -> Option<&'a str> {
    match obj.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Validate an envelope object, collecting every violation
pub fn validate_envelope(envelope: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();
    check_envelope(envelope, &mut report);
    report
}

fn check_envelope(envelope: &Value, report: &mut ValidationReport) {
    if !envelope.is_object() {
        report.push(Violation::MissingField("envelope"));
        return;
    }

    if missing_str(envelope, "id").is_none() {
        report.push(Violation::MissingField("id"));
    }

    match envelope.get("type") {
        None | Some(Value::Null) => report.push(Violation::MissingField("type")),
        Some(Value::String(t)) if t.is_empty() => report.push(Violation::MissingField("type")),
        Some(Value::String(t)) => {
            if MessageType::parse(t).is_none() {
                report.push(Violation::InvalidType(t.clone()));
            }
        }
        Some(other) => report.push(Violation::InvalidType(other.to_string())),
    }

    for field in ["sender", "recipient", "timestamp"] {
        if missing_str(envelope, field).is_none() {
            report.push(Violation::MissingField(field));
        }
    }

    match missing_str(envelope, "version") {
        None => report.push(Violation::MissingField("version")),
        Some(v) if v != PROTOCOL_VERSION => {
            report.push(Violation::UnsupportedVersion(v.to_string()))
        }
        Some(_) => {}
    }

    // ttl is optional on the wire; when present it must be positive
    match envelope.get("ttl") {
        None | Some(Value::Null) => {}
        Some(ttl) => {
            if !ttl.as_u64().is_some_and(|ttl| ttl > 0) {
                report.push(Violation::InvalidTtl);
            }
        }
    }
}

/// Validate a full `{envelope, payload}` message, collecting every violation
pub fn validate_message(message: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !message.is_object() {
        report.push(Violation::NotAnObject);
        return report;
    }

    match message.get("envelope") {
        Some(envelope) => check_envelope(envelope, &mut report),
        None => report.push(Violation::MissingField("envelope")),
    }

    match message.get("payload") {
        Some(payload) if payload.is_object() => {
            if missing_str(payload, "intent").is_none() {
                report.push(Violation::MissingField("intent"));
            }
        }
        _ => report.push(Violation::MissingField("payload")),
    }

    let size = wire_size(message);
    if size > MAX_MESSAGE_SIZE {
        report.push(Violation::TooLarge {
            size,
            limit: MAX_MESSAGE_SIZE,
        });
    }

    report
}

/// Size of `value` in the reference wire encoding: `", "` and `": "`
/// separators with every character outside printable ASCII written as a
/// `\uXXXX` escape. The size limit is measured against this form.
pub fn wire_size(value: &Value) -> usize {
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, SpacedAsciiFormatter);
    match value.serialize(&mut serializer) {
        Ok(()) => buffer.len(),
        Err(_) => usize::MAX,
    }
}

struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        for c in fragment.chars() {
            if (' '..='~').contains(&c) {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}
