use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use common::envelope::now_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{read_json, Vault, VaultError, HISTORY_DIR, QUARANTINE_DIR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an inbound message was set aside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    /// Verified, but the sender is not a contact
    UnknownSender,
    /// No signing key could be found for the sender
    UnknownSenderKey,
    InvalidSignature,
    DecryptionFailed,
    InvalidEnvelope,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::UnknownSender => "unknown_sender",
            QuarantineReason::UnknownSenderKey => "unknown_sender_key",
            QuarantineReason::InvalidSignature => "invalid_signature",
            QuarantineReason::DecryptionFailed => "decryption_failed",
            QuarantineReason::InvalidEnvelope => "invalid_envelope",
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub direction: Direction,
    pub saved_at: String,
    pub message: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub reason: QuarantineReason,
    pub quarantined_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub message: Value,
}

impl Vault {
    /// Append a message to history
    pub fn save_message<T: Serialize + ?Sized>(
        &self,
        message: &T,
        direction: Direction,
    ) -> Result<PathBuf, VaultError> {
        let message = serde_json::to_value(message)?;
        let saved_at = now_timestamp();
        let name = record_file_name(&saved_at, direction.as_str(), &message);
        let record = HistoryRecord {
            direction,
            saved_at,
            message,
        };
        let path = self.dir.join(HISTORY_DIR).join(name);
        write_new_record(&path, &record)?;
        tracing::debug!(path = %path.display(), %direction, "saved message to history");
        Ok(path)
    }

    /// Append a rejected inbound message to the quarantine log
    pub fn save_to_quarantine<T: Serialize + ?Sized>(
        &self,
        message: &T,
        reason: QuarantineReason,
        detail: Option<String>,
    ) -> Result<PathBuf, VaultError> {
        let message = serde_json::to_value(message)?;
        let quarantined_at = now_timestamp();
        let name = record_file_name(&quarantined_at, reason.as_str(), &message);
        let record = QuarantineRecord {
            reason,
            quarantined_at,
            detail,
            message,
        };
        let path = self.dir.join(QUARANTINE_DIR).join(name);
        write_new_record(&path, &record)?;
        tracing::warn!(path = %path.display(), %reason, "quarantined message");
        Ok(path)
    }

    /// Up to `limit` history records, newest first
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryRecord>, VaultError> {
        read_records(&self.dir.join(HISTORY_DIR), limit)
    }

    /// Up to `limit` quarantine records, newest first
    pub fn quarantined(&self, limit: usize) -> Result<Vec<QuarantineRecord>, VaultError> {
        read_records(&self.dir.join(QUARANTINE_DIR), limit)
    }
}

/// `<timestamp>_<tag>_<message id>.json`, safe on every filesystem
fn record_file_name(timestamp: &str, tag: &str, message: &Value) -> String {
    let id = message
        .get("envelope")
        .and_then(|e| e.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(sanitize)
        .unwrap_or_else(|| format!("unknown_{}", Uuid::new_v4().simple()));
    format!("{}_{}_{}.json", timestamp.replace(':', "-"), tag, id)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .take(128)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Records are never overwritten
fn write_new_record<T: Serialize>(path: &Path, record: &T) -> Result<(), VaultError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(record)?;
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(&bytes)?;
    Ok(())
}

fn read_records<T: serde::de::DeserializeOwned>(dir: &Path, limit: usize) -> Result<Vec<T>, VaultError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    // timestamp-prefixed names sort chronologically
    paths.sort();
    paths.reverse();

    let mut records = Vec::new();
    for path in paths {
        if records.len() >= limit {
            break;
        }
        match read_json(&path) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable record: {}", e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod test {
    use common::envelope::Message;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn vault(dir: &TempDir) -> Vault {
        Vault::create(Some(dir.path().to_path_buf()), None).unwrap()
    }

    #[test]
    fn test_save_message_file_name() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let message = Message::request("a", "b", "ping", json!({}));

        let path = vault.save_message(&message, Direction::Sent).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(&format!("_sent_{}.json", message.id())));
        assert!(!name.contains(':'));

        let record: HistoryRecord = read_json(&path).unwrap();
        assert_eq!(record.direction, Direction::Sent);
        assert_eq!(record.message["envelope"]["id"], message.id());
    }

    #[test]
    fn test_hostile_ids_are_sanitized() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let message = json!({ "envelope": { "id": "../../etc/passwd" } });

        let path = vault
            .save_to_quarantine(&message, QuarantineReason::InvalidEnvelope, None)
            .unwrap();
        assert_eq!(path.parent().unwrap(), dir.path().join(QUARANTINE_DIR));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_invalid_envelope_______etc_passwd.json"));
    }

    #[test]
    fn test_missing_id_gets_placeholder() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let path = vault
            .save_to_quarantine(&json!("garbage"), QuarantineReason::InvalidEnvelope, None)
            .unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .contains("_invalid_envelope_unknown_"));
    }

    #[test]
    fn test_history_newest_first_with_limit() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let message = Message::request("a", "b", "ping", json!({}));
            ids.push(message.id().to_string());
            vault.save_message(&message, Direction::Received).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let records = vault.history(2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message["envelope"]["id"], ids[2]);
        assert_eq!(records[1].message["envelope"]["id"], ids[1]);
    }

    #[test]
    fn test_unreadable_records_skipped() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault
            .save_to_quarantine(
                &json!({ "envelope": { "id": "msg_1" } }),
                QuarantineReason::UnknownSender,
                Some("not a contact".to_string()),
            )
            .unwrap();
        fs::write(dir.path().join(QUARANTINE_DIR).join("zzzz.json"), "{").unwrap();

        let records = vault.quarantined(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, QuarantineReason::UnknownSender);
        assert_eq!(records[0].detail.as_deref(), Some("not a contact"));
    }

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(QuarantineReason::UnknownSenderKey).unwrap(),
            json!("unknown_sender_key")
        );
        assert_eq!(QuarantineReason::DecryptionFailed.to_string(), "decryption_failed");
    }
}
