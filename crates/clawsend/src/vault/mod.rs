//! The vault is the agent's identity on disk
//!
//! Layout of a vault directory:
//!
//! ```text
//! identity.json        vault id, alias, public keys, per-relay registration
//! signing_key.bin      32 raw bytes, owner-only
//! encryption_key.bin   32 raw bytes, owner-only
//! contacts.json        trust list and the quarantine flag
//! history/             one record per sent or received message
//! quarantine/          one record per rejected inbound message
//! ```
//!
//! Private keys are only ever held by [`Vault`] itself; nothing it exports or
//! logs contains them. A vault directory has a single writer: mutations are
//! read-modify-write on whole files, replaced atomically, with no locking
//! across processes.

mod contacts;
mod records;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use common::crypto::{
    sign_challenge, sign_json, CryptoError, EncryptedPayload, EncryptionPublicKey,
    EncryptionSecretKey, PublicKey, SecretKey,
};
use common::envelope::{now_timestamp, Message};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use zeroize::Zeroizing;

pub use contacts::{Contact, ContactList, ContactUpdate};
pub use records::{Direction, HistoryRecord, QuarantineReason, QuarantineRecord};

pub const DEFAULT_VAULT_DIR: &str = ".openclaw/vault";
pub const IDENTITY_FILE: &str = "identity.json";
pub const SIGNING_KEY_FILE: &str = "signing_key.bin";
pub const ENCRYPTION_KEY_FILE: &str = "encryption_key.bin";
pub const CONTACTS_FILE: &str = "contacts.json";
pub const HISTORY_DIR: &str = "history";
pub const QUARANTINE_DIR: &str = "quarantine";

/// Registration state for one relay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub registered_at: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Contents of `identity.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub vault_id: String,
    #[serde(default)]
    pub alias: Option<String>,
    pub signing_public_key: PublicKey,
    pub encryption_public_key: EncryptionPublicKey,
    pub created_at: String,
    /// Keyed by normalized relay URL
    #[serde(default)]
    pub servers: BTreeMap<String, ServerState>,
}

/// The part of an identity meant to be handed to other agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub vault_id: String,
    pub alias: Option<String>,
    pub signing_public_key: PublicKey,
    pub encryption_public_key: EncryptionPublicKey,
}

#[derive(Debug)]
pub struct Vault {
    dir: PathBuf,
    identity: Identity,
    signing_key: SecretKey,
    encryption_key: EncryptionSecretKey,
}

impl Vault {
    /// Get the vault directory path (custom or default ~/.openclaw/vault)
    pub fn vault_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, VaultError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(VaultError::NoHomeDirectory)?;
        Ok(home.join(DEFAULT_VAULT_DIR))
    }

    /// Whether a vault (an identity record) exists in `dir`
    pub fn exists(dir: &Path) -> bool {
        dir.join(IDENTITY_FILE).exists()
    }

    /// Create a new vault with fresh keypairs
    pub fn create(custom_path: Option<PathBuf>, alias: Option<String>) -> Result<Self, VaultError> {
        let dir = Self::vault_dir(custom_path)?;
        if Self::exists(&dir) {
            return Err(VaultError::AlreadyExists(dir));
        }

        fs::create_dir_all(&dir)?;
        fs::create_dir_all(dir.join(HISTORY_DIR))?;
        fs::create_dir_all(dir.join(QUARANTINE_DIR))?;

        let signing_key = SecretKey::generate();
        let encryption_key = EncryptionSecretKey::generate();

        let identity = Identity {
            vault_id: format!("vault_{}", Uuid::new_v4().simple()),
            alias,
            signing_public_key: signing_key.public(),
            encryption_public_key: encryption_key.public(),
            created_at: now_timestamp(),
            servers: BTreeMap::new(),
        };

        write_atomic(&dir.join(SIGNING_KEY_FILE), &signing_key.to_bytes()[..], true)?;
        write_atomic(
            &dir.join(ENCRYPTION_KEY_FILE),
            &encryption_key.to_bytes()[..],
            true,
        )?;
        write_json(&dir.join(CONTACTS_FILE), &ContactList::default())?;
        // identity last: until it exists the vault does not
        write_json(&dir.join(IDENTITY_FILE), &identity)?;

        tracing::info!(
            vault_id = %identity.vault_id,
            dir = %dir.display(),
            "created vault"
        );

        Ok(Self {
            dir,
            identity,
            signing_key,
            encryption_key,
        })
    }

    /// Load an existing vault
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, VaultError> {
        let dir = Self::vault_dir(custom_path)?;
        if !Self::exists(&dir) {
            return Err(VaultError::NotFound(dir));
        }

        let identity: Identity = read_json(&dir.join(IDENTITY_FILE))?;

        let signing_bytes = read_key_file(&dir, SIGNING_KEY_FILE)?;
        let signing_key = SecretKey::from_bytes(&signing_bytes)
            .map_err(|e| VaultError::InvalidKey(format!("{}: {}", SIGNING_KEY_FILE, e)))?;
        let encryption_bytes = read_key_file(&dir, ENCRYPTION_KEY_FILE)?;
        let encryption_key = EncryptionSecretKey::from_bytes(&encryption_bytes)
            .map_err(|e| VaultError::InvalidKey(format!("{}: {}", ENCRYPTION_KEY_FILE, e)))?;

        if signing_key.public() != identity.signing_public_key {
            return Err(VaultError::InvalidKey(format!(
                "{} does not match the identity's signing public key",
                SIGNING_KEY_FILE
            )));
        }
        if encryption_key.public() != identity.encryption_public_key {
            return Err(VaultError::InvalidKey(format!(
                "{} does not match the identity's encryption public key",
                ENCRYPTION_KEY_FILE
            )));
        }

        tracing::debug!(vault_id = %identity.vault_id, "loaded vault");

        Ok(Self {
            dir,
            identity,
            signing_key,
            encryption_key,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn vault_id(&self) -> &str {
        &self.identity.vault_id
    }

    pub fn alias(&self) -> Option<&str> {
        self.identity.alias.as_deref()
    }

    pub fn signing_public_key(&self) -> PublicKey {
        self.identity.signing_public_key
    }

    pub fn encryption_public_key(&self) -> EncryptionPublicKey {
        self.identity.encryption_public_key
    }

    pub fn export_public_identity(&self) -> PublicIdentity {
        PublicIdentity {
            vault_id: self.identity.vault_id.clone(),
            alias: self.identity.alias.clone(),
            signing_public_key: self.identity.signing_public_key,
            encryption_public_key: self.identity.encryption_public_key,
        }
    }

    /// Sign the canonical JSON form of `data`
    pub fn sign<T: Serialize + ?Sized>(&self, data: &T) -> Result<String, VaultError> {
        Ok(sign_json(&self.signing_key, data)?)
    }

    /// Sign a message's `{envelope, payload}`
    pub fn sign_message(&self, message: &Message) -> Result<String, VaultError> {
        self.sign(&message.signable())
    }

    pub fn sign_challenge(&self, challenge: &str) -> String {
        sign_challenge(&self.signing_key, challenge)
    }

    /// Open a payload sealed to this vault's encryption key
    pub fn decrypt(&self, encrypted: &EncryptedPayload) -> Result<Value, CryptoError> {
        encrypted.open_json(&self.encryption_key)
    }

    pub fn get_server_state(&self, relay_url: &str) -> Option<&ServerState> {
        self.identity.servers.get(&normalize_relay_url(relay_url))
    }

    pub fn is_registered(&self, relay_url: &str) -> bool {
        self.get_server_state(relay_url)
            .is_some_and(|state| state.registered)
    }

    /// Record registration state for a relay
    ///
    /// The identity record is re-read from disk, the one entry replaced, and
    /// the whole record written back atomically.
    pub fn set_server_state(&mut self, relay_url: &str, state: ServerState) -> Result<(), VaultError> {
        let path = self.dir.join(IDENTITY_FILE);
        let mut identity: Identity = read_json(&path)?;
        if identity.vault_id != self.identity.vault_id {
            return Err(VaultError::InvalidKey(format!(
                "{} now belongs to {}",
                IDENTITY_FILE, identity.vault_id
            )));
        }
        identity
            .servers
            .insert(normalize_relay_url(relay_url), state);
        write_json(&path, &identity)?;
        self.identity = identity;
        Ok(())
    }
}

/// Relay URLs are compared without trailing slashes
pub fn normalize_relay_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn read_key_file(dir: &Path, name: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let path = dir.join(name);
    if !path.exists() {
        return Err(VaultError::MissingFile(name.to_string()));
    }
    Ok(Zeroizing::new(fs::read(path)?))
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, VaultError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), VaultError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes, false)
}

/// Replace `path` via a temporary file in the same directory
fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> Result<(), VaultError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    if private {
        restrict_permissions(file.path())?;
    }
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| VaultError::Io(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("no vault found at {0}")]
    NotFound(PathBuf),
    #[error("vault already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("could not determine home directory")]
    NoHomeDirectory,
    #[error("missing required file: {0}")]
    MissingFile(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
