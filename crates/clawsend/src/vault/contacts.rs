use std::collections::BTreeMap;

use common::crypto::{EncryptionPublicKey, PublicKey};
use common::envelope::now_timestamp;
use serde::{Deserialize, Serialize};

use super::{read_json, write_json, Vault, VaultError, CONTACTS_FILE};

/// A trusted agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub vault_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_public_key: Option<PublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_public_key: Option<EncryptionPublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub added_at: String,
    pub updated_at: String,
}

/// Contents of `contacts.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactList {
    #[serde(default)]
    pub contacts: BTreeMap<String, Contact>,
    /// Quarantine messages from senders not in `contacts`
    #[serde(default = "default_quarantine_unknown")]
    pub quarantine_unknown: bool,
}

fn default_quarantine_unknown() -> bool {
    true
}

impl Default for ContactList {
    fn default() -> Self {
        Self {
            contacts: BTreeMap::new(),
            quarantine_unknown: default_quarantine_unknown(),
        }
    }
}

/// Fields to set on a contact; `None` leaves the stored value alone
#[derive(Debug, Clone, Default)]
pub struct ContactUpdate {
    pub alias: Option<String>,
    pub signing_public_key: Option<PublicKey>,
    pub encryption_public_key: Option<EncryptionPublicKey>,
    pub notes: Option<String>,
}

impl ContactUpdate {
    pub fn with_keys(signing_public_key: PublicKey, encryption_public_key: EncryptionPublicKey) -> Self {
        Self {
            signing_public_key: Some(signing_public_key),
            encryption_public_key: Some(encryption_public_key),
            ..Self::default()
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl Vault {
    /// The full contact list; defaults when the file is missing
    pub fn contacts(&self) -> Result<ContactList, VaultError> {
        let path = self.dir.join(CONTACTS_FILE);
        if !path.exists() {
            return Ok(ContactList::default());
        }
        read_json(&path)
    }

    fn save_contacts(&self, contacts: &ContactList) -> Result<(), VaultError> {
        write_json(&self.dir.join(CONTACTS_FILE), contacts)
    }

    /// Insert a contact, or merge `update` into an existing one
    ///
    /// `added_at` is kept from the first insert; `updated_at` is refreshed.
    pub fn add_contact(&self, vault_id: &str, update: ContactUpdate) -> Result<Contact, VaultError> {
        let mut list = self.contacts()?;
        let now = now_timestamp();

        let contact = list
            .contacts
            .entry(vault_id.to_string())
            .or_insert_with(|| Contact {
                vault_id: vault_id.to_string(),
                alias: None,
                signing_public_key: None,
                encryption_public_key: None,
                notes: None,
                added_at: now.clone(),
                updated_at: now.clone(),
            });

        contact.updated_at = now;
        if update.alias.is_some() {
            contact.alias = update.alias;
        }
        if update.signing_public_key.is_some() {
            contact.signing_public_key = update.signing_public_key;
        }
        if update.encryption_public_key.is_some() {
            contact.encryption_public_key = update.encryption_public_key;
        }
        if update.notes.is_some() {
            contact.notes = update.notes;
        }

        let contact = contact.clone();
        self.save_contacts(&list)?;
        tracing::info!(contact = %vault_id, "saved contact");
        Ok(contact)
    }

    /// Returns whether a contact was removed
    pub fn remove_contact(&self, vault_id: &str) -> Result<bool, VaultError> {
        let mut list = self.contacts()?;
        if list.contacts.remove(vault_id).is_none() {
            return Ok(false);
        }
        self.save_contacts(&list)?;
        tracing::info!(contact = %vault_id, "removed contact");
        Ok(true)
    }

    pub fn get_contact(&self, vault_id: &str) -> Result<Option<Contact>, VaultError> {
        Ok(self.contacts()?.contacts.remove(vault_id))
    }

    pub fn is_known_contact(&self, vault_id: &str) -> Result<bool, VaultError> {
        Ok(self.contacts()?.contacts.contains_key(vault_id))
    }

    pub fn set_quarantine_unknown(&self, enabled: bool) -> Result<(), VaultError> {
        let mut list = self.contacts()?;
        list.quarantine_unknown = enabled;
        self.save_contacts(&list)
    }

    /// Whether a message from `sender` belongs in quarantine
    pub fn should_quarantine(&self, sender: &str) -> Result<bool, VaultError> {
        let list = self.contacts()?;
        Ok(list.quarantine_unknown && !list.contacts.contains_key(sender))
    }
}
