//! Outgoing messages: validate, optionally seal, sign, send, record
//!
//! When a payload is sealed the whole payload object is encrypted to the
//! recipient and the transmitted body becomes `{"_encrypted": true}`. The
//! signature is always computed last, over what is actually sent.

use common::crypto::{EncryptedPayload, EncryptionPublicKey};
use common::envelope::{Message, Payload};
use reqwest::StatusCode;

use crate::relay::{AgentInfo, RelayClient, RelayError, SendResponse};
use crate::vault::{Direction, Vault};

/// Agents fetched when falling back to a directory scan
pub const DIRECTORY_LIMIT: u32 = 500;

/// A message ready for the relay
#[derive(Debug, Clone)]
pub struct PreparedMessage {
    pub message: Message,
    pub signature: String,
    pub encrypted_payload: Option<EncryptedPayload>,
}

impl PreparedMessage {
    pub fn is_encrypted(&self) -> bool {
        self.encrypted_payload.is_some()
    }
}

/// Validate, optionally seal to `recipient_key`, and sign
///
/// Invalid messages fail here, before anything touches the network.
pub fn prepare(
    vault: &Vault,
    mut message: Message,
    recipient_key: Option<&EncryptionPublicKey>,
) -> Result<PreparedMessage, RelayError> {
    message.validate()?;

    let encrypted_payload = match recipient_key {
        Some(key) => {
            let sealed = EncryptedPayload::seal_json(key, &message.payload)?;
            message.payload.body = Payload::encrypted_placeholder();
            Some(sealed)
        }
        None => None,
    };

    let signature = vault.sign_message(&message)?;
    Ok(PreparedMessage {
        message,
        signature,
        encrypted_payload,
    })
}

/// Transmit a prepared message and record it as sent
///
/// History is only written once the relay has accepted the message.
pub async fn send(
    vault: &Vault,
    client: &RelayClient,
    prepared: PreparedMessage,
) -> Result<SendResponse, RelayError> {
    let PreparedMessage {
        message,
        signature,
        encrypted_payload,
    } = prepared;
    let encrypted = encrypted_payload.is_some();

    let response = client
        .send_message(vault, message.clone(), signature, encrypted_payload)
        .await?;
    vault.save_message(&message, Direction::Sent)?;

    tracing::info!(
        message_id = %response.message_id,
        recipient = %message.envelope.recipient,
        intent = %message.payload.intent,
        encrypted,
        "message sent"
    );
    Ok(response)
}

/// Look a recipient up by alias, then by vault id in the agent directory
pub async fn resolve_recipient(client: &RelayClient, recipient: &str) -> Result<AgentInfo, RelayError> {
    match client.resolve_alias(recipient).await {
        Ok(agent) => return Ok(agent),
        Err(e) if e.is_transient() => return Err(e),
        Err(e) => tracing::debug!(%recipient, "alias lookup failed, scanning directory: {}", e),
    }

    client
        .list_agents(DIRECTORY_LIMIT)
        .await?
        .into_iter()
        .find(|agent| agent.vault_id == recipient)
        .ok_or_else(|| RelayError::Server {
            status: StatusCode::NOT_FOUND,
            message: format!("cannot resolve recipient: {}", recipient),
            code: Some("recipient_not_found".to_string()),
        })
}

/// Prepare and send in one step, resolving the recipient's key when
/// `encrypt` is set
pub async fn deliver(
    vault: &Vault,
    client: &RelayClient,
    message: Message,
    encrypt: bool,
) -> Result<SendResponse, RelayError> {
    let recipient_key = if encrypt {
        let agent = resolve_recipient(client, &message.envelope.recipient).await?;
        Some(agent.encryption_public_key)
    } else {
        None
    };
    let prepared = prepare(vault, message, recipient_key.as_ref())?;
    send(vault, client, prepared).await
}
