//! Incoming messages
//!
//! Every pending message goes through the same checks, in order: schema,
//! sender key lookup, signature, decryption, trust. The first failing check
//! decides the quarantine reason. Nothing is dropped: a message either lands
//! in history as `received` or in quarantine with the reason recorded.
//! Messages are not acknowledged automatically.
//!
//! A message whose record cannot be written is not handed out; it stays
//! pending at the relay and is processed again on the next poll.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use common::crypto::{verify_json, EncryptedPayload, PublicKey};
use common::envelope::{is_expired_value, signable_content, validate_message};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::watch;

use crate::outbox::DIRECTORY_LIMIT;
use crate::relay::{AgentInfo, PendingMessage, RelayClient, RelayError};
use crate::vault::{Direction, QuarantineReason, Vault, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxOptions {
    /// Check signatures (quarantining on failure)
    pub verify: bool,
    /// Open sealed payloads addressed to this vault
    pub decrypt: bool,
    /// Messages fetched per poll
    pub limit: u32,
}

impl Default for InboxOptions {
    fn default() -> Self {
        Self {
            verify: true,
            decrypt: true,
            limit: 50,
        }
    }
}

/// A processed incoming message
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    pub sender: String,
    pub sender_alias: Option<String>,
    pub received_at: Option<String>,
    /// The message exactly as delivered and signed
    pub message: Value,
    /// Decrypted payload when the message was sealed, otherwise the
    /// transmitted payload
    pub payload: Value,
    pub verified: bool,
    pub decrypted: bool,
    pub known_contact: bool,
    pub expired: bool,
    pub quarantine: Option<QuarantineReason>,
    /// Human-readable detail for the quarantine decision
    pub error: Option<String>,
}

impl InboundMessage {
    pub fn is_quarantined(&self) -> bool {
        self.quarantine.is_some()
    }

    pub fn intent(&self) -> Option<&str> {
        self.payload.get("intent").and_then(Value::as_str)
    }

    pub fn body(&self) -> Option<&Value> {
        self.payload.get("body")
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.message
            .get("envelope")
            .and_then(|e| e.get("correlation_id"))
            .and_then(Value::as_str)
    }
}

/// Receives messages handed out by [`Inbox::run`]
#[async_trait]
pub trait MessageHandler: Send {
    /// Return `true` to acknowledge the message at the relay. `false` leaves
    /// it pending and it is offered again on the next tick.
    async fn handle(&mut self, vault: &Vault, message: &InboundMessage) -> bool;
}

pub struct Inbox {
    client: RelayClient,
    options: InboxOptions,
    /// Returned by `poll_once` and not yet acknowledged or released
    handed_out: HashSet<String>,
    /// Outcome already written to the vault for each pending id
    recorded: HashMap<String, Option<QuarantineReason>>,
    /// Acknowledgements that failed in transit
    unacked: HashSet<String>,
    directory: HashMap<String, AgentInfo>,
}

impl Inbox {
    pub fn new(client: RelayClient, options: InboxOptions) -> Self {
        Self {
            client,
            options,
            handed_out: HashSet::new(),
            recorded: HashMap::new(),
            unacked: HashSet::new(),
            directory: HashMap::new(),
        }
    }

    pub fn client(&self) -> &RelayClient {
        &self.client
    }

    /// Fetch and process whatever is pending
    ///
    /// Messages already handed out are skipped until they are acknowledged
    /// or [released](Inbox::release). A message that fails to process is
    /// logged and left for the next poll.
    pub async fn poll_once(&mut self, vault: &Vault) -> Result<Vec<InboundMessage>, RelayError> {
        let pending = self.client.receive(vault, self.options.limit).await?;
        if pending.len() < self.options.limit as usize {
            // the relay returned its whole queue; forget ids no longer in it
            let live: HashSet<&str> = pending.iter().map(|p| p.message_id.as_str()).collect();
            self.handed_out.retain(|id| live.contains(id.as_str()));
            self.recorded.retain(|id, _| live.contains(id.as_str()));
            self.unacked.retain(|id| live.contains(id.as_str()));
        }

        let mut processed = Vec::new();
        let mut directory_refreshed = false;
        for item in pending {
            if self.handed_out.contains(&item.message_id) {
                continue;
            }
            let message_id = item.message_id.clone();
            let result = match self.process(vault, item, &mut directory_refreshed).await {
                Ok(inbound) => self.record(vault, &inbound).map(|()| inbound),
                Err(e) => Err(e),
            };
            match result {
                Ok(inbound) => {
                    self.handed_out.insert(message_id);
                    processed.push(inbound);
                }
                Err(e) => {
                    tracing::warn!(%message_id, "could not process message, leaving it pending: {}", e)
                }
            }
        }

        Ok(processed)
    }

    /// Offer a handed-out message again on the next poll
    pub fn release(&mut self, message_id: &str) {
        self.handed_out.remove(message_id);
    }

    async fn process(
        &mut self,
        vault: &Vault,
        item: PendingMessage,
        directory_refreshed: &mut bool,
    ) -> Result<InboundMessage, VaultError> {
        let envelope_sender = item
            .message
            .get("envelope")
            .and_then(|e| e.get("sender"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let sender = envelope_sender
            .clone()
            .or_else(|| item.sender.clone())
            .unwrap_or_default();

        let mut inbound = InboundMessage {
            message_id: item.message_id.clone(),
            sender: sender.clone(),
            sender_alias: None,
            received_at: item.received_at.clone(),
            payload: item.message.get("payload").cloned().unwrap_or(Value::Null),
            expired: is_expired_value(&item.message),
            message: item.message,
            verified: false,
            decrypted: false,
            known_contact: false,
            quarantine: None,
            error: None,
        };

        let contacts = vault.contacts()?;
        let contact = contacts.contacts.get(&sender);
        inbound.known_contact = contact.is_some();
        inbound.sender_alias = contact.and_then(|c| c.alias.clone());

        let report = validate_message(&inbound.message);
        if let Err(e) = report.into_result() {
            return Ok(quarantined(inbound, QuarantineReason::InvalidEnvelope, e.to_string()));
        }
        if let (Some(relay_sender), Some(envelope_sender)) = (&item.sender, &envelope_sender) {
            if relay_sender != envelope_sender {
                let detail = format!(
                    "relay sender {} does not match envelope sender {}",
                    relay_sender, envelope_sender
                );
                return Ok(quarantined(inbound, QuarantineReason::InvalidEnvelope, detail));
            }
        }

        let mut sender_key: Option<PublicKey> = contact.and_then(|c| c.signing_public_key);
        if sender_key.is_none() || inbound.sender_alias.is_none() {
            if let Some(agent) = self.lookup_agent(&sender, directory_refreshed).await {
                sender_key = sender_key.or(Some(agent.signing_public_key));
                inbound.sender_alias = inbound.sender_alias.or(agent.alias);
            }
        }

        if self.options.verify {
            let key = match sender_key {
                Some(key) => key,
                None => {
                    let detail = format!("no signing key known for {}", sender);
                    return Ok(quarantined(inbound, QuarantineReason::UnknownSenderKey, detail));
                }
            };
            // validated above, so both halves are present
            let signable = signable_content(&inbound.message).unwrap_or(Value::Null);
            if let Err(e) = verify_json(&key, &signable, &item.signature) {
                return Ok(quarantined(inbound, QuarantineReason::InvalidSignature, e.to_string()));
            }
            inbound.verified = true;
        }

        if let (true, Some(sealed)) = (self.options.decrypt, item.encrypted_payload) {
            let opened = serde_json::from_value::<EncryptedPayload>(sealed)
                .map_err(|e| e.to_string())
                .and_then(|sealed| vault.decrypt(&sealed).map_err(|e| e.to_string()));
            match opened {
                Ok(payload) => {
                    inbound.payload = payload;
                    inbound.decrypted = true;
                }
                Err(detail) => {
                    return Ok(quarantined(inbound, QuarantineReason::DecryptionFailed, detail));
                }
            }
        }

        if contacts.quarantine_unknown && !inbound.known_contact {
            let detail = format!("{} is not a contact", sender);
            return Ok(quarantined(inbound, QuarantineReason::UnknownSender, detail));
        }

        Ok(inbound)
    }

    /// Write the history or quarantine record, once per outcome
    fn record(&mut self, vault: &Vault, inbound: &InboundMessage) -> Result<(), VaultError> {
        if self.recorded.get(&inbound.message_id) == Some(&inbound.quarantine) {
            return Ok(());
        }

        match inbound.quarantine {
            Some(reason) => {
                vault.save_to_quarantine(&inbound.message, reason, inbound.error.clone())?;
                tracing::warn!(
                    message_id = %inbound.message_id,
                    sender = %inbound.sender,
                    %reason,
                    "quarantined message: {}",
                    inbound.error.as_deref().unwrap_or_default()
                );
            }
            None => {
                vault.save_message(&inbound.message, Direction::Received)?;
                tracing::info!(
                    message_id = %inbound.message_id,
                    sender = %inbound.sender,
                    verified = inbound.verified,
                    decrypted = inbound.decrypted,
                    "received message"
                );
            }
        }

        self.recorded
            .insert(inbound.message_id.clone(), inbound.quarantine);
        Ok(())
    }

    /// Directory entry for `vault_id`, refreshing the cache at most once per
    /// poll. A failed refresh is logged and treated as "unknown".
    async fn lookup_agent(&mut self, vault_id: &str, refreshed: &mut bool) -> Option<AgentInfo> {
        if !self.directory.contains_key(vault_id) && !*refreshed {
            *refreshed = true;
            match self.client.list_agents(DIRECTORY_LIMIT).await {
                Ok(agents) => {
                    for agent in agents {
                        self.directory.insert(agent.vault_id.clone(), agent);
                    }
                }
                Err(e) => tracing::warn!("agent directory lookup failed: {}", e),
            }
        }
        self.directory.get(vault_id).cloned()
    }

    /// Remove a message from the relay's pending queue
    pub async fn acknowledge(&mut self, vault: &Vault, message_id: &str) -> Result<(), RelayError> {
        self.client.acknowledge(vault, message_id).await?;
        self.forget(message_id);
        tracing::debug!(%message_id, "acknowledged message");
        Ok(())
    }

    fn forget(&mut self, message_id: &str) {
        self.handed_out.remove(message_id);
        self.recorded.remove(message_id);
        self.unacked.remove(message_id);
    }

    /// Acknowledge, keeping the id for a later retry when the relay could
    /// not be reached. A 404 means the relay no longer holds the message.
    async fn settle(&mut self, vault: &Vault, message_id: &str) -> Result<(), RelayError> {
        match self.acknowledge(vault, message_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                tracing::warn!(%message_id, "ack failed, will retry: {}", e);
                self.unacked.insert(message_id.to_string());
                Ok(())
            }
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {
                tracing::debug!(%message_id, "message already gone from relay");
                self.forget(message_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Poll every `interval` until `shutdown` fires, handing each new message
    /// to `handler`
    ///
    /// Transient relay failures are logged and retried on the next tick,
    /// including acknowledgements; any other error ends the loop.
    pub async fn run<H: MessageHandler>(
        &mut self,
        vault: &Vault,
        interval: Duration,
        mut shutdown: watch::Receiver<()>,
        handler: &mut H,
    ) -> Result<(), RelayError> {
        tracing::info!(vault_id = %vault.vault_id(), ?interval, "polling for messages");
        loop {
            let retries: Vec<String> = self.unacked.iter().cloned().collect();
            for message_id in retries {
                self.settle(vault, &message_id).await?;
            }

            match self.poll_once(vault).await {
                Ok(messages) => {
                    for message in messages {
                        if handler.handle(vault, &message).await {
                            self.settle(vault, &message.message_id).await?;
                        } else {
                            self.release(&message.message_id);
                        }
                    }
                }
                Err(e) if e.is_transient() => tracing::warn!("poll failed: {}", e),
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("stopping message polling");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

fn quarantined(mut inbound: InboundMessage, reason: QuarantineReason, detail: String) -> InboundMessage {
    inbound.quarantine = Some(reason);
    inbound.error = Some(detail);
    inbound
}
