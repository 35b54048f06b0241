use std::time::Duration;

use common::crypto::EncryptedPayload;
use common::envelope::Message;
use reqwest::{header::HeaderMap, header::HeaderValue, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::api::*;
use super::error::RelayError;
use crate::config::Config;
use crate::vault::{normalize_relay_url, Vault};

pub const X_VAULT_ID: &str = "X-Vault-ID";
pub const X_SIGNATURE: &str = "X-Signature";

/// Result of asking for a registration challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Challenge(String),
    AlreadyRegistered,
}

/// Result of submitting a signed challenge
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    Registered(RegisterResponse),
    AlreadyRegistered,
}

/// HTTP client for a store-and-forward relay
#[derive(Debug, Clone)]
pub struct RelayClient {
    pub remote: Url,
    client: Client,
}

impl RelayClient {
    pub fn new(config: &Config) -> Result<Self, RelayError> {
        let remote = config
            .relay()
            .map_err(|e| RelayError::Url(e.to_string()))?;
        Self::with_url(&remote, config.timeout())
    }

    pub fn with_url(remote: &Url, timeout: Duration) -> Result<Self, RelayError> {
        if remote.cannot_be_a_base() {
            return Err(RelayError::Url(remote.to_string()));
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }

    /// Key under which this relay's registration state is stored in a vault
    pub fn relay_key(&self) -> String {
        normalize_relay_url(self.remote.as_str())
    }

    pub async fn call<T: RelayRequest>(&self, request: T) -> Result<T::Response, RelayError> {
        let builder = request.build_request(&self.remote, &self.client)?;
        self.execute(builder).await
    }

    /// Call an endpoint that authenticates the caller by signature
    ///
    /// The signature covers the canonical JSON of the request body.
    pub async fn call_signed<T: RelayRequest>(
        &self,
        vault: &Vault,
        request: T,
    ) -> Result<T::Response, RelayError> {
        let signature = vault.sign(&request)?;
        let builder = request
            .build_request(&self.remote, &self.client)?
            .header(X_VAULT_ID, vault.vault_id())
            .header(X_SIGNATURE, signature);
        self.execute(builder).await
    }

    async fn execute<R: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<R, RelayError> {
        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().path().to_string();
        let bytes = response.bytes().await?;
        tracing::debug!(%status, path = %url, len = bytes.len(), "relay response");

        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(|e| RelayError::Decode(e.to_string()));
        }

        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
        let message = body.error.unwrap_or_else(|| {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            if text.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                text
            }
        });

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RelayError::Authentication {
                status,
                message,
                code: body.code,
            },
            _ => RelayError::Server {
                status,
                message,
                code: body.code,
            },
        })
    }

    /// Step one of registration: a challenge bound to the vault's keys
    pub async fn request_challenge(&self, vault: &Vault) -> Result<ChallengeOutcome, RelayError> {
        let request = ChallengeRequest {
            vault_id: vault.vault_id().to_string(),
            signing_public_key: vault.signing_public_key(),
            encryption_public_key: vault.encryption_public_key(),
        };
        match self.call(request).await {
            Ok(response) => Ok(ChallengeOutcome::Challenge(response.challenge)),
            Err(e) if e.is_already_registered() => Ok(ChallengeOutcome::AlreadyRegistered),
            Err(e) => Err(e),
        }
    }

    /// Sign `challenge` with the vault and complete registration
    pub async fn register(
        &self,
        vault: &Vault,
        challenge: &str,
        alias: Option<&str>,
    ) -> Result<RegisterOutcome, RelayError> {
        let request = RegisterRequest {
            vault_id: vault.vault_id().to_string(),
            signing_public_key: vault.signing_public_key(),
            encryption_public_key: vault.encryption_public_key(),
            challenge: challenge.to_string(),
            challenge_signature: vault.sign_challenge(challenge),
            alias: alias.map(str::to_string),
        };
        match self.call(request).await {
            Ok(response) => Ok(RegisterOutcome::Registered(response)),
            Err(e) if e.is_already_registered() => Ok(RegisterOutcome::AlreadyRegistered),
            Err(e) => Err(e),
        }
    }

    pub async fn send_message(
        &self,
        vault: &Vault,
        message: Message,
        signature: String,
        encrypted_payload: Option<EncryptedPayload>,
    ) -> Result<SendResponse, RelayError> {
        let request = SendRequest {
            message,
            signature,
            encrypted_payload,
        };
        self.call_signed(vault, request).await
    }

    /// Pending messages for this vault; they stay pending until acknowledged
    pub async fn receive(&self, vault: &Vault, limit: u32) -> Result<Vec<PendingMessage>, RelayError> {
        let request = ReceiveRequest {
            vault_id: vault.vault_id().to_string(),
            limit,
        };
        Ok(self.call(request).await?.messages)
    }

    pub async fn acknowledge(&self, vault: &Vault, message_id: &str) -> Result<AckResponse, RelayError> {
        let request = AckRequest {
            message_id: message_id.to_string(),
            vault_id: vault.vault_id().to_string(),
        };
        self.call_signed(vault, request).await
    }

    pub async fn list_agents(&self, limit: u32) -> Result<Vec<AgentInfo>, RelayError> {
        Ok(self.call(ListAgentsRequest { limit }).await?.agents)
    }

    pub async fn resolve_alias(&self, alias: &str) -> Result<AgentInfo, RelayError> {
        self.call(ResolveAliasRequest {
            alias: alias.to_string(),
        })
        .await
    }

    pub async fn set_alias(&self, vault: &Vault, alias: &str) -> Result<SetAliasResponse, RelayError> {
        let request = SetAliasRequest {
            vault_id: vault.vault_id().to_string(),
            alias: alias.to_string(),
        };
        self.call_signed(vault, request).await
    }

    pub async fn health(&self) -> Result<Value, RelayError> {
        self.call(HealthRequest).await
    }

    pub async fn conversation_log(&self, conversation_id: &str) -> Result<Value, RelayError> {
        self.call(ConversationLogRequest {
            conversation_id: conversation_id.to_string(),
        })
        .await
    }

    pub async fn agent_logs(&self, vault: &Vault, limit: u32) -> Result<Value, RelayError> {
        self.call(AgentLogsRequest {
            vault_id: vault.vault_id().to_string(),
            limit,
        })
        .await
    }
}
