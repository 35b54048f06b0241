//! Relay wire types
//!
//! Each request type knows how to build its own HTTP request, the same way
//! for every endpoint: `RelayRequest::build_request` resolves the path
//! against the relay base URL and attaches the query or body.

use common::crypto::{EncryptedPayload, EncryptionPublicKey, PublicKey};
use common::envelope::Message;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::RelayError;

/// A relay endpoint call
///
/// The request value itself is the body that gets signed for endpoints that
/// require `X-Signature`, so path parameters are `#[serde(skip)]`.
pub trait RelayRequest: Serialize {
    type Response: DeserializeOwned;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError>;
}

/// Append percent-encoded path segments to the base URL, keeping any prefix
///
/// Empty, `.` and `..` segments are rejected: the URL parser would drop or
/// resolve them and the request would reach a different route.
pub fn endpoint(base_url: &Url, segments: &[&str]) -> Result<Url, RelayError> {
    if let Some(bad) = segments
        .iter()
        .find(|s| matches!(**s, "" | "." | ".."))
    {
        return Err(RelayError::Url(format!(
            "invalid path segment {:?} for {}",
            bad, base_url
        )));
    }
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| RelayError::Url(base_url.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// `{error, code}` body the relay sends with non-2xx responses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub vault_id: String,
    #[serde(default)]
    pub alias: Option<String>,
    pub signing_public_key: PublicKey,
    pub encryption_public_key: EncryptionPublicKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub vault_id: String,
    pub signing_public_key: PublicKey,
    pub encryption_public_key: EncryptionPublicKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge: String,
}

impl RelayRequest for ChallengeRequest {
    type Response = ChallengeResponse;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["register", "challenge"])?;
        Ok(client.post(url).json(self))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub vault_id: String,
    pub signing_public_key: PublicKey,
    pub encryption_public_key: EncryptionPublicKey,
    pub challenge: String,
    pub challenge_signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub vault_id: Option<String>,
    #[serde(default)]
    pub registered_at: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

impl RelayRequest for RegisterRequest {
    type Response = RegisterResponse;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["register"])?;
        Ok(client.post(url).json(self))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendRequest {
    pub message: Message,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_payload: Option<EncryptedPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub message_id: String,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl RelayRequest for SendRequest {
    type Response = SendResponse;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["send"])?;
        Ok(client.post(url).json(self))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiveRequest {
    #[serde(skip)]
    pub vault_id: String,
    pub limit: u32,
}

/// A message waiting at the relay, exactly as delivered
///
/// `message` and `encrypted_payload` are left untyped: they are validated and
/// verified against the bytes received, not a re-serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub message_id: String,
    pub message: Value,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub received_at: Option<String>,
    #[serde(default)]
    pub encrypted_payload: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiveResponse {
    #[serde(default)]
    pub messages: Vec<PendingMessage>,
}

impl RelayRequest for ReceiveRequest {
    type Response = ReceiveResponse;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["receive", &self.vault_id])?;
        Ok(client.get(url).query(&[("limit", self.limit)]))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AckRequest {
    #[serde(skip)]
    pub message_id: String,
    pub vault_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub acknowledged_at: Option<String>,
}

impl RelayRequest for AckRequest {
    type Response = AckResponse;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["ack", &self.message_id])?;
        Ok(client.post(url).json(self))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListAgentsRequest {
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAgentsResponse {
    #[serde(default)]
    pub agents: Vec<AgentInfo>,
}

impl RelayRequest for ListAgentsRequest {
    type Response = ListAgentsResponse;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["agents"])?;
        Ok(client.get(url).query(&[("limit", self.limit)]))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveAliasRequest {
    #[serde(skip)]
    pub alias: String,
}

impl RelayRequest for ResolveAliasRequest {
    type Response = AgentInfo;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["resolve", &self.alias])?;
        Ok(client.get(url))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetAliasRequest {
    pub vault_id: String,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAliasResponse {
    #[serde(default)]
    pub vault_id: Option<String>,
    pub alias: String,
}

impl RelayRequest for SetAliasRequest {
    type Response = SetAliasResponse;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["alias"])?;
        Ok(client.post(url).json(self))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRequest;

impl RelayRequest for HealthRequest {
    type Response = Value;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["health"])?;
        Ok(client.get(url))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationLogRequest {
    #[serde(skip)]
    pub conversation_id: String,
}

impl RelayRequest for ConversationLogRequest {
    type Response = Value;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["messages", &self.conversation_id, "log"])?;
        Ok(client.get(url))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentLogsRequest {
    #[serde(skip)]
    pub vault_id: String,
    pub limit: u32,
}

impl RelayRequest for AgentLogsRequest {
    type Response = Value;

    fn build_request(&self, base_url: &Url, client: &Client) -> Result<RequestBuilder, RelayError> {
        let url = endpoint(base_url, &["logs", &self.vault_id])?;
        Ok(client.get(url).query(&[("limit", self.limit)]))
    }
}
