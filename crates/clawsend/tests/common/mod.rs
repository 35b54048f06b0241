//! Shared test utilities: an in-memory relay served by axum
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clawsend::common::crypto::{verify_challenge, verify_json, EncryptionPublicKey, PublicKey};
use clawsend::config::Config;
use clawsend::relay::{X_SIGNATURE, X_VAULT_ID};
use clawsend::vault::{ContactUpdate, Vault};
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub vault_id: String,
    pub alias: Option<String>,
    pub signing_public_key: PublicKey,
    pub encryption_public_key: EncryptionPublicKey,
}

impl Agent {
    fn to_json(&self) -> Value {
        json!({
            "vault_id": self.vault_id,
            "alias": self.alias,
            "signing_public_key": self.signing_public_key,
            "encryption_public_key": self.encryption_public_key,
        })
    }
}

#[derive(Debug, Default)]
pub struct RelayState {
    pub agents: HashMap<String, Agent>,
    pub challenges: HashMap<String, String>,
    pub queues: HashMap<String, Vec<Value>>,
    pub challenge_calls: usize,
    pub register_calls: usize,
    /// Acks left to hang past the client timeout before being served
    pub stalled_acks: usize,
}

type Shared = Arc<Mutex<RelayState>>;

/// A relay implementing the wire contract in memory
pub struct MockRelay {
    pub url: String,
    pub state: Shared,
}

impl MockRelay {
    pub async fn spawn() -> Self {
        Self::spawn_at("").await
    }

    /// Serve the relay under a path prefix such as `/relay`
    pub async fn spawn_at(prefix: &str) -> Self {
        let state: Shared = Arc::default();
        let routes = routes(state.clone());
        let app = if prefix.is_empty() {
            routes
        } else {
            Router::new().nest(prefix, routes)
        };
        let url = serve(app).await;
        Self {
            url: format!("{}{}", url, prefix),
            state,
        }
    }

    pub fn config(&self) -> Config {
        Config {
            timeout_secs: 5,
            ..Config::with_relay(self.url.clone())
        }
    }

    pub fn pending_for(&self, vault_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(vault_id)
            .map_or(0, Vec::len)
    }

    pub fn register_calls(&self) -> usize {
        self.state.lock().unwrap().register_calls
    }

    pub fn challenge_calls(&self) -> usize {
        self.state.lock().unwrap().challenge_calls
    }

    /// Deliver a raw pending entry straight into a vault's queue
    /// Make the next `count` acks outlive a short client timeout
    pub fn stall_acks(&self, count: usize) {
        self.state.lock().unwrap().stalled_acks = count;
    }

    pub fn inject(&self, vault_id: &str, entry: Value) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(vault_id.to_string())
            .or_default()
            .push(entry);
    }
}

/// Serve `app` on an ephemeral port, returning its base URL
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A server that accepts connections and never answers
pub async fn spawn_unresponsive() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

/// A fresh vault in its own temp directory
pub fn new_vault(alias: &str) -> (Vault, TempDir) {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(Some(dir.path().to_path_buf()), Some(alias.to_string())).unwrap();
    (vault, dir)
}

/// Add `other` to `vault`'s contacts with both public keys
pub fn trust(vault: &Vault, other: &Vault) {
    vault
        .add_contact(
            other.vault_id(),
            ContactUpdate::with_keys(other.signing_public_key(), other.encryption_public_key())
                .alias(other.alias().unwrap_or_default()),
        )
        .unwrap();
}

fn routes(state: Shared) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register/challenge", post(challenge))
        .route("/register", post(register))
        .route("/send", post(send))
        .route("/receive/:vault_id", get(receive))
        .route("/ack/:message_id", post(ack))
        .route("/agents", get(agents))
        .route("/resolve/:alias", get(resolve))
        .route("/alias", post(set_alias))
        .route("/messages/:conversation_id/log", get(conversation_log))
        .route("/logs/:vault_id", get(agent_logs))
        .with_state(state)
}

fn error(status: StatusCode, message: &str, code: &str) -> Response {
    (status, Json(json!({ "error": message, "code": code }))).into_response()
}

/// Check `X-Vault-ID`/`X-Signature` against the registered signing key
fn authenticate(state: &RelayState, headers: &HeaderMap, body: &Value) -> Result<String, Response> {
    let vault_id = headers
        .get(X_VAULT_ID)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "missing vault id", "unauthorized"))?;
    let signature = headers
        .get(X_SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "missing signature", "unauthorized"))?;
    let agent = state
        .agents
        .get(vault_id)
        .ok_or_else(|| error(StatusCode::FORBIDDEN, "unknown vault", "not_registered"))?;
    verify_json(&agent.signing_public_key, body, signature)
        .map_err(|_| error(StatusCode::UNAUTHORIZED, "invalid signature", "invalid_signature"))?;
    Ok(vault_id.to_string())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn challenge(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    state.challenge_calls += 1;
    let vault_id = body["vault_id"].as_str().unwrap_or_default().to_string();
    if state.agents.contains_key(&vault_id) {
        return error(StatusCode::CONFLICT, "vault already registered", "already_registered");
    }
    let challenge = format!("challenge-{}", uuid::Uuid::new_v4());
    state.challenges.insert(vault_id, challenge.clone());
    Json(json!({ "challenge": challenge })).into_response()
}

#[derive(Deserialize)]
struct RegisterBody {
    vault_id: String,
    signing_public_key: PublicKey,
    encryption_public_key: EncryptionPublicKey,
    challenge: String,
    challenge_signature: String,
    alias: Option<String>,
}

async fn register(State(state): State<Shared>, Json(body): Json<RegisterBody>) -> Response {
    let mut state = state.lock().unwrap();
    state.register_calls += 1;
    if state.agents.contains_key(&body.vault_id) {
        return error(StatusCode::CONFLICT, "vault already registered", "already_registered");
    }
    if state.challenges.get(&body.vault_id) != Some(&body.challenge) {
        return error(StatusCode::BAD_REQUEST, "unknown challenge", "invalid_challenge");
    }
    if verify_challenge(&body.signing_public_key, &body.challenge, &body.challenge_signature).is_err() {
        return error(StatusCode::UNAUTHORIZED, "bad challenge signature", "invalid_signature");
    }
    state.challenges.remove(&body.vault_id);
    let agent = Agent {
        vault_id: body.vault_id.clone(),
        alias: body.alias.clone(),
        signing_public_key: body.signing_public_key,
        encryption_public_key: body.encryption_public_key,
    };
    state.agents.insert(body.vault_id.clone(), agent);
    Json(json!({
        "vault_id": body.vault_id,
        "alias": body.alias,
        "registered_at": "2026-01-01T00:00:00+00:00",
    }))
    .into_response()
}

async fn send(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    let sender = match authenticate(&state, &headers, &body) {
        Ok(sender) => sender,
        Err(response) => return response,
    };

    let message = body["message"].clone();
    let recipient = message["envelope"]["recipient"].as_str().unwrap_or_default();
    let recipient_id = state
        .agents
        .values()
        .find(|a| a.vault_id == recipient || a.alias.as_deref() == Some(recipient))
        .map(|a| a.vault_id.clone());
    let recipient_id = match recipient_id {
        Some(id) => id,
        None => return error(StatusCode::NOT_FOUND, "recipient not found", "recipient_not_found"),
    };

    let message_id = message["envelope"]["id"].as_str().unwrap_or_default().to_string();
    let mut entry = json!({
        "message_id": message_id,
        "message": message,
        "signature": body["signature"],
        "sender": sender,
        "received_at": "2026-01-01T00:00:01+00:00",
    });
    if let Some(sealed) = body.get("encrypted_payload") {
        entry["encrypted_payload"] = sealed.clone();
    }
    state
        .queues
        .entry(recipient_id.clone())
        .or_default()
        .push(entry);

    Json(json!({
        "message_id": message_id,
        "recipient": recipient_id,
        "conversation_id": format!("conv_{}", message_id),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct Limit {
    limit: Option<usize>,
}

async fn receive(
    State(state): State<Shared>,
    Path(vault_id): Path<String>,
    Query(query): Query<Limit>,
) -> Response {
    let state = state.lock().unwrap();
    let messages: Vec<Value> = state
        .queues
        .get(&vault_id)
        .map(|q| q.iter().take(query.limit.unwrap_or(50)).cloned().collect())
        .unwrap_or_default();
    Json(json!({ "messages": messages })).into_response()
}

async fn ack(
    State(state): State<Shared>,
    Path(message_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let stall = {
        let mut state = state.lock().unwrap();
        let stall = state.stalled_acks > 0;
        state.stalled_acks = state.stalled_acks.saturating_sub(1);
        stall
    };
    if stall {
        tokio::time::sleep(STALL).await;
        return error(StatusCode::SERVICE_UNAVAILABLE, "stalled", "stalled");
    }

    let mut state = state.lock().unwrap();
    let vault_id = match authenticate(&state, &headers, &body) {
        Ok(vault_id) => vault_id,
        Err(response) => return response,
    };
    let queue = state.queues.entry(vault_id).or_default();
    let before = queue.len();
    queue.retain(|entry| entry["message_id"] != message_id.as_str());
    if queue.len() == before {
        return error(StatusCode::NOT_FOUND, "message not found", "not_found");
    }
    Json(json!({
        "message_id": message_id,
        "acknowledged_at": "2026-01-01T00:00:02+00:00",
    }))
    .into_response()
}

async fn agents(State(state): State<Shared>, Query(query): Query<Limit>) -> Response {
    let state = state.lock().unwrap();
    let agents: Vec<Value> = state
        .agents
        .values()
        .take(query.limit.unwrap_or(100))
        .map(Agent::to_json)
        .collect();
    Json(json!({ "agents": agents })).into_response()
}

async fn resolve(State(state): State<Shared>, Path(alias): Path<String>) -> Response {
    let state = state.lock().unwrap();
    match state
        .agents
        .values()
        .find(|a| a.alias.as_deref() == Some(alias.as_str()))
    {
        Some(agent) => Json(agent.to_json()).into_response(),
        None => error(StatusCode::NOT_FOUND, "alias not found", "not_found"),
    }
}

async fn set_alias(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    let vault_id = match authenticate(&state, &headers, &body) {
        Ok(vault_id) => vault_id,
        Err(response) => return response,
    };
    let alias = body["alias"].as_str().unwrap_or_default().to_string();
    if state
        .agents
        .values()
        .any(|a| a.vault_id != vault_id && a.alias.as_deref() == Some(alias.as_str()))
    {
        return error(StatusCode::CONFLICT, "alias taken", "alias_taken");
    }
    if let Some(agent) = state.agents.get_mut(&vault_id) {
        agent.alias = Some(alias.clone());
    }
    Json(json!({ "vault_id": vault_id, "alias": alias })).into_response()
}

async fn conversation_log(Path(conversation_id): Path<String>) -> impl IntoResponse {
    Json(json!({ "conversation_id": conversation_id, "messages": [] }))
}

async fn agent_logs(Path(vault_id): Path<String>, Query(query): Query<Limit>) -> impl IntoResponse {
    Json(json!({
        "vault_id": vault_id,
        "limit": query.limit,
        "conversations": [],
    }))
}

/// How long a test may wait on something that should be immediate
pub const SHORT: Duration = Duration::from_secs(10);

/// How long a stalled ack hangs; longer than a one-second client timeout
pub const STALL: Duration = Duration::from_secs(3);
