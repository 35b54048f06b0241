//! Transport to a store-and-forward relay
//!
//! Requests that act on behalf of a vault carry `X-Vault-ID` and an
//! `X-Signature` over the canonical JSON body. Failures are classified:
//! 401/403 are [`RelayError::Authentication`], any other non-2xx is
//! [`RelayError::Server`], and timeouts or connection failures are
//! [`RelayError::Network`].

pub mod api;
mod client;
mod error;

pub use api::{AgentInfo, PendingMessage, RegisterResponse, SendResponse};
pub use client::{ChallengeOutcome, RegisterOutcome, RelayClient, X_SIGNATURE, X_VAULT_ID};
pub use error::{RelayError, ALREADY_REGISTERED};
