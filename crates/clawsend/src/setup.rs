//! First-use bootstrap: make sure a vault exists and is registered
//!
//! Running it again is cheap. An existing vault is loaded, never recreated,
//! and the registration handshake only runs while the vault has no
//! registered state for the target relay. A failed handshake leaves the
//! vault in place so the next run picks up where this one stopped.

use std::path::PathBuf;

use common::envelope::now_timestamp;
use uuid::Uuid;

use crate::config::Config;
use crate::relay::{ChallengeOutcome, RegisterOutcome, RelayClient, RelayError};
use crate::vault::{ServerState, Vault, VaultError};

/// What a setup run did
#[derive(Debug)]
pub struct SetupReport {
    pub vault: Vault,
    /// A new vault was created on this run
    pub created: bool,
    /// The handshake completed on this run
    pub registered_now: bool,
    /// The relay reported the vault as already known. Both flags stay
    /// false when the vault held registered state before this run.
    pub already_registered: bool,
}

impl SetupReport {
    pub fn into_vault(self) -> Vault {
        self.vault
    }
}

/// A random alias for vaults created without one
pub fn generate_alias() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("agent-{}", &hex[..8])
}

/// Create or load the vault at `vault_dir`, then register it with the relay
/// named in `config` if needed.
pub async fn auto_setup(
    vault_dir: Option<PathBuf>,
    config: &Config,
    alias: Option<String>,
) -> Result<SetupReport, SetupError> {
    let client = RelayClient::new(config)?;
    let dir = Vault::vault_dir(vault_dir)?;

    let (mut vault, created) = if Vault::exists(&dir) {
        (Vault::load(Some(dir))?, false)
    } else {
        let alias = alias.unwrap_or_else(generate_alias);
        (Vault::create(Some(dir), Some(alias))?, true)
    };

    let relay = client.relay_key();
    if vault.is_registered(&relay) {
        tracing::debug!(vault_id = %vault.vault_id(), %relay, "already registered");
        return Ok(SetupReport {
            vault,
            created,
            registered_now: false,
            already_registered: false,
        });
    }

    let state = match register(&client, &vault).await {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(vault_id = %vault.vault_id(), %relay, "registration failed: {}", e);
            return Err(e.into());
        }
    };

    let already_registered = state.registered_at.is_none();
    vault.set_server_state(&relay, state)?;
    tracing::info!(
        vault_id = %vault.vault_id(),
        %relay,
        already_registered,
        "registered with relay"
    );

    Ok(SetupReport {
        vault,
        created,
        registered_now: !already_registered,
        already_registered,
    })
}

/// challenge -> sign -> register
async fn register(client: &RelayClient, vault: &Vault) -> Result<ServerState, RelayError> {
    let challenge = match client.request_challenge(vault).await? {
        ChallengeOutcome::Challenge(challenge) => challenge,
        ChallengeOutcome::AlreadyRegistered => return Ok(preexisting_registration()),
    };

    match client.register(vault, &challenge, vault.alias()).await? {
        RegisterOutcome::Registered(response) => Ok(ServerState {
            registered: true,
            registered_at: Some(response.registered_at.unwrap_or_else(now_timestamp)),
            alias: response.alias.or_else(|| vault.alias().map(str::to_string)),
        }),
        RegisterOutcome::AlreadyRegistered => Ok(preexisting_registration()),
    }
}

fn preexisting_registration() -> ServerState {
    ServerState {
        registered: true,
        registered_at: None,
        alias: None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generate_alias() {
        let alias = generate_alias();
        assert!(alias.starts_with("agent-"));
        assert_eq!(alias.len(), "agent-".len() + 8);
        assert!(alias["agent-".len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_alias(), generate_alias());
    }
}
