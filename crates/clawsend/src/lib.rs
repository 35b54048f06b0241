/**
 * Client configuration (relay URL, timeouts, polling),
 *  read from `config.toml` in the vault directory.
 */
pub mod config;
/**
 * Incoming message pipeline: verify, decrypt,
 *  classify, record, acknowledge.
 */
pub mod inbox;
/**
 * Outgoing message pipeline: validate, seal,
 *  sign, send, record.
 */
pub mod outbox;
/**
 * HTTP client for the store-and-forward relay.
 */
pub mod relay;
/**
 * Idempotent first-use bootstrap.
 */
pub mod setup;
/**
 * On-disk identity, keys, contacts and message records.
 */
pub mod vault;

pub use common;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::inbox::{InboundMessage, Inbox, InboxOptions, MessageHandler};
    pub use crate::outbox::{deliver, prepare, resolve_recipient, send, PreparedMessage};
    pub use crate::relay::{RelayClient, RelayError};
    pub use crate::setup::{auto_setup, SetupError, SetupReport};
    pub use crate::vault::{ContactUpdate, Direction, QuarantineReason, Vault, VaultError};
    pub use common::prelude::*;
}
