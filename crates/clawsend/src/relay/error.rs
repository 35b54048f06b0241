use common::crypto::CryptoError;
use common::envelope::ValidationError;
use reqwest::StatusCode;

use crate::vault::VaultError;

/// Machine code the relay returns for a vault it already knows
pub const ALREADY_REGISTERED: &str = "already_registered";

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("authentication failed ({status}): {message}")]
    Authentication {
        status: StatusCode,
        message: String,
        code: Option<String>,
    },
    #[error("relay error ({status}): {message}")]
    Server {
        status: StatusCode,
        message: String,
        code: Option<String>,
    },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("undecodable relay response: {0}")]
    Decode(String),
    #[error("invalid relay URL: {0}")]
    Url(String),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl RelayError {
    /// HTTP status for errors the relay answered with
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RelayError::Authentication { status, .. } | RelayError::Server { status, .. } => {
                Some(*status)
            }
            RelayError::Network(e) => e.status(),
            _ => None,
        }
    }

    /// Machine-readable `code` from the relay's error body, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            RelayError::Authentication { code, .. } | RelayError::Server { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_already_registered(&self) -> bool {
        self.code() == Some(ALREADY_REGISTERED)
    }

    /// Only transport failures are worth retrying as-is
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Network(_))
    }
}
