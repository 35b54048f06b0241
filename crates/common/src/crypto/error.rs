use super::keys::KeyError;

/// Errors produced by signing, verification and payload encryption
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("decryption failed: {0}")]
    Decryption(&'static str),
    #[error("encryption failed")]
    Encryption,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("random number generation failed")]
    Random,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
