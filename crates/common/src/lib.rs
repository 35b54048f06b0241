/**
 * Cryptographic types and operations.
 *  - Ed25519 signing and X25519 encryption keys
 *  - Canonical JSON signatures
 *  - Sealed (encrypt-to-public-key) payloads
 */
pub mod crypto;
/**
 * The message schema shared by every agent:
 *  envelope, payload, constructors and validation.
 */
pub mod envelope;

pub mod prelude {
    pub use crate::crypto::{
        CryptoError, EncryptedPayload, EncryptionPublicKey, EncryptionSecretKey, PublicKey,
        SecretKey,
    };
    pub use crate::envelope::{Envelope, Message, MessageType, Payload, ValidationError};
}
