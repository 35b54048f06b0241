//! Cryptographic primitives for ClawSend
//!
//! Every agent owns two independent keypairs:
//!
//! - **Signing**: an Ed25519 keypair (`SecretKey`/`PublicKey`). Signatures
//!   cover the canonical JSON encoding of a message's `envelope` and
//!   `payload`, so any implementation that sorts keys the same way can
//!   verify them.
//! - **Encryption**: an X25519 keypair (`EncryptionSecretKey`/
//!   `EncryptionPublicKey`) used only to open payloads sealed to this agent.
//!
//! # Sealed payloads
//!
//! To encrypt for a recipient:
//! 1. Generate an ephemeral X25519 keypair
//! 2. ECDH with the recipient's encryption public key
//! 3. HKDF-SHA256 (zero salt, `openclaw-messaging-v1` info) to a 256-bit key
//! 4. AES-256-GCM with a random 96-bit nonce
//!
//! The result is an [`EncryptedPayload`] carrying the ephemeral public key,
//! nonce and ciphertext as URL-safe base64. Private key material never leaves
//! these types: `Debug` output is redacted and byte exports are zeroized on
//! drop.

mod canonical;
mod error;
mod keys;
mod sealed;
mod secret;
mod signing;

pub use canonical::{canonicalize, to_canonical_bytes};
pub use ed25519_dalek::Signature;
pub use error::CryptoError;
pub use keys::{
    decode_b64, encode_b64, signature_from_b64, EncryptionPublicKey, EncryptionSecretKey,
    KeyError, PublicKey, SecretKey, BASE64, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
pub use sealed::EncryptedPayload;
pub use secret::{Secret, KDF_CONTEXT, NONCE_SIZE, SECRET_SIZE, TAG_SIZE};
pub use signing::{sign_challenge, sign_json, verify_challenge, verify_json};
