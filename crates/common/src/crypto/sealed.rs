//! Sealed payloads: encrypt-to-public-key with an ephemeral X25519 key
//!
//! The sender generates a throwaway X25519 keypair for every payload, runs
//! ECDH against the recipient's encryption key, derives a [`Secret`] with
//! HKDF and encrypts with AES-256-GCM. The ephemeral public key travels with
//! the ciphertext so the recipient can repeat the agreement. Only the holder
//! of the recipient's encryption secret key can open the result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::keys::{decode_b64, encode_b64, EncryptionPublicKey, EncryptionSecretKey};
use super::secret::{Secret, NONCE_SIZE};
use super::CryptoError;

/// Wire form of an encrypted payload; every field is URL-safe base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ephemeral_public_key: String,
    pub nonce: String,
    /// AES-GCM ciphertext with the 16 byte tag appended
    pub ciphertext: String,
}

impl EncryptedPayload {
    /// Encrypt `plaintext` so only `recipient` can read it
    pub fn seal(recipient: &EncryptionPublicKey, plaintext: &[u8]) -> Result<Self, CryptoError> {
        let ephemeral = EncryptionSecretKey::generate();
        let shared = ephemeral.diffie_hellman(recipient);
        if !shared.was_contributory() {
            return Err(CryptoError::Encryption);
        }

        let secret = Secret::derive(shared.as_bytes())?;
        let nonce = Secret::generate_nonce()?;
        let ciphertext = secret.encrypt(&nonce, plaintext)?;

        Ok(Self {
            ephemeral_public_key: ephemeral.public().to_b64(),
            nonce: encode_b64(&nonce),
            ciphertext: encode_b64(&ciphertext),
        })
    }

    /// Serialize `value` to JSON and seal it
    pub fn seal_json<T: Serialize + ?Sized>(
        recipient: &EncryptionPublicKey,
        value: &T,
    ) -> Result<Self, CryptoError> {
        let plaintext = serde_json::to_vec(value)?;
        Self::seal(recipient, &plaintext)
    }

    /// Decrypt with the recipient's encryption secret key
    pub fn open(&self, key: &EncryptionSecretKey) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = EncryptionPublicKey::from_b64(&self.ephemeral_public_key)
            .map_err(|_| CryptoError::Decryption("malformed ephemeral public key"))?;
        let nonce =
            decode_b64(&self.nonce).map_err(|_| CryptoError::Decryption("malformed nonce"))?;
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Decryption("invalid nonce length"));
        }
        let ciphertext = decode_b64(&self.ciphertext)
            .map_err(|_| CryptoError::Decryption("malformed ciphertext"))?;

        let shared = key.diffie_hellman(&ephemeral);
        if !shared.was_contributory() {
            return Err(CryptoError::Decryption("low-order ephemeral key"));
        }
        let secret = Secret::derive(shared.as_bytes())?;
        secret.decrypt(&nonce, &ciphertext)
    }

    /// Decrypt and parse the plaintext as JSON
    pub fn open_json(&self, key: &EncryptionSecretKey) -> Result<Value, CryptoError> {
        let plaintext = self.open(key)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
