//! Payload encryption using AES-256-GCM
//!
//! A [`Secret`] is the symmetric key for exactly one sealed payload. It is never
//! generated directly: it is derived from an X25519 shared secret with
//! HKDF-SHA256 so that sender and recipient arrive at the same key without
//! transmitting it.

use std::fmt;

use aes_gcm::aead::{Aead, AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use super::CryptoError;

/// Size of an AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;
/// Size of an AES-256 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Size of the GCM authentication tag appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// HKDF `info` string binding derived keys to this protocol version.
///
/// Bumping the suffix yields deliberately incompatible keys.
pub const KDF_CONTEXT: &[u8] = b"openclaw-messaging-v1";

/// HKDF salt: fixed at 32 zero bytes
const KDF_SALT: [u8; SECRET_SIZE] = [0; SECRET_SIZE];

/// A 256-bit symmetric key for a single sealed payload
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; SECRET_SIZE]);

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl Secret {
    /// Derive a payload key from an ECDH shared secret
    ///
    /// Uses HKDF-SHA256 with a zero salt and [`KDF_CONTEXT`] as `info`.
    pub fn derive(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(&KDF_SALT), shared_secret);
        let mut okm = [0u8; SECRET_SIZE];
        hk.expand(KDF_CONTEXT, &mut okm)
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(Self(okm))
    }

    /// Generate a fresh random nonce
    pub fn generate_nonce() -> Result<[u8; NONCE_SIZE], CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce).map_err(|_| CryptoError::Random)?;
        Ok(nonce)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// Encrypt `plaintext`, returning `ciphertext || tag`
    pub fn encrypt(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher()
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::Encryption)
    }

    /// Decrypt `ciphertext || tag`
    ///
    /// The trailing tag is split off and checked before any plaintext is
    /// released; a mismatch returns an error and nothing else.
    pub fn decrypt(&self, nonce: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Decryption("invalid nonce length"));
        }
        if data.len() < TAG_SIZE {
            return Err(CryptoError::Decryption("ciphertext shorter than tag"));
        }

        let (ciphertext, tag) = data.split_at(data.len() - TAG_SIZE);
        let mut buffer = ciphertext.to_vec();
        match self.cipher().decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        ) {
            Ok(()) => Ok(buffer),
            Err(_) => {
                buffer.zeroize();
                Err(CryptoError::Decryption("authentication tag mismatch"))
            }
        }
    }
}
