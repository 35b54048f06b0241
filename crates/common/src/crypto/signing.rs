//! Signatures over canonical JSON and registration challenges

use serde::Serialize;

use super::canonical::to_canonical_bytes;
use super::keys::{encode_b64, signature_from_b64, PublicKey, SecretKey};
use super::CryptoError;

/// Sign the canonical JSON form of `value`, returning a base64 signature
pub fn sign_json<T: Serialize + ?Sized>(key: &SecretKey, value: &T) -> Result<String, CryptoError> {
    let bytes = to_canonical_bytes(value)?;
    Ok(encode_b64(&key.sign(&bytes).to_bytes()))
}

/// Verify a base64 signature over the canonical JSON form of `value`
///
/// Malformed signatures and signatures that do not match are both reported
/// as [`CryptoError::InvalidSignature`].
pub fn verify_json<T: Serialize + ?Sized>(
    key: &PublicKey,
    value: &T,
    signature: &str,
) -> Result<(), CryptoError> {
    let signature = signature_from_b64(signature).map_err(|_| CryptoError::InvalidSignature)?;
    let bytes = to_canonical_bytes(value)?;
    key.verify(&bytes, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Sign the UTF-8 bytes of a relay registration challenge
pub fn sign_challenge(key: &SecretKey, challenge: &str) -> String {
    encode_b64(&key.sign(challenge.as_bytes()).to_bytes())
}

/// Verify a challenge signature produced by [`sign_challenge`]
pub fn verify_challenge(key: &PublicKey, challenge: &str, signature: &str) -> Result<(), CryptoError> {
    let signature = signature_from_b64(signature).map_err(|_| CryptoError::InvalidSignature)?;
    key.verify(challenge.as_bytes(), &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}
