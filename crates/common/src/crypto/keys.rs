use std::fmt;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

/// Size of an Ed25519 or X25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of an Ed25519 or X25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// URL-safe base64 used for every binary field on the wire.
///
/// Output is padded; input is accepted with or without padding.
pub const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors that can occur while decoding or parsing key material
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid {kind} size, expected {expected}, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid {0}: not a valid curve point")]
    InvalidPoint(&'static str),
}

/// Encode bytes as URL-safe base64
pub fn encode_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode URL-safe base64 text
pub fn decode_b64(text: &str) -> Result<Vec<u8>, KeyError> {
    Ok(BASE64.decode(text.trim().as_bytes())?)
}

fn to_array<const N: usize>(kind: &'static str, bytes: &[u8]) -> Result<[u8; N], KeyError> {
    if bytes.len() != N {
        return Err(KeyError::InvalidLength {
            kind,
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut buff = [0u8; N];
    buff.copy_from_slice(bytes);
    Ok(buff)
}

fn random_bytes() -> Zeroizing<[u8; PRIVATE_KEY_SIZE]> {
    let mut bytes = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
    getrandom::getrandom(bytes.as_mut()).expect("failed to generate random bytes");
    bytes
}

/// Parse a base64url Ed25519 signature
pub fn signature_from_b64(text: &str) -> Result<Signature, KeyError> {
    let bytes = decode_b64(text)?;
    let bytes = to_array::<SIGNATURE_SIZE>("signature", &bytes)?;
    Ok(Signature::from_bytes(&bytes))
}

/// Ed25519 secret key used to sign messages, requests and registration challenges.
///
/// The `Debug` implementation only prints the public half.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    /// Generate a new random signing key using the OS RNG
    pub fn generate() -> Self {
        Self(SigningKey::from_bytes(&random_bytes()))
    }

    /// Load a signing key from its raw 32-byte form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(to_array::<PRIVATE_KEY_SIZE>("signing private key", bytes)?);
        Ok(Self(SigningKey::from_bytes(&bytes)))
    }

    /// Raw key bytes, for persisting into the vault's key file
    pub fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_SIZE]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// Derive the public key from this secret key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Sign a message, returning a detached signature
    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.0.sign(msg)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key: an agent's published verification key.
///
/// Serializes as URL-safe base64 text.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Parse a public key from raw bytes
    ///
    /// # Errors
    ///
    /// Fails when the slice is not 32 bytes or does not decode to a curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes = to_array::<PUBLIC_KEY_SIZE>("signing public key", bytes)?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidPoint("signing public key"))
    }

    pub fn from_b64(text: &str) -> Result<Self, KeyError> {
        Self::from_bytes(&decode_b64(text)?)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_b64(&self) -> String {
        encode_b64(self.0.as_bytes())
    }

    /// Verify an Ed25519 signature on a message.
    pub fn verify(
        &self,
        msg: &[u8],
        signature: &Signature,
    ) -> Result<(), ed25519_dalek::SignatureError> {
        self.0.verify_strict(msg, signature)
    }
}

/// X25519 secret key used to open payloads addressed to this agent.
///
/// Never used for signing; the type system keeps it apart from [`SecretKey`].
#[derive(Clone)]
pub struct EncryptionSecretKey(StaticSecret);

impl EncryptionSecretKey {
    pub fn generate() -> Self {
        Self(StaticSecret::from(*random_bytes()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(to_array::<PRIVATE_KEY_SIZE>(
            "encryption private key",
            bytes,
        )?);
        Ok(Self(StaticSecret::from(*bytes)))
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_SIZE]> {
        Zeroizing::new(self.0.to_bytes())
    }

    pub fn public(&self) -> EncryptionPublicKey {
        EncryptionPublicKey(X25519PublicKey::from(&self.0))
    }

    pub(crate) fn diffie_hellman(&self, their_public: &EncryptionPublicKey) -> SharedSecret {
        self.0.diffie_hellman(&their_public.0)
    }
}

impl fmt::Debug for EncryptionSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionSecretKey")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}

/// X25519 public key other agents encrypt payloads to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncryptionPublicKey(X25519PublicKey);

impl EncryptionPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes = to_array::<PUBLIC_KEY_SIZE>("encryption public key", bytes)?;
        Ok(Self(X25519PublicKey::from(bytes)))
    }

    pub fn from_b64(text: &str) -> Result<Self, KeyError> {
        Self::from_bytes(&decode_b64(text)?)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_b64(&self) -> String {
        encode_b64(self.0.as_bytes())
    }
}

macro_rules! b64_key_impls {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_b64())
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.to_b64())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = KeyError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_b64(s)
            }
        }

        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_b64())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let text = String::deserialize(deserializer)?;
                Self::from_b64(&text).map_err(serde::de::Error::custom)
            }
        }
    };
}

b64_key_impls!(PublicKey);
b64_key_impls!(EncryptionPublicKey);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_signing_key_bytes_roundtrip() {
        let secret_key = SecretKey::generate();
        let recovered = SecretKey::from_bytes(secret_key.to_bytes().as_ref()).unwrap();
        assert_eq!(secret_key.public(), recovered.public());
    }

    #[test]
    fn test_public_key_b64_roundtrip() {
        let public_key = SecretKey::generate().public();
        let encoded = public_key.to_b64();
        assert!(!encoded.contains('+') && !encoded.contains('/'));
        assert_eq!(PublicKey::from_b64(&encoded).unwrap(), public_key);

        // unpadded input is accepted too
        let unpadded = encoded.trim_end_matches('=');
        assert_eq!(PublicKey::from_b64(unpadded).unwrap(), public_key);
    }

    #[test]
    fn test_sign_and_verify() {
        let secret_key = SecretKey::generate();
        let public_key = secret_key.public();
        let message = b"hello, world!";

        let signature = secret_key.sign(message);
        assert!(public_key.verify(message, &signature).is_ok());
        assert!(public_key.verify(b"hello, world?", &signature).is_err());

        let other_key = SecretKey::generate().public();
        assert!(other_key.verify(message, &signature).is_err());
    }

    #[test]
    fn test_key_length_validation() {
        assert!(matches!(
            SecretKey::from_bytes(&[7u8; 31]),
            Err(KeyError::InvalidLength {
                expected: 32,
                actual: 31,
                ..
            })
        ));
        assert!(EncryptionSecretKey::from_bytes(&[7u8; 33]).is_err());
        assert!(EncryptionPublicKey::from_bytes(&[7u8; 16]).is_err());
        assert!(signature_from_b64(&encode_b64(&[0u8; 63])).is_err());
    }

    #[test]
    fn test_encryption_keys_agree() {
        let alice = EncryptionSecretKey::generate();
        let bob = EncryptionSecretKey::generate();
        let ab = alice.diffie_hellman(&bob.public());
        let ba = bob.diffie_hellman(&alice.public());
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_debug_does_not_leak_private_bytes() {
        let secret_key = SecretKey::generate();
        let private_b64 = encode_b64(secret_key.to_bytes().as_ref());
        let rendered = format!("{:?}", secret_key);
        assert!(!rendered.contains(&private_b64));
        assert!(rendered.contains(&secret_key.public().to_b64()));

        let encryption_key = EncryptionSecretKey::generate();
        let private_b64 = encode_b64(encryption_key.to_bytes().as_ref());
        assert!(!format!("{:?}", encryption_key).contains(&private_b64));
    }

    #[test]
    fn test_public_keys_serialize_as_b64_strings() {
        let public_key = SecretKey::generate().public();
        let json = serde_json::to_string(&public_key).unwrap();
        assert_eq!(json, format!("\"{}\"", public_key.to_b64()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, public_key);
    }
}
