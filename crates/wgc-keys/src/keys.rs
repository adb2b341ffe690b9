//! WireGuard key types.
//!
//! WireGuard uses Curve25519 for key exchange. Keys are 32 bytes and are
//! carried in configuration files as base64 text.

use crate::error::KeyError;
use base64::Engine;
use rand_core::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// WireGuard key size in bytes (256-bit Curve25519 keys).
pub const KEY_SIZE: usize = 32;

fn decode_base64(s: &str) -> Result<[u8; KEY_SIZE], KeyError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|e| KeyError::InvalidBase64(e.to_string()))?;
    if bytes.len() != KEY_SIZE {
        return Err(KeyError::InvalidKeyLength(bytes.len()));
    }
    let mut arr = [0u8; KEY_SIZE];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// A WireGuard public key (Curve25519, 32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Creates a public key from raw bytes.
    #[must_use]
    pub const fn from_bytes_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a public key from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_SIZE {
            return Err(KeyError::InvalidKeyLength(bytes.len()));
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Returns the raw bytes of the public key.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decodes a public key from base64. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or wrong length.
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_base64(s).map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = self.to_base64();
        let short = &b64[..8.min(b64.len())];
        write!(f, "PublicKey({short}...)")
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

impl From<X25519PublicKey> for PublicKey {
    fn from(key: X25519PublicKey) -> Self {
        Self::from_bytes_array(*key.as_bytes())
    }
}

/// A WireGuard private key (Curve25519, 32 bytes).
#[derive(Clone)]
pub struct PrivateKey([u8; KEY_SIZE]);

impl PrivateKey {
    /// Generates a new random private key from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self(secret.to_bytes())
    }

    /// Creates a private key from a 32-byte array.
    #[must_use]
    pub const fn from_bytes_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a private key from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_SIZE {
            return Err(KeyError::InvalidKeyLength(bytes.len()));
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Returns the raw bytes of the private key.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derives the corresponding public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        let public = X25519PublicKey::from(&secret);
        PublicKey::from(public)
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decodes a private key from base64. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or wrong length.
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_base64(s).map(Self)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PrivateKey {}

/// A WireGuard preshared key (32 bytes of symmetric key material).
#[derive(Clone)]
pub struct PresharedKey([u8; KEY_SIZE]);

impl PresharedKey {
    /// Generates a new random preshared key using OS-level entropy.
    ///
    /// Uses `OsRng` directly instead of `thread_rng()` because symmetric
    /// key material should come straight from the operating system's
    /// CSPRNG rather than a userspace PRNG seeded from it.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;
        use rand::rngs::OsRng;
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Creates a preshared key from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_SIZE {
            return Err(KeyError::InvalidKeyLength(bytes.len()));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Returns the raw bytes of the preshared key.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decodes a preshared key from base64. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or wrong length.
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_base64(s).map(Self)
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresharedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for PresharedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PresharedKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_generate_produces_valid_key() {
        let key = PrivateKey::generate();
        assert_eq!(key.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn private_key_to_public_key_is_deterministic() {
        let private = PrivateKey::generate();
        let public1 = private.public_key();
        let public2 = private.public_key();
        assert_eq!(public1, public2);
    }

    #[test]
    fn different_private_keys_produce_different_public_keys() {
        let private1 = PrivateKey::generate();
        let private2 = PrivateKey::generate();
        assert_ne!(private1.public_key(), private2.public_key());
    }

    #[test]
    fn public_key_base64_roundtrip() {
        let public = PrivateKey::generate().public_key();
        let encoded = public.to_base64();
        let decoded = PublicKey::from_base64(&encoded).expect("decode failed");
        assert_eq!(public, decoded);
    }

    #[test]
    fn private_key_base64_roundtrip() {
        let private = PrivateKey::generate();
        let encoded = private.to_base64();
        let decoded = PrivateKey::from_base64(&encoded).expect("decode failed");
        assert_eq!(private, decoded);
    }

    #[test]
    fn base64_decode_ignores_surrounding_whitespace() {
        let private = PrivateKey::generate();
        let padded = format!("  {}\n", private.to_base64());
        let decoded = PrivateKey::from_base64(&padded).expect("decode failed");
        assert_eq!(private, decoded);
    }

    #[test]
    fn private_key_debug_redacts() {
        let private = PrivateKey::generate();
        let debug = format!("{private:?}");
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn preshared_key_debug_redacts() {
        let psk = PresharedKey::generate();
        let debug = format!("{psk:?}");
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn preshared_key_base64_roundtrip() {
        let psk = PresharedKey::generate();
        let decoded = PresharedKey::from_base64(&psk.to_base64()).expect("decode failed");
        assert_eq!(psk, decoded);
    }

    #[test]
    fn public_key_serde_roundtrip() {
        let public = PrivateKey::generate().public_key();
        let json = serde_json::to_string(&public).expect("serialize failed");
        let deserialized: PublicKey = serde_json::from_str(&json).expect("deserialize failed");
        assert_eq!(public, deserialized);
    }

    #[test]
    fn public_key_serializes_as_base64_string() {
        let public = PrivateKey::generate().public_key();
        let json = serde_json::to_string(&public).expect("serialize failed");
        assert_eq!(json, format!("\"{}\"", public.to_base64()));
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short_bytes = [0u8; 16];
        assert!(PrivateKey::from_bytes(&short_bytes).is_err());
        assert!(PublicKey::from_bytes(&short_bytes).is_err());
        assert!(PresharedKey::from_bytes(&short_bytes).is_err());
    }

    #[test]
    fn short_base64_rejected() {
        // "foo==" is valid base64 but decodes to fewer than 32 bytes.
        assert!(matches!(
            PrivateKey::from_base64("foo=="),
            Err(KeyError::InvalidKeyLength(_))
        ));
    }

    #[test]
    fn garbage_base64_rejected() {
        assert!(matches!(
            PrivateKey::from_base64("not*base64"),
            Err(KeyError::InvalidBase64(_))
        ));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn public_key_from_bytes_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
                let public = PublicKey::from_bytes_array(bytes);
                prop_assert_eq!(*public.as_bytes(), bytes);
            }

            #[test]
            fn public_key_base64_roundtrip_prop(bytes in prop::array::uniform32(any::<u8>())) {
                let public = PublicKey::from_bytes_array(bytes);
                let encoded = public.to_base64();
                let decoded = PublicKey::from_base64(&encoded);
                prop_assert!(matches!(decoded, Ok(k) if k == public));
            }

            #[test]
            fn keypair_derivation_consistent(seed: [u8; 32]) {
                let private = PrivateKey::from_bytes_array(seed);
                let public1 = private.public_key();
                let public2 = private.public_key();
                prop_assert_eq!(public1, public2);
            }
        }
    }
}
