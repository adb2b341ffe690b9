//! Curve25519 key types for WireGuard interface convergence.
//!
//! WireGuard identifies interfaces and peers by 32-byte Curve25519 keys,
//! exchanged on disk and in configuration files as base64 text. This crate
//! provides the key types the convergence engine needs: generation, base64
//! encoding, public-key derivation, and redacted debug output for secret
//! material.

pub mod error;
mod keys;

pub use error::KeyError;
pub use keys::{KEY_SIZE, PresharedKey, PrivateKey, PublicKey};
