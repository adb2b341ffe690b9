//! Peer set resolution.
//!
//! Merges the explicit peer list with the legacy single-peer form
//! (top-level `publicKey`/`endpoint`). Ordering is stable: explicit peers
//! first, in input order, then the legacy peer appended last.

use crate::spec::{InterfaceSpec, PeerSpec};

/// Builds the resolved, ordered peer set for an interface.
///
/// When the legacy `public_key` field is set, a synthetic peer carrying
/// only that key and the top-level endpoint is appended. Duplicate public
/// keys across explicit and legacy peers are passed through unchanged;
/// de-duplicating would mask a caller error.
#[must_use]
pub fn build_peer_set(spec: &InterfaceSpec) -> Vec<PeerSpec> {
    let mut peers = spec.peers.clone();
    if let Some(public_key) = &spec.public_key {
        peers.push(PeerSpec {
            public_key: public_key.clone(),
            endpoint: spec.endpoint.clone(),
            allowed_ips: Vec::new(),
            persistent_keepalive: None,
            preshared_key: None,
        });
    }
    peers
}
