//! Rendering of systemd-networkd documents.
//!
//! Projects resolved interface state into the two on-disk documents the
//! network-config apply mechanism consumes: a `.netdev` (interface
//! identity, keys, peers) and a `.network` (addresses, routes).
//!
//! Rendering is pure and deterministic: identical input yields
//! byte-identical output. The orchestrator relies on this to detect
//! "no change" and skip reload notifications.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::keymat::KeyPaths;
use crate::persist::FileAttrs;
use crate::spec::{InterfaceSpec, PeerSpec};

/// Mode for the netdev document; it carries preshared keys.
pub const NETDEV_MODE: u32 = 0o640;

/// Mode for the network document.
pub const NETWORK_MODE: u32 = 0o644;

/// An immutable rendered document with its target path and attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedDocument {
    /// Where the document belongs on disk.
    pub path: PathBuf,
    /// The full document text.
    pub content: String,
    /// Requested mode and ownership.
    pub attrs: FileAttrs,
}

fn doc_attrs(mode: u32, owner: Option<(u32, u32)>) -> FileAttrs {
    match owner {
        Some((uid, gid)) => FileAttrs::with_mode(mode).owned_by(uid, gid),
        None => FileAttrs::with_mode(mode),
    }
}

/// Renders the `.netdev` document for an interface.
///
/// The peer list must already be resolved (explicit peers plus the legacy
/// peer); peers render in the order given. A peer without an explicit
/// keepalive inherits the interface-level default; 0 disables the field.
#[must_use]
pub fn render_netdev(
    spec: &InterfaceSpec,
    dport: u16,
    peers: &[PeerSpec],
    key_paths: &KeyPaths,
    network_dir: &Path,
    owner: Option<(u32, u32)>,
) -> RenderedDocument {
    let mut out = String::new();

    out.push_str("[NetDev]\n");
    let _ = writeln!(out, "Name={}", spec.name);
    out.push_str("Kind=wireguard\n");
    if let Some(description) = &spec.description {
        let _ = writeln!(out, "Description={description}");
    }
    if let Some(mtu) = spec.mtu {
        let _ = writeln!(out, "MTUBytes={mtu}");
    }

    out.push_str("\n[WireGuard]\n");
    let _ = writeln!(out, "PrivateKeyFile={}", key_paths.private_path.display());
    let _ = writeln!(out, "ListenPort={dport}");
    if let Some(psk) = &spec.preshared_key {
        let _ = writeln!(out, "PresharedKey={psk}");
    }

    for peer in peers {
        out.push_str("\n[WireGuardPeer]\n");
        let _ = writeln!(out, "PublicKey={}", peer.public_key);
        if let Some(endpoint) = &peer.endpoint {
            let _ = writeln!(out, "Endpoint={endpoint}");
        }
        if !peer.allowed_ips.is_empty() {
            let ips: Vec<String> = peer.allowed_ips.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "AllowedIPs={}", ips.join(", "));
        }
        let keepalive = peer.persistent_keepalive.unwrap_or(spec.persistent_keepalive);
        if keepalive > 0 {
            let _ = writeln!(out, "PersistentKeepalive={keepalive}");
        }
        if let Some(psk) = &peer.preshared_key {
            let _ = writeln!(out, "PresharedKey={psk}");
        }
    }

    RenderedDocument {
        path: network_dir.join(format!("{}.netdev", spec.name)),
        content: out,
        attrs: doc_attrs(NETDEV_MODE, owner),
    }
}

/// Renders the `.network` document for an interface: addresses (with
/// optional point-to-point peer address) and routes, verbatim and in
/// input order.
#[must_use]
pub fn render_network(
    spec: &InterfaceSpec,
    network_dir: &Path,
    owner: Option<(u32, u32)>,
) -> RenderedDocument {
    let mut out = String::new();

    out.push_str("[Match]\n");
    let _ = writeln!(out, "Name={}", spec.name);

    for entry in &spec.addresses {
        out.push_str("\n[Address]\n");
        let _ = writeln!(out, "Address={}", entry.address);
        if let Some(peer) = &entry.peer {
            let _ = writeln!(out, "Peer={peer}");
        }
    }

    for route in &spec.routes {
        out.push_str("\n[Route]\n");
        for (key, value) in route {
            let _ = writeln!(out, "{key}={value}");
        }
    }

    RenderedDocument {
        path: network_dir.join(format!("{}.network", spec.name)),
        content: out,
        attrs: doc_attrs(NETWORK_MODE, owner),
    }
}
