//! Declarative interface specification and boundary validation.
//!
//! An [`InterfaceSpec`] is the caller-supplied description of one WireGuard
//! interface: identity, addressing, peers, key material and the optional
//! firewall surface. It is constructed once per convergence pass, either
//! programmatically or from JSON (field names are camelCase on the wire).
//!
//! Validation happens here, at the boundary, before the orchestrator
//! performs any write.

use std::net::IpAddr;

use indexmap::IndexMap;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{ConvergeError, Result};
use wgc_keys::{PresharedKey, PrivateKey};

/// Lowest UDP listen port an interface may use.
pub const DPORT_MIN: u16 = 1024;

/// Highest UDP listen port an interface may use.
pub const DPORT_MAX: u16 = 65000;

/// Lowest acceptable MTU (IPv6 minimum link MTU).
pub const MTU_MIN: u16 = 1280;

/// Highest acceptable MTU.
pub const MTU_MAX: u16 = 9000;

/// Maximum length of a Linux network interface name.
pub const MAX_NAME_LENGTH: usize = 15;

/// One address assigned to the interface, optionally paired with a
/// point-to-point peer address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressEntry {
    /// The address in CIDR notation.
    pub address: IpNet,
    /// Optional point-to-point peer address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<IpNet>,
}

/// A free-form route value: systemd-networkd route options are either
/// strings or booleans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteValue {
    /// A boolean option, rendered as `true`/`false`.
    Bool(bool),
    /// A string option, rendered verbatim.
    Str(String),
}

impl std::fmt::Display for RouteValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// One route entry: an ordered key/value map passed through verbatim to
/// the rendered network document.
pub type RouteEntry = IndexMap<String, RouteValue>;

/// A remote peer the interface may exchange traffic with.
///
/// The public key is kept as an opaque base64 string: peer keys are
/// externally supplied identity material and are not length-validated
/// here (cryptographic correctness is out of scope).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSpec {
    /// The peer's public key (base64).
    pub public_key: String,
    /// Optional endpoint as `host:port`; the host may be a DNS name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// IP ranges this peer is allowed to send traffic from.
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
    /// Persistent keepalive interval in seconds; 0 disables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
    /// Optional preshared key for this peer (base64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
}

impl PeerSpec {
    /// Creates a peer with the given public key and no other settings.
    #[must_use]
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            endpoint: None,
            allowed_ips: Vec::new(),
            persistent_keepalive: None,
            preshared_key: None,
        }
    }
}

/// Declarative state for one WireGuard interface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSpec {
    /// Interface name, e.g. `wg0`.
    pub name: String,
    /// UDP listen port. Derived from the name's trailing digits when
    /// absent; must fall in [`DPORT_MIN`]..=[`DPORT_MAX`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dport: Option<u16>,
    /// Optional MTU in [`MTU_MIN`]..=[`MTU_MAX`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Addresses assigned to the interface, in order.
    #[serde(default)]
    pub addresses: Vec<AddressEntry>,
    /// Routes bound to the interface, in order.
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
    /// Default persistent keepalive for peers without an explicit value;
    /// 0 disables.
    #[serde(default)]
    pub persistent_keepalive: u16,
    /// Literal private key (base64). When set it is authoritative and
    /// written to disk every pass; when absent a key is generated once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Interface-level preshared key (base64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
    /// Legacy single-peer public key. Mutually exclusive with `peers`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Legacy single-peer endpoint as `host:port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Explicit peers, in order.
    #[serde(default)]
    pub peers: Vec<PeerSpec>,
    /// Whether to assert an ingress firewall rule for the listen port.
    #[serde(default)]
    pub manage_firewall: bool,
    /// Interface inbound traffic arrives on, for the firewall rule.
    #[serde(default)]
    pub input_interface: String,
    /// Source addresses the firewall rule permits.
    #[serde(default)]
    pub source_addresses: Vec<IpAddr>,
    /// Destination addresses the firewall rule permits; empty means
    /// "any/all local addresses".
    #[serde(default)]
    pub destination_addresses: Vec<IpAddr>,
}

impl InterfaceSpec {
    /// Creates a minimal spec with the given name. Callers fill in the
    /// remaining fields directly.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dport: None,
            mtu: None,
            description: None,
            addresses: Vec::new(),
            routes: Vec::new(),
            persistent_keepalive: 0,
            private_key: None,
            preshared_key: None,
            public_key: None,
            endpoint: None,
            peers: Vec::new(),
            manage_firewall: false,
            input_interface: String::new(),
            source_addresses: Vec::new(),
            destination_addresses: Vec::new(),
        }
    }

    /// Resolves the UDP listen port: the explicit `dport` if present,
    /// otherwise the trailing decimal digits of the interface name.
    ///
    /// # Errors
    ///
    /// Returns a validation error if no port can be derived or the
    /// result falls outside [`DPORT_MIN`]..=[`DPORT_MAX`].
    pub fn listen_port(&self) -> Result<u16> {
        let port = match self.dport {
            Some(port) => port,
            None => {
                let digit_count = self
                    .name
                    .chars()
                    .rev()
                    .take_while(char::is_ascii_digit)
                    .count();
                let digits = &self.name[self.name.len() - digit_count..];
                if digits.is_empty() {
                    return Err(ConvergeError::validation(
                        "dport",
                        format!(
                            "not set and interface name '{}' has no trailing digits to derive it from",
                            self.name
                        ),
                    ));
                }
                digits.parse::<u16>().map_err(|_| {
                    ConvergeError::validation(
                        "dport",
                        format!("trailing digits of '{}' do not form a valid port", self.name),
                    )
                })?
            }
        };
        if !(DPORT_MIN..=DPORT_MAX).contains(&port) {
            return Err(ConvergeError::validation(
                "dport",
                format!("port {port} outside range {DPORT_MIN}..={DPORT_MAX}"),
            ));
        }
        Ok(port)
    }

    /// Validates every invariant of the spec. Called by the orchestrator
    /// before any write; no mutation happens if this fails.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConvergeError::validation("name", "must not be empty"));
        }
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(ConvergeError::validation(
                "name",
                format!("longer than {MAX_NAME_LENGTH} characters"),
            ));
        }
        if self.name.contains('/') || self.name.chars().any(char::is_whitespace) {
            return Err(ConvergeError::validation(
                "name",
                "must not contain '/' or whitespace",
            ));
        }

        self.listen_port()?;

        if let Some(mtu) = self.mtu {
            if !(MTU_MIN..=MTU_MAX).contains(&mtu) {
                return Err(ConvergeError::validation(
                    "mtu",
                    format!("{mtu} outside range {MTU_MIN}..={MTU_MAX}"),
                ));
            }
        }

        // Exactly one of the peer list and the legacy single-peer form.
        match (self.peers.is_empty(), self.public_key.is_some()) {
            (true, false) => {
                return Err(ConvergeError::validation(
                    "peers",
                    "either 'peers' or the legacy 'publicKey' must be provided",
                ));
            }
            (false, true) => {
                return Err(ConvergeError::validation(
                    "peers",
                    "'peers' and the legacy 'publicKey' are mutually exclusive",
                ));
            }
            _ => {}
        }

        if let Some(key) = &self.private_key {
            PrivateKey::from_base64(key)
                .map_err(|e| ConvergeError::validation("privateKey", e.to_string()))?;
        }
        if let Some(key) = &self.preshared_key {
            PresharedKey::from_base64(key)
                .map_err(|e| ConvergeError::validation("presharedKey", e.to_string()))?;
        }

        if let Some(endpoint) = &self.endpoint {
            validate_endpoint("endpoint", endpoint)?;
        }

        for (index, peer) in self.peers.iter().enumerate() {
            if peer.public_key.is_empty() {
                return Err(ConvergeError::validation(
                    format!("peers[{index}].publicKey"),
                    "must not be empty",
                ));
            }
            if let Some(endpoint) = &peer.endpoint {
                validate_endpoint(format!("peers[{index}].endpoint"), endpoint)?;
            }
            if let Some(key) = &peer.preshared_key {
                PresharedKey::from_base64(key).map_err(|e| {
                    ConvergeError::validation(format!("peers[{index}].presharedKey"), e.to_string())
                })?;
            }
        }

        if let Some(key) = &self.public_key {
            if key.is_empty() {
                return Err(ConvergeError::validation("publicKey", "must not be empty"));
            }
        }

        Ok(())
    }
}

fn validate_endpoint(field: impl Into<String>, endpoint: &str) -> Result<()> {
    let valid = endpoint
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if valid {
        Ok(())
    } else {
        Err(ConvergeError::validation(
            field,
            format!("'{endpoint}' is not a host:port pair"),
        ))
    }
}
