//! Ingress firewall rule composition.
//!
//! The composer derives *what* the rule should be; installing it is the
//! job of an external firewall manager, consumed here through the
//! [`FirewallManager`] trait.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::spec::InterfaceSpec;

/// Action a firewall rule takes on matching traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    /// Permit the traffic.
    Accept,
    /// Discard the traffic.
    Drop,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "ACCEPT"),
            Self::Drop => write!(f, "DROP"),
        }
    }
}

/// Chain a firewall rule is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chain {
    /// Traffic addressed to this host.
    Input,
    /// Traffic routed through this host.
    Forward,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "INPUT"),
            Self::Forward => write!(f, "FORWARD"),
        }
    }
}

/// Transport protocol a rule matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// UDP traffic (WireGuard's transport).
    Udp,
    /// TCP traffic.
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// An ingress rule permitting tunnel traffic to the listen port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Rule name, derived as `allow_wg_<interface>`.
    pub name: String,
    /// Action taken on matching traffic.
    pub action: RuleAction,
    /// Chain the rule is attached to.
    pub chain: Chain,
    /// Matched transport protocol.
    pub proto: Protocol,
    /// Matched destination UDP port.
    pub dport: u16,
    /// Interface inbound traffic arrives on.
    pub input_interface: String,
    /// Permitted source addresses.
    pub source_addresses: Vec<IpAddr>,
    /// Permitted destination addresses; `None` means the rule does not
    /// restrict by destination.
    pub destination_addresses: Option<Vec<IpAddr>>,
}

/// Composes the ingress rule for an interface, or `None` when the spec
/// does not ask for firewall management.
///
/// An empty destination set in the spec means "any/all local addresses"
/// and maps to an unrestricted destination.
#[must_use]
pub fn compose_rule(spec: &InterfaceSpec, dport: u16) -> Option<FirewallRule> {
    if !spec.manage_firewall {
        return None;
    }
    let destination_addresses = if spec.destination_addresses.is_empty() {
        None
    } else {
        Some(spec.destination_addresses.clone())
    };
    Some(FirewallRule {
        name: format!("allow_wg_{}", spec.name),
        action: RuleAction::Accept,
        chain: Chain::Input,
        proto: Protocol::Udp,
        dport,
        input_interface: spec.input_interface.clone(),
        source_addresses: spec.source_addresses.clone(),
        destination_addresses,
    })
}

/// Outcome of asserting a rule against the firewall backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule was created or its definition changed.
    Changed,
    /// The rule already matched the requested definition.
    Unchanged,
}

/// External firewall collaborator: asserts that a rule exists with the
/// given definition.
pub trait FirewallManager {
    /// Asserts the rule, creating or updating it as needed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConvergeError::Firewall`] if the backend rejects
    /// the rule or is unavailable.
    fn assert_rule(&mut self, rule: &FirewallRule) -> Result<RuleOutcome>;
}

/// In-memory firewall backend for tests: records asserted rules and is
/// idempotent on repeated assertion.
#[derive(Debug, Default)]
pub struct MemoryFirewall {
    rules: HashMap<String, FirewallRule>,
}

impl MemoryFirewall {
    /// Creates an empty in-memory firewall.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the currently asserted rule with the given name.
    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&FirewallRule> {
        self.rules.get(name)
    }

    /// Number of asserted rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules have been asserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FirewallManager for MemoryFirewall {
    fn assert_rule(&mut self, rule: &FirewallRule) -> Result<RuleOutcome> {
        match self.rules.get(&rule.name) {
            Some(existing) if existing == rule => Ok(RuleOutcome::Unchanged),
            _ => {
                self.rules.insert(rule.name.clone(), rule.clone());
                Ok(RuleOutcome::Changed)
            }
        }
    }
}
