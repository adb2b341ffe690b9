//! Host-side collaborator implementations.
//!
//! Installing firewall rules and reloading systemd-networkd are outside
//! this tool's scope; these implementations log what an external
//! subsystem should do.

use tracing::info;

use wgc_converge::{FirewallManager, FirewallRule, ReloadNotifier, Result, RuleOutcome};

/// Logs the composed rule for an external firewall subsystem to pick up.
///
/// Reports [`RuleOutcome::Unchanged`] so that reload notification stays
/// driven by document changes.
#[derive(Debug, Default)]
pub struct LogFirewall;

impl FirewallManager for LogFirewall {
    fn assert_rule(&mut self, rule: &FirewallRule) -> Result<RuleOutcome> {
        let destinations = rule
            .destination_addresses
            .as_ref()
            .map_or_else(|| "any".to_string(), |addrs| format!("{addrs:?}"));
        info!(
            rule = %rule.name,
            action = %rule.action,
            chain = %rule.chain,
            proto = %rule.proto,
            dport = rule.dport,
            input_interface = %rule.input_interface,
            destinations = %destinations,
            "firewall rule requested"
        );
        Ok(RuleOutcome::Unchanged)
    }
}

/// Logs the reload signal for the network-config apply mechanism.
#[derive(Debug, Default)]
pub struct LogReload;

impl ReloadNotifier for LogReload {
    fn notify(&mut self, interface: &str) -> Result<()> {
        info!(interface, "configuration changed, networkd reload required");
        Ok(())
    }
}
