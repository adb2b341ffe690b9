//! Command-line argument definitions.

use std::path::PathBuf;

use clap::Parser;

/// Converge one WireGuard interface from a declarative JSON spec.
///
/// Reads the spec, then brings the host's key files, systemd-networkd
/// documents and (optionally) firewall rule into agreement with it,
/// writing only what actually differs.
#[derive(Debug, Parser)]
#[command(name = "wgconverge", version, about)]
pub struct Cli {
    /// Path of the JSON interface spec.
    #[arg(long, value_name = "FILE")]
    pub spec: PathBuf,

    /// Directory holding per-interface key files.
    #[arg(long, value_name = "DIR", default_value = "/etc/wireguard", env = "WGC_KEY_DIR")]
    pub key_dir: PathBuf,

    /// Directory holding the rendered networkd documents.
    #[arg(
        long,
        value_name = "DIR",
        default_value = "/etc/systemd/network",
        env = "WGC_NETWORK_DIR"
    )]
    pub network_dir: PathBuf,

    /// Chown written files to root:root (requires running as root).
    #[arg(long)]
    pub chown_root: bool,

    /// Render both documents to stdout instead of writing anything.
    #[arg(long)]
    pub show: bool,
}
