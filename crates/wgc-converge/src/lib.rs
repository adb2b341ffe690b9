//! Convergence engine for declarative WireGuard interface state.
//!
//! Given an [`InterfaceSpec`] describing one WireGuard interface — key
//! material, addressing, peers and an optional ingress firewall rule —
//! the engine brings the host-local artifacts into agreement with it:
//! key files under the key directory, a systemd-networkd `.netdev` and
//! `.network` document pair, and the firewall rule. Work that is already
//! correct is skipped, and a reload notification is emitted only when
//! something actually changed.
//!
//! External effects (key generation, file persistence, firewall
//! assertion, reload) are collaborator traits with in-memory fakes, so
//! the whole pass is testable without touching the host.
//!
//! # Example
//!
//! ```
//! use wgc_converge::{
//!     InterfaceSpec, MemoryFirewall, MemoryStore, Orchestrator, PeerSpec,
//!     RecordingReload, Settings, X25519Generator,
//! };
//!
//! let mut spec = InterfaceSpec::new("wg0");
//! spec.dport = Some(51820);
//! spec.peers.push(PeerSpec::new("lD54cDSEJtZvuSfTLQdBiOtPcz09aKxVEFV4AUvfVFE="));
//!
//! let mut orchestrator = Orchestrator::new(
//!     Settings::new("/etc/wireguard", "/etc/systemd/network"),
//!     X25519Generator::new(),
//!     MemoryStore::new(),
//!     MemoryFirewall::new(),
//!     RecordingReload::new(),
//! );
//! let report = orchestrator.apply(&spec)?;
//! assert!(report.changed());
//! # Ok::<(), wgc_converge::ConvergeError>(())
//! ```

pub mod apply;
pub mod error;
pub mod firewall;
pub mod keymat;
pub mod peers;
pub mod persist;
pub mod render;
pub mod spec;

pub use apply::{
    ApplyReport, Orchestrator, RecordingReload, ReloadNotifier, Settings, Step, StepOutcome,
    StepReport,
};
pub use error::{ConvergeError, Result};
pub use firewall::{
    Chain, FirewallManager, FirewallRule, MemoryFirewall, Protocol, RuleAction, RuleOutcome,
    compose_rule,
};
pub use keymat::{
    KeyGenerator, KeyMaterialOutcome, KeyMaterialPlan, KeyPaths, PrivateKeySource,
    X25519Generator,
};
pub use peers::build_peer_set;
pub use persist::{FileAttrs, FileStore, FsStore, MemoryStore, WriteOutcome, WritePolicy};
pub use render::{RenderedDocument, render_netdev, render_network};
pub use spec::{AddressEntry, InterfaceSpec, PeerSpec, RouteEntry, RouteValue};
