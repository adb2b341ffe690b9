//! The convergence orchestrator.
//!
//! Sequences one pass for one interface: validate, converge key material,
//! resolve the peer set, assert the firewall rule, render and write both
//! documents, and emit a single coalesced reload notification when
//! anything the network stack consumes actually changed.
//!
//! Failure semantics: validation aborts before any write; a key material
//! failure aborts the pass (keys are a hard prerequisite); firewall and
//! per-document failures are recorded in the report and the remaining
//! independent steps still run.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{ConvergeError, Result};
use crate::firewall::{FirewallManager, RuleOutcome, compose_rule};
use crate::keymat::{self, KeyGenerator, KeyPaths};
use crate::peers::build_peer_set;
use crate::persist::{FileStore, WriteOutcome, WritePolicy};
use crate::render::{RenderedDocument, render_netdev, render_network};
use crate::spec::InterfaceSpec;

/// Host-local settings for a convergence pass. Everything the engine
/// would otherwise have to discover from the environment is supplied
/// here by the caller.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Directory holding per-interface key files.
    pub key_dir: PathBuf,
    /// Directory holding the rendered networkd documents.
    pub network_dir: PathBuf,
    /// Whether written files should be chowned to root:root. Requires
    /// the pass to run with the privilege to do so.
    pub chown_root: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("/etc/wireguard"),
            network_dir: PathBuf::from("/etc/systemd/network"),
            chown_root: false,
        }
    }
}

impl Settings {
    /// Settings rooted at the given directories.
    #[must_use]
    pub fn new(key_dir: impl Into<PathBuf>, network_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            network_dir: network_dir.into(),
            chown_root: false,
        }
    }

    /// Chown written files to root:root.
    #[must_use]
    pub fn with_root_ownership(mut self) -> Self {
        self.chown_root = true;
        self
    }

    fn owner(&self) -> Option<(u32, u32)> {
        self.chown_root.then_some((0, 0))
    }
}

/// External network-config reload collaborator. The engine produces the
/// "this interface's configuration changed" signal; applying it is the
/// collaborator's job.
pub trait ReloadNotifier {
    /// Notifies that the interface's configuration changed.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the failure is recorded in the apply
    /// report and does not undo prior steps.
    fn notify(&mut self, interface: &str) -> Result<()>;
}

/// Test notifier that records every notification.
#[derive(Debug, Default)]
pub struct RecordingReload {
    notifications: Vec<String>,
}

impl RecordingReload {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The interfaces notified so far, in order.
    #[must_use]
    pub fn notifications(&self) -> &[String] {
        &self.notifications
    }
}

impl ReloadNotifier for RecordingReload {
    fn notify(&mut self, interface: &str) -> Result<()> {
        self.notifications.push(interface.to_string());
        Ok(())
    }
}

/// A step of the convergence pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Private key file convergence.
    PrivateKey,
    /// Public key file convergence.
    PublicKey,
    /// Firewall rule assertion.
    FirewallRule,
    /// Netdev document write.
    NetdevDocument,
    /// Network document write.
    NetworkDocument,
    /// Reload notification.
    Reload,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateKey => write!(f, "private-key"),
            Self::PublicKey => write!(f, "public-key"),
            Self::FirewallRule => write!(f, "firewall-rule"),
            Self::NetdevDocument => write!(f, "netdev-document"),
            Self::NetworkDocument => write!(f, "network-document"),
            Self::Reload => write!(f, "reload"),
        }
    }
}

/// Outcome of one step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The step changed host state.
    Changed,
    /// The step found the state already convergent.
    Unchanged,
    /// The step failed; siblings were still attempted.
    Failed(ConvergeError),
}

impl From<WriteOutcome> for StepOutcome {
    fn from(outcome: WriteOutcome) -> Self {
        match outcome {
            WriteOutcome::Written => Self::Changed,
            WriteOutcome::Unchanged => Self::Unchanged,
        }
    }
}

/// One step's report entry.
#[derive(Debug)]
pub struct StepReport {
    /// Which step ran.
    pub step: Step,
    /// What it did.
    pub outcome: StepOutcome,
}

/// Result of one convergence pass.
#[derive(Debug)]
pub struct ApplyReport {
    /// The converged interface.
    pub interface: String,
    /// Per-step outcomes, in execution order.
    pub steps: Vec<StepReport>,
}

impl ApplyReport {
    fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            steps: Vec::new(),
        }
    }

    fn push(&mut self, step: Step, outcome: StepOutcome) {
        self.steps.push(StepReport { step, outcome });
    }

    /// Whether any step changed host state.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.outcome, StepOutcome::Changed))
    }

    /// Number of steps that changed host state.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Changed))
            .count()
    }

    /// The first failed step, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<(&Step, &ConvergeError)> {
        self.steps.iter().find_map(|s| match &s.outcome {
            StepOutcome::Failed(e) => Some((&s.step, e)),
            _ => None,
        })
    }

    /// Whether every step succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.first_failure().is_none()
    }
}

/// Drives a full convergence pass for one interface at a time.
///
/// Collaborators are injected: the key tool, the persistence layer, the
/// firewall manager and the reload notifier. One orchestrator can apply
/// any number of interface specs; distinct interfaces touch disjoint
/// paths by construction.
pub struct Orchestrator<G, S, F, R> {
    settings: Settings,
    keygen: G,
    store: S,
    firewall: F,
    reload: R,
}

impl<G, S, F, R> Orchestrator<G, S, F, R>
where
    G: KeyGenerator,
    S: FileStore,
    F: FirewallManager,
    R: ReloadNotifier,
{
    /// Creates an orchestrator with the given settings and collaborators.
    pub fn new(settings: Settings, keygen: G, store: S, firewall: F, reload: R) -> Self {
        Self {
            settings,
            keygen,
            store,
            firewall,
            reload,
        }
    }

    /// The persistence collaborator (for inspection in tests).
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The firewall collaborator (for inspection in tests).
    pub fn firewall(&self) -> &F {
        &self.firewall
    }

    /// The reload collaborator (for inspection in tests).
    pub fn reload(&self) -> &R {
        &self.reload
    }

    /// Runs one convergence pass.
    ///
    /// # Errors
    ///
    /// Returns an error for spec validation failures (before any write)
    /// and for key material failures (which abort the pass). All other
    /// failures are recorded per-step in the returned report.
    pub fn apply(&mut self, spec: &InterfaceSpec) -> Result<ApplyReport> {
        spec.validate()?;
        let dport = spec.listen_port()?;
        let owner = self.settings.owner();

        debug!(interface = %spec.name, dport, "starting convergence pass");

        // Keys first: the rendered netdev references the private key
        // file, and the public key file must exist before any
        // collaborator that inspects it.
        let key_paths = KeyPaths::for_interface(&self.settings.key_dir, &spec.name);
        let plan = keymat::resolve(spec, key_paths.clone())?;
        let keys = keymat::converge(&plan, &mut self.keygen, &mut self.store, owner)?;

        let mut report = ApplyReport::new(&spec.name);
        report.push(Step::PrivateKey, keys.private.into());
        report.push(Step::PublicKey, keys.public.into());

        let peers = build_peer_set(spec);

        let mut notify_needed = false;

        if let Some(rule) = compose_rule(spec, dport) {
            match self.firewall.assert_rule(&rule) {
                Ok(RuleOutcome::Changed) => {
                    info!(interface = %spec.name, rule = %rule.name, "firewall rule asserted");
                    notify_needed = true;
                    report.push(Step::FirewallRule, StepOutcome::Changed);
                }
                Ok(RuleOutcome::Unchanged) => {
                    report.push(Step::FirewallRule, StepOutcome::Unchanged);
                }
                Err(e) => {
                    warn!(interface = %spec.name, error = %e, "firewall rule assertion failed");
                    report.push(Step::FirewallRule, StepOutcome::Failed(e));
                }
            }
        }

        let netdev = render_netdev(
            spec,
            dport,
            &peers,
            &key_paths,
            &self.settings.network_dir,
            owner,
        );
        notify_needed |= self.write_document(Step::NetdevDocument, &netdev, &mut report);

        let network = render_network(spec, &self.settings.network_dir, owner);
        notify_needed |= self.write_document(Step::NetworkDocument, &network, &mut report);

        if notify_needed {
            match self.reload.notify(&spec.name) {
                Ok(()) => {
                    info!(interface = %spec.name, "network reload notified");
                    report.push(Step::Reload, StepOutcome::Changed);
                }
                Err(e) => {
                    warn!(interface = %spec.name, error = %e, "reload notification failed");
                    report.push(Step::Reload, StepOutcome::Failed(e));
                }
            }
        }

        Ok(report)
    }

    /// Writes one rendered document; failures are recorded, not
    /// propagated, so the sibling document is still attempted. Returns
    /// whether the document changed.
    fn write_document(
        &mut self,
        step: Step,
        doc: &RenderedDocument,
        report: &mut ApplyReport,
    ) -> bool {
        match self.store.write(
            &doc.path,
            doc.content.as_bytes(),
            &doc.attrs,
            WritePolicy::Overwrite,
        ) {
            Ok(WriteOutcome::Written) => {
                info!(path = %doc.path.display(), "document written");
                report.push(step, StepOutcome::Changed);
                true
            }
            Ok(WriteOutcome::Unchanged) => {
                report.push(step, StepOutcome::Unchanged);
                false
            }
            Err(e) => {
                warn!(step = %step, error = %e, "document write failed");
                report.push(step, StepOutcome::Failed(e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::MemoryFirewall;
    use crate::keymat::X25519Generator;
    use crate::persist::MemoryStore;
    use crate::spec::PeerSpec;
    use std::path::Path;

    type TestOrchestrator = Orchestrator<X25519Generator, MemoryStore, MemoryFirewall, RecordingReload>;

    fn orchestrator() -> TestOrchestrator {
        Orchestrator::new(
            Settings::new("/etc/wireguard", "/etc/systemd/network"),
            X25519Generator::new(),
            MemoryStore::new(),
            MemoryFirewall::new(),
            RecordingReload::new(),
        )
    }

    fn simple_spec() -> InterfaceSpec {
        let mut spec = InterfaceSpec::new("wg0");
        spec.dport = Some(1338);
        spec.peers.push(PeerSpec::new("foo=="));
        spec
    }

    #[test]
    fn validation_failure_aborts_before_any_write() {
        let mut orch = orchestrator();
        let spec = InterfaceSpec::new("wg0"); // no peers, no public key

        let err = orch.apply(&spec).expect_err("invalid spec");
        assert!(err.is_validation());
        assert_eq!(orch.store().write_count(), 0);
        assert!(orch.reload().notifications().is_empty());
    }

    #[test]
    fn first_pass_writes_everything_and_notifies_once() {
        let mut orch = orchestrator();
        let mut spec = simple_spec();
        spec.manage_firewall = true;
        spec.input_interface = "eth0".to_string();

        let report = orch.apply(&spec).expect("apply");

        assert!(report.succeeded());
        assert!(report.changed());
        assert_eq!(orch.reload().notifications(), ["wg0"]);
        assert_eq!(orch.firewall().len(), 1);
        assert!(orch
            .store()
            .text(Path::new("/etc/systemd/network/wg0.netdev"))
            .is_some());
        assert!(orch
            .store()
            .text(Path::new("/etc/systemd/network/wg0.network"))
            .is_some());
    }

    #[test]
    fn second_pass_does_not_notify_again() {
        let mut orch = orchestrator();
        let spec = simple_spec();

        let report = orch.apply(&spec).expect("first apply");
        assert!(report.changed());

        let report = orch.apply(&spec).expect("second apply");
        assert!(!report.changed());
        assert_eq!(orch.reload().notifications().len(), 1);
    }

    #[test]
    fn firewall_failure_does_not_block_documents() {
        struct BrokenFirewall;
        impl FirewallManager for BrokenFirewall {
            fn assert_rule(&mut self, rule: &crate::firewall::FirewallRule) -> Result<RuleOutcome> {
                Err(ConvergeError::firewall(rule.name.clone(), "backend down"))
            }
        }

        let mut orch = Orchestrator::new(
            Settings::new("/etc/wireguard", "/etc/systemd/network"),
            X25519Generator::new(),
            MemoryStore::new(),
            BrokenFirewall,
            RecordingReload::new(),
        );
        let mut spec = simple_spec();
        spec.manage_firewall = true;

        let report = orch.apply(&spec).expect("apply");

        assert!(!report.succeeded());
        let (step, _) = report.first_failure().expect("failure");
        assert_eq!(*step, Step::FirewallRule);
        // Documents were still rendered and written.
        assert!(orch
            .store()
            .text(Path::new("/etc/systemd/network/wg0.netdev"))
            .is_some());
    }

    #[test]
    fn unmanaged_firewall_skips_the_step_entirely() {
        let mut orch = orchestrator();
        let report = orch.apply(&simple_spec()).expect("apply");

        assert!(report.steps.iter().all(|s| s.step != Step::FirewallRule));
        assert!(orch.firewall().is_empty());
    }

    #[test]
    fn report_names_the_changed_steps() {
        let mut orch = orchestrator();
        let report = orch.apply(&simple_spec()).expect("apply");

        // private key, public key, netdev, network, reload
        assert_eq!(report.change_count(), 5);
    }

    /// Store that rejects writes to one document extension, passing
    /// everything else through to an in-memory store.
    struct FailingDocStore {
        inner: MemoryStore,
        failing_extension: &'static str,
    }

    impl FileStore for FailingDocStore {
        fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
            self.inner.read(path)
        }

        fn write(
            &mut self,
            path: &Path,
            content: &[u8],
            attrs: &crate::persist::FileAttrs,
            policy: WritePolicy,
        ) -> Result<WriteOutcome> {
            if path.extension().is_some_and(|e| e == self.failing_extension) {
                return Err(ConvergeError::persistence(
                    path,
                    std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "read-only filesystem",
                    ),
                ));
            }
            self.inner.write(path, content, attrs, policy)
        }
    }

    #[test]
    fn netdev_write_failure_does_not_block_network_document() {
        let mut orch = Orchestrator::new(
            Settings::new("/etc/wireguard", "/etc/systemd/network"),
            X25519Generator::new(),
            FailingDocStore {
                inner: MemoryStore::new(),
                failing_extension: "netdev",
            },
            MemoryFirewall::new(),
            RecordingReload::new(),
        );

        let report = orch.apply(&simple_spec()).expect("apply");

        assert!(!report.succeeded());
        let (step, err) = report.first_failure().expect("failure");
        assert_eq!(*step, Step::NetdevDocument);
        assert!(matches!(err, ConvergeError::Persistence { .. }));
        // The sibling document was still rendered and written.
        assert!(orch
            .store()
            .inner
            .text(Path::new("/etc/systemd/network/wg0.network"))
            .is_some());
        assert!(orch
            .store()
            .inner
            .text(Path::new("/etc/systemd/network/wg0.netdev"))
            .is_none());
    }

    #[test]
    fn network_write_failure_does_not_block_netdev_document() {
        let mut orch = Orchestrator::new(
            Settings::new("/etc/wireguard", "/etc/systemd/network"),
            X25519Generator::new(),
            FailingDocStore {
                inner: MemoryStore::new(),
                failing_extension: "network",
            },
            MemoryFirewall::new(),
            RecordingReload::new(),
        );

        let report = orch.apply(&simple_spec()).expect("apply");

        assert!(!report.succeeded());
        let (step, _) = report.first_failure().expect("failure");
        assert_eq!(*step, Step::NetworkDocument);
        assert!(orch
            .store()
            .inner
            .text(Path::new("/etc/systemd/network/wg0.netdev"))
            .is_some());
    }

    #[test]
    fn reload_failure_is_recorded_not_propagated() {
        struct BrokenReload;
        impl ReloadNotifier for BrokenReload {
            fn notify(&mut self, interface: &str) -> Result<()> {
                Err(ConvergeError::external_tool(
                    "networkctl",
                    format!("reload failed for {interface}"),
                ))
            }
        }

        let mut orch = Orchestrator::new(
            Settings::new("/etc/wireguard", "/etc/systemd/network"),
            X25519Generator::new(),
            MemoryStore::new(),
            MemoryFirewall::new(),
            BrokenReload,
        );

        let report = orch.apply(&simple_spec()).expect("apply");

        assert!(!report.succeeded());
        let (step, _) = report.first_failure().expect("failure");
        assert_eq!(*step, Step::Reload);
        // The documents landed before the notification was attempted.
        assert!(orch
            .store()
            .text(Path::new("/etc/systemd/network/wg0.netdev"))
            .is_some());
        assert!(orch
            .store()
            .text(Path::new("/etc/systemd/network/wg0.network"))
            .is_some());
    }
}
