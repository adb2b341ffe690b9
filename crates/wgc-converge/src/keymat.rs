//! Key material resolution and convergence.
//!
//! Each interface owns a private/public key file pair. The private key is
//! either supplied literally in the spec (authoritative, overwritten every
//! pass) or generated exactly once: an existing generated key is never
//! clobbered, even if generation would now behave differently. The public
//! key file is re-derived whenever the private key content changed or the
//! public key file is absent.
//!
//! Key files hold base64 text with a trailing newline, matching what
//! `wg genkey`/`wg pubkey` produce.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use wgc_keys::PrivateKey;

use crate::error::{ConvergeError, Result};
use crate::persist::{FileAttrs, FileStore, WriteOutcome, WritePolicy};
use crate::spec::InterfaceSpec;

/// Mode for the private key file: owner read/write, restricted group read.
pub const PRIVATE_KEY_MODE: u32 = 0o640;

/// Mode for the public key file: owner-only by policy.
pub const PUBLIC_KEY_MODE: u32 = 0o600;

/// On-disk locations of an interface's key pair. Exclusively owned by one
/// interface; paths are keyed by interface name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPaths {
    /// Path of the private key file.
    pub private_path: PathBuf,
    /// Path of the public key file.
    pub public_path: PathBuf,
}

impl KeyPaths {
    /// Derives the key pair paths for an interface under `key_dir`.
    #[must_use]
    pub fn for_interface(key_dir: &Path, name: &str) -> Self {
        Self {
            private_path: key_dir.join(name),
            public_path: key_dir.join(format!("{name}.pub")),
        }
    }
}

/// Where the private key content comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrivateKeySource {
    /// Externally supplied key (base64), authoritative every pass.
    Literal(String),
    /// Generate via the key tool, only if no key file exists yet.
    Generate,
}

/// The resolved plan for an interface's key material.
#[derive(Clone, Debug)]
pub struct KeyMaterialPlan {
    /// Target key file paths.
    pub paths: KeyPaths,
    /// Private key source branch.
    pub source: PrivateKeySource,
}

/// Resolves the key material plan for a spec.
///
/// # Errors
///
/// Returns a validation error if a literal private key is not 32 base64
/// bytes.
pub fn resolve(spec: &InterfaceSpec, paths: KeyPaths) -> Result<KeyMaterialPlan> {
    let source = match &spec.private_key {
        Some(literal) => {
            PrivateKey::from_base64(literal)
                .map_err(|e| ConvergeError::validation("privateKey", e.to_string()))?;
            PrivateKeySource::Literal(literal.clone())
        }
        None => PrivateKeySource::Generate,
    };
    Ok(KeyMaterialPlan { paths, source })
}

/// External key tool: generates private keys and derives public keys.
/// Both calls are synchronous and may fail with
/// [`ConvergeError::ExternalTool`].
pub trait KeyGenerator {
    /// Generates a new private key, returned as base64.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::ExternalTool`] if the tool is unavailable.
    fn generate_private(&mut self) -> Result<String>;

    /// Derives the public key (base64) from private key base64 content.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::ExternalTool`] if the content cannot be
    /// interpreted as a private key.
    fn derive_public(&mut self, private_b64: &str) -> Result<String>;
}

/// Pure-Rust key tool backed by `wgc-keys` (x25519-dalek).
#[derive(Debug, Default)]
pub struct X25519Generator;

impl X25519Generator {
    /// Creates the generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl KeyGenerator for X25519Generator {
    fn generate_private(&mut self) -> Result<String> {
        Ok(PrivateKey::generate().to_base64())
    }

    fn derive_public(&mut self, private_b64: &str) -> Result<String> {
        let private = PrivateKey::from_base64(private_b64)
            .map_err(|e| ConvergeError::external_tool("x25519", e.to_string()))?;
        Ok(private.public_key().to_base64())
    }
}

/// What the key material convergence changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyMaterialOutcome {
    /// Outcome of the private key file write.
    pub private: WriteOutcome,
    /// Outcome of the public key file write.
    pub public: WriteOutcome,
}

impl KeyMaterialOutcome {
    /// Whether either key file changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.private == WriteOutcome::Written || self.public == WriteOutcome::Written
    }
}

fn key_file(b64: &str) -> String {
    format!("{b64}\n")
}

fn attrs(mode: u32, owner: Option<(u32, u32)>) -> FileAttrs {
    match owner {
        Some((uid, gid)) => FileAttrs::with_mode(mode).owned_by(uid, gid),
        None => FileAttrs::with_mode(mode),
    }
}

/// Executes a key material plan against the store.
///
/// The generator is consulted only when a key is actually needed: never
/// for an existing generated private key, and for public key derivation
/// only when the private key changed or the public key file is absent.
///
/// # Errors
///
/// Any failure here aborts the convergence pass: keys are a hard
/// prerequisite for the rendered documents.
pub fn converge<G: KeyGenerator, S: FileStore>(
    plan: &KeyMaterialPlan,
    generator: &mut G,
    store: &mut S,
    owner: Option<(u32, u32)>,
) -> Result<KeyMaterialOutcome> {
    let private_attrs = attrs(PRIVATE_KEY_MODE, owner);
    let public_attrs = attrs(PUBLIC_KEY_MODE, owner);

    let private = match &plan.source {
        PrivateKeySource::Literal(key) => store.write(
            &plan.paths.private_path,
            key_file(key).as_bytes(),
            &private_attrs,
            WritePolicy::Overwrite,
        )?,
        PrivateKeySource::Generate => {
            if store.read(&plan.paths.private_path)?.is_some() {
                debug!(
                    path = %plan.paths.private_path.display(),
                    "private key exists, generation skipped"
                );
                WriteOutcome::Unchanged
            } else {
                let key = generator.generate_private()?;
                info!(
                    path = %plan.paths.private_path.display(),
                    "generated new private key"
                );
                store.write(
                    &plan.paths.private_path,
                    key_file(&key).as_bytes(),
                    &private_attrs,
                    WritePolicy::CreateOnly,
                )?
            }
        }
    };

    let public_missing = store.read(&plan.paths.public_path)?.is_none();
    let public = if private == WriteOutcome::Written || public_missing {
        let content = store.read(&plan.paths.private_path)?.ok_or_else(|| {
            ConvergeError::persistence(
                &plan.paths.private_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "private key file vanished"),
            )
        })?;
        let private_b64 = String::from_utf8(content).map_err(|_| {
            ConvergeError::external_tool("derive-public", "private key file is not valid UTF-8")
        })?;
        let public_b64 = generator.derive_public(private_b64.trim())?;
        store.write(
            &plan.paths.public_path,
            key_file(&public_b64).as_bytes(),
            &public_attrs,
            WritePolicy::Overwrite,
        )?
    } else {
        WriteOutcome::Unchanged
    };

    Ok(KeyMaterialOutcome { private, public })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use crate::spec::InterfaceSpec;

    /// Wraps the real generator and counts how often it is consulted.
    struct CountingGenerator {
        inner: X25519Generator,
        generate_calls: usize,
        derive_calls: usize,
    }

    impl CountingGenerator {
        fn new() -> Self {
            Self {
                inner: X25519Generator::new(),
                generate_calls: 0,
                derive_calls: 0,
            }
        }
    }

    impl KeyGenerator for CountingGenerator {
        fn generate_private(&mut self) -> Result<String> {
            self.generate_calls += 1;
            self.inner.generate_private()
        }

        fn derive_public(&mut self, private_b64: &str) -> Result<String> {
            self.derive_calls += 1;
            self.inner.derive_public(private_b64)
        }
    }

    /// A key tool that is unavailable.
    struct FailingGenerator;

    impl KeyGenerator for FailingGenerator {
        fn generate_private(&mut self) -> Result<String> {
            Err(ConvergeError::external_tool("wg", "binary not found"))
        }

        fn derive_public(&mut self, _private_b64: &str) -> Result<String> {
            Err(ConvergeError::external_tool("wg", "binary not found"))
        }
    }

    fn paths() -> KeyPaths {
        KeyPaths::for_interface(Path::new("/etc/wireguard"), "wg0")
    }

    fn generate_plan() -> KeyMaterialPlan {
        KeyMaterialPlan {
            paths: paths(),
            source: PrivateKeySource::Generate,
        }
    }

    #[test]
    fn key_paths_derived_from_interface_name() {
        let paths = paths();
        assert_eq!(paths.private_path, Path::new("/etc/wireguard/wg0"));
        assert_eq!(paths.public_path, Path::new("/etc/wireguard/wg0.pub"));
    }

    #[test]
    fn resolve_rejects_short_literal() {
        let mut spec = InterfaceSpec::new("wg0");
        spec.private_key = Some("foo==".to_string());
        let err = resolve(&spec, paths()).expect_err("invalid literal");
        assert!(err.is_validation());
    }

    #[test]
    fn fresh_interface_generates_and_derives() {
        let mut store = MemoryStore::new();
        let mut generator = CountingGenerator::new();

        let outcome =
            converge(&generate_plan(), &mut generator, &mut store, None).expect("converge");

        assert!(outcome.changed());
        assert_eq!(generator.generate_calls, 1);
        assert_eq!(generator.derive_calls, 1);

        let private = store.text(&paths().private_path).expect("private");
        let public = store.text(&paths().public_path).expect("public");
        assert!(private.ends_with('\n'));
        assert!(public.ends_with('\n'));

        // Derived public key matches the stored private key.
        let expected = PrivateKey::from_base64(private.trim())
            .expect("valid key")
            .public_key()
            .to_base64();
        assert_eq!(public.trim(), expected);
    }

    #[test]
    fn existing_private_key_never_regenerated() {
        let mut store = MemoryStore::new();
        let mut generator = CountingGenerator::new();
        converge(&generate_plan(), &mut generator, &mut store, None).expect("first pass");

        let before = store.text(&paths().private_path).expect("private").to_string();
        store.reset_write_count();

        let outcome =
            converge(&generate_plan(), &mut generator, &mut store, None).expect("second pass");

        assert!(!outcome.changed());
        assert_eq!(generator.generate_calls, 1);
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.text(&paths().private_path), Some(before.as_str()));
    }

    #[test]
    fn missing_public_key_rederived_without_touching_private() {
        let mut store = MemoryStore::new();
        let mut generator = CountingGenerator::new();

        let key = PrivateKey::generate();
        store.seed(
            paths().private_path,
            key_file(&key.to_base64()).into_bytes(),
            FileAttrs::with_mode(PRIVATE_KEY_MODE),
        );

        let outcome =
            converge(&generate_plan(), &mut generator, &mut store, None).expect("converge");

        assert_eq!(outcome.private, WriteOutcome::Unchanged);
        assert_eq!(outcome.public, WriteOutcome::Written);
        assert_eq!(generator.generate_calls, 0);
        assert_eq!(
            store.text(&paths().public_path).map(str::trim),
            Some(key.public_key().to_base64().as_str())
        );
    }

    #[test]
    fn literal_key_overwrites_every_pass_and_rederives_public() {
        let mut store = MemoryStore::new();
        let mut generator = CountingGenerator::new();

        let old = PrivateKey::generate();
        store.seed(
            paths().private_path,
            key_file(&old.to_base64()).into_bytes(),
            FileAttrs::with_mode(PRIVATE_KEY_MODE),
        );
        store.seed(
            paths().public_path,
            key_file(&old.public_key().to_base64()).into_bytes(),
            FileAttrs::with_mode(PUBLIC_KEY_MODE),
        );

        let new = PrivateKey::generate();
        let plan = KeyMaterialPlan {
            paths: paths(),
            source: PrivateKeySource::Literal(new.to_base64()),
        };

        let outcome = converge(&plan, &mut generator, &mut store, None).expect("converge");
        assert_eq!(outcome.private, WriteOutcome::Written);
        assert_eq!(outcome.public, WriteOutcome::Written);
        assert_eq!(
            store.text(&paths().public_path).map(str::trim),
            Some(new.public_key().to_base64().as_str())
        );

        // Identical literal on the next pass: nothing to do.
        store.reset_write_count();
        let outcome = converge(&plan, &mut generator, &mut store, None).expect("converge");
        assert!(!outcome.changed());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn unavailable_tool_surfaces_external_tool_error() {
        let mut store = MemoryStore::new();
        let err = converge(&generate_plan(), &mut FailingGenerator, &mut store, None)
            .expect_err("tool failure");
        assert!(matches!(err, ConvergeError::ExternalTool { .. }));
        assert!(store.content(&paths().private_path).is_none());
    }

    #[test]
    fn owner_applied_to_key_files() {
        let mut store = MemoryStore::new();
        let mut generator = X25519Generator::new();

        converge(&generate_plan(), &mut generator, &mut store, Some((0, 0)))
            .expect("converge");

        let attrs = store.attrs(&paths().private_path).expect("attrs");
        assert_eq!(attrs.mode, PRIVATE_KEY_MODE);
        assert_eq!(attrs.uid, Some(0));
        assert_eq!(attrs.gid, Some(0));
    }
}
