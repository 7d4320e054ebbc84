//! Per-distribution package manager backends
//!
//! Each supported distribution implements [`DistroBackend`]: it knows its
//! package tables and how to spell install, query and repository commands.
//! Backends are plain values collected in a [`DistroRegistry`] that is built
//! once at startup and handed to the installer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::command_runner::CommandSpec;
use crate::error::{InstallError, Result};
use crate::mapping::{BundleRule, MappingTable};
use crate::types::{Distro, Selection};

pub mod arch;
pub mod fedora;
pub mod opensuse;

pub use arch::ArchBackend;
pub use fedora::FedoraBackend;
pub use opensuse::OpenSuseBackend;

/// Distribution-specific behaviour used by the installer.
///
/// Commands that modify the system are returned with the privileged flag
/// set; queries run as the invoking user.
pub trait DistroBackend: fmt::Debug + Send + Sync {
    fn distro(&self) -> Distro;

    /// Mapping table for a window manager / terminal / variant selection
    fn mapping_table(&self, selection: &Selection) -> MappingTable;

    /// Leaf-first bundle ordering rules
    fn bundle_rules(&self) -> &'static [BundleRule] {
        &[]
    }

    /// Toolchain packages needed before anything is built from source
    fn prerequisite_packages(&self) -> Vec<String>;

    /// Metadata refresh run once before installing, if the backend needs one
    fn refresh_command(&self) -> Option<CommandSpec> {
        None
    }

    fn install_command(&self, packages: &[String]) -> CommandSpec;

    /// Install even if the package is already present
    fn reinstall_command(&self, packages: &[String]) -> CommandSpec;

    /// Exits zero iff `package` is installed
    fn query_installed_command(&self, package: &str) -> CommandSpec;

    fn enable_repository_command(&self, repo: &str) -> Result<CommandSpec>;

    /// Follow-up run right after a repository is enabled (priority tweaks)
    fn post_enable_action(&self, _repo: &str) -> Option<CommandSpec> {
        None
    }

    /// Install a package file produced by a source build
    fn install_local_package_command(&self, path: &Path) -> CommandSpec;

    /// Build an AUR recipe inside its checkout
    fn makepkg_command(&self) -> CommandSpec {
        CommandSpec::new("makepkg").args(["-f", "--noconfirm"])
    }
}

/// All backends known to this run, keyed by distribution.
#[derive(Debug, Default)]
pub struct DistroRegistry {
    backends: BTreeMap<Distro, Box<dyn DistroBackend>>,
}

impl DistroRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Arch, Fedora and openSUSE backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ArchBackend::new()));
        registry.register(Box::new(FedoraBackend::new()));
        registry.register(Box::new(OpenSuseBackend::new()));
        registry
    }

    /// Add a backend, replacing any previous one for the same distro
    pub fn register(&mut self, backend: Box<dyn DistroBackend>) {
        self.backends.insert(backend.distro(), backend);
    }

    pub fn get(&self, distro: Distro) -> Result<&dyn DistroBackend> {
        self.backends
            .get(&distro)
            .map(|b| b.as_ref())
            .ok_or(InstallError::UnsupportedDistro(distro))
    }

    pub fn distros(&self) -> impl Iterator<Item = Distro> + '_ {
        self.backends.keys().copied()
    }
}

/// Package names in `packages` as owned strings
pub(crate) fn owned<I, S>(packages: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    packages.into_iter().map(Into::into).collect()
}
