//! Dependency-to-package mapping tables
//!
//! A [`MappingTable`] translates abstract dependency names ("notification-daemon",
//! "terminal") into a concrete package identifier plus the place it comes
//! from. Tables are built by a distro backend for one [`Selection`] and stay
//! immutable for the rest of the run.
//!
//! [`Selection`]: crate::types::Selection

use std::collections::BTreeMap;

use serde::Serialize;
use strum::{Display, EnumIter};

/// Where a package is installed from, without the details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[derive(Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RepositoryType {
    System,
    ExtraRepo,
    Manual,
}

impl RepositoryType {
    /// Buckets in installation order
    pub const fn all() -> [Self; 3] {
        [Self::System, Self::ExtraRepo, Self::Manual]
    }
}

/// A literal text substitution applied to a build recipe before building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataPatch {
    /// File relative to the source checkout (e.g. `PKGBUILD`, `Cargo.toml`)
    pub file: String,
    pub find: String,
    pub replace: String,
}

impl MetadataPatch {
    pub fn new(file: impl Into<String>, find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            find: find.into(),
            replace: replace.into(),
        }
    }

    /// Patched contents, or `None` if `find` does not occur
    pub fn apply_to(&self, contents: &str) -> Option<String> {
        if self.find.is_empty() || !contents.contains(&self.find) {
            return None;
        }
        Some(contents.replace(&self.find, &self.replace))
    }
}

/// Fixed pipeline used to build a package that no repository provides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildStrategy {
    /// AUR recipe built with makepkg and installed as a local package
    Makepkg {
        pkgbase: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        patch: Option<MetadataPatch>,
        /// Checked and installed separately before the recipe's own depends
        #[serde(skip_serializing_if = "Option::is_none")]
        shared_prerequisite: Option<String>,
    },
    /// Rust project built from a git checkout, binary copied to the prefix
    CargoGit {
        repo: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rev: Option<String>,
        binary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        patch: Option<MetadataPatch>,
        #[serde(skip_serializing_if = "Option::is_none")]
        shared_prerequisite: Option<String>,
    },
}

impl BuildStrategy {
    pub fn makepkg(pkgbase: impl Into<String>) -> Self {
        Self::Makepkg {
            pkgbase: pkgbase.into(),
            patch: None,
            shared_prerequisite: None,
        }
    }

    pub fn cargo_git(repo: impl Into<String>, binary: impl Into<String>) -> Self {
        Self::CargoGit {
            repo: repo.into(),
            rev: None,
            binary: binary.into(),
            patch: None,
            shared_prerequisite: None,
        }
    }

    pub fn with_patch(mut self, new_patch: MetadataPatch) -> Self {
        match &mut self {
            Self::Makepkg { patch, .. } | Self::CargoGit { patch, .. } => *patch = Some(new_patch),
        }
        self
    }

    pub fn with_shared_prerequisite(mut self, package: impl Into<String>) -> Self {
        match &mut self {
            Self::Makepkg {
                shared_prerequisite,
                ..
            }
            | Self::CargoGit {
                shared_prerequisite,
                ..
            } => *shared_prerequisite = Some(package.into()),
        }
        self
    }

    pub fn with_rev(mut self, new_rev: impl Into<String>) -> Self {
        if let Self::CargoGit { rev, .. } = &mut self {
            *rev = Some(new_rev.into());
        }
        self
    }

    pub fn patch(&self) -> Option<&MetadataPatch> {
        match self {
            Self::Makepkg { patch, .. } | Self::CargoGit { patch, .. } => patch.as_ref(),
        }
    }

    pub fn shared_prerequisite(&self) -> Option<&str> {
        match self {
            Self::Makepkg {
                shared_prerequisite,
                ..
            }
            | Self::CargoGit {
                shared_prerequisite,
                ..
            } => shared_prerequisite.as_deref(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Makepkg { .. } => "makepkg",
            Self::CargoGit { .. } => "cargo",
        }
    }
}

/// Source of one concrete package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PackageSource {
    /// Default distribution repositories
    System,
    /// A repository that has to be enabled first (COPR, OBS, ...)
    ExtraRepo { repo: String },
    /// Built from source
    Manual { strategy: BuildStrategy },
}

impl PackageSource {
    pub fn repository_type(&self) -> RepositoryType {
        match self {
            Self::System => RepositoryType::System,
            Self::ExtraRepo { .. } => RepositoryType::ExtraRepo,
            Self::Manual { .. } => RepositoryType::Manual,
        }
    }

    /// Repository identity for extra-repo packages
    pub fn repo(&self) -> Option<&str> {
        match self {
            Self::ExtraRepo { repo } => Some(repo),
            _ => None,
        }
    }

    pub fn strategy(&self) -> Option<&BuildStrategy> {
        match self {
            Self::Manual { strategy } => Some(strategy),
            _ => None,
        }
    }
}

/// A dependency resolved to a concrete package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMapping {
    pub package: String,
    pub source: PackageSource,
}

impl PackageMapping {
    pub fn system(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            source: PackageSource::System,
        }
    }

    pub fn extra(package: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            source: PackageSource::ExtraRepo { repo: repo.into() },
        }
    }

    pub fn manual(package: impl Into<String>, strategy: BuildStrategy) -> Self {
        Self {
            package: package.into(),
            source: PackageSource::Manual { strategy },
        }
    }
}

/// Dependency name → package mapping for one selection context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    entries: BTreeMap<String, PackageMapping>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the mapping for a dependency
    pub fn insert(&mut self, dependency: impl Into<String>, mapping: PackageMapping) {
        self.entries.insert(dependency.into(), mapping);
    }

    pub fn with(mut self, dependency: impl Into<String>, mapping: PackageMapping) -> Self {
        self.insert(dependency, mapping);
        self
    }

    pub fn get(&self, dependency: &str) -> Option<&PackageMapping> {
        self.entries.get(dependency)
    }

    pub fn contains(&self, dependency: &str) -> bool {
        self.entries.contains_key(dependency)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PackageMapping)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Ordering hint: `package` bundles (and must come after) any of `requires`
/// that end up in the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleRule {
    pub package: &'static str,
    pub requires: &'static [&'static str],
}

impl BundleRule {
    pub const fn new(package: &'static str, requires: &'static [&'static str]) -> Self {
        Self { package, requires }
    }
}
