//! Dependency categorization
//!
//! Partitions the detected dependency list into the three installation
//! buckets (system, extra repository, manual build) using the mapping table
//! of the current selection. Missing mappings are not fatal: they are carried
//! as [`ResolutionWarning`]s so the caller can report them.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::mapping::{BundleRule, MappingTable, PackageSource, RepositoryType};
use crate::types::{Dependency, DependencyStatus, ReinstallOverrides};

/// One package scheduled for installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPackage {
    /// Dependency name that first requested the package
    pub dependency: String,
    pub package: String,
    pub source: PackageSource,
    /// Install even though it is already present
    pub reinstall: bool,
}

/// Ordered packages sharing one repository type. Order is insertion order
/// adjusted by bundle rules, never alphabetical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallBucket {
    kind: RepositoryType,
    entries: Vec<PlannedPackage>,
}

impl InstallBucket {
    pub fn new(kind: RepositoryType) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> RepositoryType {
        self.kind
    }

    pub fn entries(&self) -> &[PlannedPackage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, package: &str) -> bool {
        self.position(package).is_some()
    }

    /// Concrete package identifiers in bucket order
    pub fn packages(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.package.as_str()).collect()
    }

    /// Entries that go through the regular install command
    pub fn install_targets(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.reinstall)
            .map(|e| e.package.clone())
            .collect()
    }

    /// Entries that need a forced reinstall
    pub fn reinstall_targets(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.reinstall)
            .map(|e| e.package.clone())
            .collect()
    }

    fn position(&self, package: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.package == package)
    }

    fn push(&mut self, entry: PlannedPackage) {
        debug_assert_eq!(entry.source.repository_type(), self.kind);
        self.entries.push(entry);
    }

    /// Stable partition: for each rule in order, move the bundling package
    /// behind everything else when one of its prerequisites shares the bucket.
    fn apply_bundle_rules(&mut self, rules: &[BundleRule]) {
        for rule in rules {
            let Some(pos) = self.position(rule.package) else {
                continue;
            };
            if rule.requires.iter().any(|r| self.contains(r)) {
                let entry = self.entries.remove(pos);
                debug!(package = %entry.package, "moving bundling package to end of bucket");
                self.entries.push(entry);
            }
        }
    }
}

/// A dependency with no mapping for the current selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionWarning {
    pub dependency: String,
    pub required: bool,
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no package mapping for {}{}",
            self.dependency,
            if self.required { " (required)" } else { "" }
        )
    }
}

/// The result of categorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallPlan {
    pub system: InstallBucket,
    pub extra: InstallBucket,
    pub manual: InstallBucket,
    pub warnings: Vec<ResolutionWarning>,
    /// Dependencies skipped because they are already installed
    pub satisfied: Vec<String>,
    /// Dependencies whose package was already planned for another dependency
    pub merged: Vec<String>,
}

impl Default for InstallPlan {
    fn default() -> Self {
        Self {
            system: InstallBucket::new(RepositoryType::System),
            extra: InstallBucket::new(RepositoryType::ExtraRepo),
            manual: InstallBucket::new(RepositoryType::Manual),
            warnings: Vec::new(),
            satisfied: Vec::new(),
            merged: Vec::new(),
        }
    }
}

impl InstallPlan {
    pub fn bucket(&self, kind: RepositoryType) -> &InstallBucket {
        match kind {
            RepositoryType::System => &self.system,
            RepositoryType::ExtraRepo => &self.extra,
            RepositoryType::Manual => &self.manual,
        }
    }

    fn bucket_mut(&mut self, kind: RepositoryType) -> &mut InstallBucket {
        match kind {
            RepositoryType::System => &mut self.system,
            RepositoryType::ExtraRepo => &mut self.extra,
            RepositoryType::Manual => &mut self.manual,
        }
    }

    /// Buckets in installation order
    pub fn buckets(&self) -> [&InstallBucket; 3] {
        [&self.system, &self.extra, &self.manual]
    }

    /// Nothing to install
    pub fn is_empty(&self) -> bool {
        self.buckets().iter().all(|b| b.is_empty())
    }

    pub fn total_packages(&self) -> usize {
        self.buckets().iter().map(|b| b.len()).sum()
    }

    fn find_mut(&mut self, package: &str) -> Option<&mut PlannedPackage> {
        let (kind, pos) = RepositoryType::all()
            .into_iter()
            .find_map(|kind| self.bucket(kind).position(package).map(|pos| (kind, pos)))?;
        self.bucket_mut(kind).entries.get_mut(pos)
    }
}

/// Maps dependencies onto buckets with one mapping table and rule set.
#[derive(Debug, Clone, Copy)]
pub struct PackageCategorizer<'a> {
    table: &'a MappingTable,
    rules: &'a [BundleRule],
}

impl<'a> PackageCategorizer<'a> {
    pub fn new(table: &'a MappingTable, rules: &'a [BundleRule]) -> Self {
        Self { table, rules }
    }

    /// Partition `dependencies` into buckets. Deterministic for a fixed
    /// input order.
    pub fn categorize(
        &self,
        dependencies: &[Dependency],
        overrides: &ReinstallOverrides,
    ) -> InstallPlan {
        let mut plan = InstallPlan::default();

        for dep in dependencies {
            let overridden = overrides.contains(&dep.name);
            if dep.status == DependencyStatus::Installed && !overridden {
                plan.satisfied.push(dep.name.clone());
                continue;
            }

            let Some(mapping) = self.table.get(&dep.name) else {
                if dep.required {
                    warn!(dependency = %dep.name, "no package mapping for required dependency");
                } else {
                    info!(dependency = %dep.name, "no package mapping for optional dependency");
                }
                plan.warnings.push(ResolutionWarning {
                    dependency: dep.name.clone(),
                    required: dep.required,
                });
                continue;
            };

            let reinstall = dep.status == DependencyStatus::NeedsReinstall
                || (dep.status == DependencyStatus::Installed && overridden);

            if let Some(existing) = plan.find_mut(&mapping.package) {
                debug!(
                    dependency = %dep.name,
                    package = %mapping.package,
                    "package already planned"
                );
                existing.reinstall |= reinstall;
                plan.merged.push(dep.name.clone());
                continue;
            }

            plan.bucket_mut(mapping.source.repository_type())
                .push(PlannedPackage {
                    dependency: dep.name.clone(),
                    package: mapping.package.clone(),
                    source: mapping.source.clone(),
                    reinstall,
                });
        }

        for kind in RepositoryType::all() {
            plan.bucket_mut(kind).apply_bundle_rules(self.rules);
        }

        info!(
            system = plan.system.len(),
            extra = plan.extra.len(),
            manual = plan.manual.len(),
            unresolved = plan.warnings.len(),
            "categorized dependencies"
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{BuildStrategy, PackageMapping};

    fn dep(name: &str, status: DependencyStatus) -> Dependency {
        Dependency::new(name, status)
    }

    #[test]
    fn test_bundle_rule_moves_bundler_last() {
        let mut bucket = InstallBucket::new(RepositoryType::Manual);
        for name in ["b", "a", "c"] {
            bucket.push(PlannedPackage {
                dependency: name.into(),
                package: name.into(),
                source: PackageSource::Manual {
                    strategy: BuildStrategy::makepkg(name),
                },
                reinstall: false,
            });
        }
        bucket.apply_bundle_rules(&[BundleRule::new("b", &["a"]), BundleRule::new("z", &["a"])]);
        assert_eq!(bucket.packages(), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_rule_without_shared_prerequisite_is_noop() {
        let table = MappingTable::new()
            .with("x", PackageMapping::system("x"))
            .with("y", PackageMapping::extra("y", "r"));
        let rules = [BundleRule::new("x", &["y"])];
        let plan = PackageCategorizer::new(&table, &rules).categorize(
            &[dep("x", DependencyStatus::Missing), dep("y", DependencyStatus::Missing)],
            &ReinstallOverrides::new(),
        );
        assert_eq!(plan.system.packages(), vec!["x"]);
        assert_eq!(plan.extra.packages(), vec!["y"]);
    }

    #[test]
    fn test_duplicate_mapping_merges() {
        let table = MappingTable::new()
            .with("terminal", PackageMapping::system("kitty"))
            .with("kitty", PackageMapping::system("kitty"));
        let plan = PackageCategorizer::new(&table, &[]).categorize(
            &[
                dep("terminal", DependencyStatus::Missing),
                dep("kitty", DependencyStatus::NeedsReinstall),
            ],
            &ReinstallOverrides::new(),
        );
        assert_eq!(plan.system.packages(), vec!["kitty"]);
        assert_eq!(plan.merged, vec!["kitty"]);
        // The stronger request wins
        assert!(plan.system.entries()[0].reinstall);
    }

    #[test]
    fn test_override_forces_reinstall_of_installed() {
        let table = MappingTable::new().with("waybar", PackageMapping::system("waybar"));
        let overrides: ReinstallOverrides = ["waybar".to_string()].into();
        let plan = PackageCategorizer::new(&table, &[])
            .categorize(&[dep("waybar", DependencyStatus::Installed)], &overrides);
        assert_eq!(plan.system.reinstall_targets(), vec!["waybar"]);
        assert!(plan.system.install_targets().is_empty());
    }

    #[test]
    fn test_needs_update_is_regular_install() {
        let table = MappingTable::new().with("jq", PackageMapping::system("jq"));
        let plan = PackageCategorizer::new(&table, &[])
            .categorize(&[dep("jq", DependencyStatus::NeedsUpdate)], &ReinstallOverrides::new());
        assert_eq!(plan.system.install_targets(), vec!["jq"]);
    }

    #[test]
    fn test_warning_display() {
        let warning = ResolutionWarning {
            dependency: "cursor-theme".into(),
            required: true,
        };
        assert_eq!(warning.to_string(), "no package mapping for cursor-theme (required)");
    }
}
