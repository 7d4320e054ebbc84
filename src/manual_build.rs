//! Source builds for packages no repository provides
//!
//! Every manual package runs the same six steps, the concrete commands
//! depending on its [`BuildStrategy`]:
//!
//! ```text
//! Acquire -> Patch -> Prerequisites -> Build -> LocateArtifact -> Install
//! ```
//!
//! Builds run one at a time, each in a fresh temporary directory under the
//! configured work root. The directory is removed when the build finishes,
//! whether it succeeded or not.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use strum::{Display, EnumIter};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::categorizer::{InstallBucket, PlannedPackage};
use crate::command_runner::{CommandRunner, CommandSpec, StepRange};
use crate::distro::DistroBackend;
use crate::error::{InstallError, Result};
use crate::mapping::{BuildStrategy, MetadataPatch};

pub const DEFAULT_AUR_URL: &str = "https://aur.archlinux.org";
pub const DEFAULT_INSTALL_PREFIX: &str = "/usr/local/bin";

/// Name of the checkout directory inside the build directory
const SOURCE_DIR: &str = "src";

/// Pipeline step, reported in errors and progress labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum BuildStep {
    Acquire,
    Patch,
    Prerequisites,
    Build,
    LocateArtifact,
    Install,
}

impl BuildStep {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        self as usize
    }
}

/// Where and how source builds happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualBuildConfig {
    /// Parent of the per-package temporary directories
    pub work_root: PathBuf,
    /// Base URL of the AUR (`<base>/<pkgbase>.git`)
    pub aur_url: String,
    /// Destination for binaries from cargo builds
    pub install_prefix: PathBuf,
}

impl Default for ManualBuildConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir(),
            aur_url: DEFAULT_AUR_URL.to_string(),
            install_prefix: PathBuf::from(DEFAULT_INSTALL_PREFIX),
        }
    }
}

/// Runs the build pipeline for every entry of the manual bucket.
pub struct ManualBuildExecutor<'a> {
    runner: &'a CommandRunner,
    backend: &'a dyn DistroBackend,
    config: &'a ManualBuildConfig,
    /// Packages built from source in this run; never installed as dependencies
    in_run: BTreeSet<String>,
}

impl<'a> ManualBuildExecutor<'a> {
    pub fn new(
        runner: &'a CommandRunner,
        backend: &'a dyn DistroBackend,
        config: &'a ManualBuildConfig,
    ) -> Self {
        Self {
            runner,
            backend,
            config,
            in_run: BTreeSet::new(),
        }
    }

    /// Build and install every package in `bucket`, in order.
    pub fn build_all(&mut self, bucket: &InstallBucket, range: &StepRange) -> Result<()> {
        self.in_run = bucket.entries().iter().map(|e| e.package.clone()).collect();
        let count = bucket.len();
        for (i, entry) in bucket.entries().iter().enumerate() {
            self.build(entry, &range.split(i, count))?;
        }
        Ok(())
    }

    /// Build one package. Errors name the package and the failing step.
    pub fn build(&self, entry: &PlannedPackage, range: &StepRange) -> Result<()> {
        let Some(strategy) = entry.source.strategy() else {
            return Err(InstallError::config(format!(
                "{} is not a source build",
                entry.package
            )));
        };
        info!(package = %entry.package, strategy = strategy.label(), "building from source");

        let work = self
            .create_work_dir(&entry.package)
            .map_err(|e| fail(&entry.package, BuildStep::Acquire, e))?;
        let result = self.run_pipeline(&entry.package, strategy, work.path(), range);

        let path = work.path().to_path_buf();
        if let Err(e) = work.close() {
            warn!(path = %path.display(), %e, "could not remove build directory");
        }
        result
    }

    fn create_work_dir(&self, package: &str) -> Result<TempDir> {
        fs::create_dir_all(&self.config.work_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("deskstrap-{}-", package))
            .tempdir_in(&self.config.work_root)?;
        debug!(path = %dir.path().display(), "created build directory");
        Ok(dir)
    }

    fn run_pipeline(
        &self,
        package: &str,
        strategy: &BuildStrategy,
        work: &Path,
        range: &StepRange,
    ) -> Result<()> {
        let source = work.join(SOURCE_DIR);
        let step_range = |step: BuildStep| {
            range
                .split(step.index(), BuildStep::COUNT)
                .with_step(format!("{}: {}", package, step))
        };
        let at = |step: BuildStep| move |e: InstallError| fail(package, step, e);

        self.acquire(strategy, work, &step_range(BuildStep::Acquire))
            .map_err(at(BuildStep::Acquire))?;

        if let Some(patch) = strategy.patch() {
            apply_patch(patch, &source).map_err(at(BuildStep::Patch))?;
        }

        self.install_prerequisites(package, strategy, &source, &step_range(BuildStep::Prerequisites))
            .map_err(at(BuildStep::Prerequisites))?;

        self.runner
            .run(&self.build_command(strategy, &source), &step_range(BuildStep::Build))
            .map_err(at(BuildStep::Build))?;

        let artifact = locate_artifact(strategy, &source).map_err(at(BuildStep::LocateArtifact))?;
        info!(package, artifact = %artifact.display(), "build finished");

        let install = match strategy {
            BuildStrategy::Makepkg { .. } => self.backend.install_local_package_command(&artifact),
            BuildStrategy::CargoGit { binary, .. } => CommandSpec::new("install")
                .arg("-Dm755")
                .arg(artifact.to_string_lossy())
                .arg(self.config.install_prefix.join(binary).to_string_lossy())
                .privileged(),
        };
        self.runner
            .run(&install, &step_range(BuildStep::Install))
            .map_err(at(BuildStep::Install))?;
        Ok(())
    }

    fn build_command(&self, strategy: &BuildStrategy, source: &Path) -> CommandSpec {
        match strategy {
            BuildStrategy::Makepkg { .. } => self.backend.makepkg_command(),
            BuildStrategy::CargoGit { .. } => {
                CommandSpec::new("cargo").args(["build", "--release", "--locked"])
            }
        }
        .current_dir(source)
    }

    fn acquire(&self, strategy: &BuildStrategy, work: &Path, range: &StepRange) -> Result<()> {
        let mut clone = CommandSpec::new("git").args(["clone", "--depth", "1"]);
        let url = match strategy {
            BuildStrategy::Makepkg { pkgbase, .. } => {
                format!("{}/{}.git", self.config.aur_url.trim_end_matches('/'), pkgbase)
            }
            BuildStrategy::CargoGit { repo, rev, .. } => {
                if let Some(rev) = rev {
                    clone = clone.args(["--branch", rev.as_str()]);
                }
                repo.clone()
            }
        };
        let clone = clone.arg(url).arg(SOURCE_DIR).current_dir(work);
        self.runner.run(&clone, range)?;
        Ok(())
    }

    fn install_prerequisites(
        &self,
        package: &str,
        strategy: &BuildStrategy,
        source: &Path,
        range: &StepRange,
    ) -> Result<()> {
        let shared = strategy.shared_prerequisite();
        let mut batch = match strategy {
            BuildStrategy::Makepkg { pkgbase, .. } => {
                let path = source.join(".SRCINFO");
                let srcinfo = match fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        debug!(package, "no .SRCINFO, skipping recipe dependencies");
                        String::new()
                    }
                    Err(e) => return Err(e.into()),
                };
                recipe_prerequisites(&SrcInfo::parse(&srcinfo), pkgbase, &self.in_run)
            }
            BuildStrategy::CargoGit { .. } => Vec::new(),
        };
        batch.retain(|d| !self.in_run.contains(d) && Some(d.as_str()) != shared && d != package);

        if let Some(shared) = shared {
            let query = self.backend.query_installed_command(shared);
            let check_range = range.split(0, 3).with_step(format!("Checking {}", shared));
            if self.runner.check(&query, &check_range)? {
                debug!(package = shared, "shared prerequisite already installed");
            } else {
                let install = self.backend.install_command(&[shared.to_string()]);
                self.runner.run(
                    &install,
                    &range.split(1, 3).with_step(format!("Installing {}", shared)),
                )?;
            }
        }

        if !batch.is_empty() {
            info!(package, count = batch.len(), "installing build dependencies");
            self.runner.run(
                &self.backend.install_command(&batch),
                &range.split(2, 3).with_step(format!("{}: build dependencies", package)),
            )?;
        }
        Ok(())
    }
}

/// `.SRCINFO` dependencies for the package manager to install.
///
/// The recipe's own packages and packages built in this run are left out.
/// So are other `-git` packages: they only exist in the AUR, and the
/// repository package manager would reject the whole batch.
fn recipe_prerequisites(info: &SrcInfo, pkgbase: &str, in_run: &BTreeSet<String>) -> Vec<String> {
    info.dependencies()
        .into_iter()
        .filter(|d| d != pkgbase && !info.pkgnames.contains(d) && !in_run.contains(d))
        .filter(|d| {
            let aur_only = d.ends_with("-git");
            if aur_only {
                warn!(
                    package = pkgbase,
                    dependency = %d,
                    "AUR-only build dependency is not built in this run; makepkg needs it installed"
                );
            }
            !aur_only
        })
        .collect()
}

fn fail(package: &str, step: BuildStep, source: InstallError) -> InstallError {
    InstallError::ManualBuild {
        package: package.to_string(),
        step,
        source: Box::new(source),
    }
}

fn apply_patch(patch: &MetadataPatch, source: &Path) -> Result<()> {
    let path = source.join(&patch.file);
    let contents = fs::read_to_string(&path)?;
    let patched = patch.apply_to(&contents).ok_or_else(|| {
        InstallError::config(format!("patch target not found in {}", patch.file))
    })?;
    fs::write(&path, patched)?;
    debug!(file = %patch.file, "applied metadata patch");
    Ok(())
}

/// Find the file a build produced.
pub fn locate_artifact(strategy: &BuildStrategy, source: &Path) -> Result<PathBuf> {
    let base = glob::Pattern::escape(&source.to_string_lossy());
    let pattern = match strategy {
        BuildStrategy::Makepkg { .. } => format!("{}/*.pkg.tar.zst", base),
        BuildStrategy::CargoGit { binary, .. } => {
            format!("{}/target/release/{}", base, glob::Pattern::escape(binary))
        }
    };

    let paths = glob::glob(&pattern).map_err(|e| InstallError::config(e.to_string()))?;
    let mut found: Vec<PathBuf> = paths
        .filter_map(|p| p.ok())
        .filter(|p| {
            p.file_name()
                .map(|n| !n.to_string_lossy().contains("-debug-"))
                .unwrap_or(false)
        })
        .collect();
    found.sort();
    found
        .into_iter()
        .next()
        .ok_or(InstallError::ArtifactNotFound { pattern })
}

/// The parts of a `.SRCINFO` file the prerequisite step needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SrcInfo {
    pub pkgbase: Option<String>,
    pub pkgnames: Vec<String>,
    pub depends: Vec<String>,
    pub makedepends: Vec<String>,
}

impl SrcInfo {
    pub fn parse(text: &str) -> Self {
        let mut info = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim().to_string());
            if value.is_empty() {
                continue;
            }
            // Architecture-specific lists (depends_x86_64) count too
            let base_key = key.split('_').next().unwrap_or(key);
            match base_key {
                "pkgbase" => info.pkgbase = Some(value),
                "pkgname" => info.pkgnames.push(value),
                "depends" => info.depends.push(value),
                "makedepends" => info.makedepends.push(value),
                _ => {}
            }
        }
        info
    }

    /// depends + makedepends without version constraints or duplicates,
    /// in file order
    pub fn dependencies(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.depends
            .iter()
            .chain(&self.makedepends)
            .map(|d| strip_version(d).to_string())
            .filter(|d| !d.is_empty() && seen.insert(d.clone()))
            .collect()
    }
}

/// `foo>=1.2` -> `foo`
fn strip_version(dep: &str) -> &str {
    dep.split(['<', '>', '=']).next().unwrap_or(dep).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    const SRCINFO: &str = "\
pkgbase = hyprland-git
\tpkgdesc = a highly customizable dynamic tiling Wayland compositor
\tpkgver = 0.45.0.r1.gabcdef
\tmakedepends = cmake
\tmakedepends = git
\tmakedepends = hyprwayland-scanner-git>=0.4.2
\tdepends = aquamarine-git
\tdepends = cairo
\tdepends = hyprutils-git>=0.2.3
\tdepends_x86_64 = libdrm
\tdepends = cairo
\toptdepends = hyprpolkitagent: authentication agent

pkgname = hyprland-git
";

    #[test]
    fn test_srcinfo_parse() {
        let info = SrcInfo::parse(SRCINFO);
        assert_eq!(info.pkgbase.as_deref(), Some("hyprland-git"));
        assert_eq!(info.pkgnames, vec!["hyprland-git"]);
        assert_eq!(
            info.dependencies(),
            vec![
                "aquamarine-git",
                "cairo",
                "hyprutils-git",
                "libdrm",
                "cmake",
                "git",
                "hyprwayland-scanner-git"
            ]
        );
    }

    #[test]
    fn test_recipe_prerequisites_skip_git_stack() {
        let info = SrcInfo::parse(SRCINFO);
        let expected = vec!["cairo", "libdrm", "cmake", "git"];

        // The whole stack is built in this run
        let stack: BTreeSet<String> = [
            "hyprland-git",
            "aquamarine-git",
            "hyprutils-git",
            "hyprwayland-scanner-git",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        assert_eq!(recipe_prerequisites(&info, "hyprland-git", &stack), expected);

        // Only the compositor is built; its -git siblings still never reach pacman
        let alone = BTreeSet::from(["hyprland-git".to_string()]);
        assert_eq!(recipe_prerequisites(&info, "hyprland-git", &alone), expected);
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("glib2>=2.80"), "glib2");
        assert_eq!(strip_version("mesa=24.1"), "mesa");
        assert_eq!(strip_version("wayland"), "wayland");
    }

    #[test]
    fn test_locate_artifact_skips_debug_package() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("wallust-3.0.0-1-x86_64.pkg.tar.zst")).unwrap();
        File::create(dir.path().join("wallust-debug-3.0.0-1-x86_64.pkg.tar.zst")).unwrap();

        let found = locate_artifact(&BuildStrategy::makepkg("wallust"), dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "wallust-3.0.0-1-x86_64.pkg.tar.zst");
    }

    #[test]
    fn test_locate_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = BuildStrategy::cargo_git("https://example.org/w.git", "wallust");
        let err = locate_artifact(&strategy, dir.path()).unwrap_err();
        assert!(matches!(err, InstallError::ArtifactNotFound { ref pattern } if pattern.ends_with("target/release/wallust")));
    }

    #[test]
    fn test_apply_patch_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("PKGBUILD"), "options=(debug)\n").unwrap();
        let patch = MetadataPatch::new("PKGBUILD", "options=(debug)", "options=(!debug)");
        apply_patch(&patch, dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("PKGBUILD")).unwrap(),
            "options=(!debug)\n"
        );

        // A second application no longer matches
        assert!(apply_patch(&patch, dir.path()).is_err());
    }

    #[test]
    fn test_build_step_names() {
        assert_eq!(BuildStep::LocateArtifact.to_string(), "locate_artifact");
        assert_eq!(BuildStep::Acquire.index(), 0);
        assert_eq!(BuildStep::Install.index(), BuildStep::COUNT - 1);
    }
}
