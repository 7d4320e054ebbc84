//! Tests for the source build pipeline
//!
//! Failures are provoked at specific steps with local paths, so nothing here
//! touches the network.

mod common;

use std::fs;
use std::path::Path;
use std::process::Command;

use deskstrap::{
    BuildStep, BuildStrategy, Dependency, DependencyStatus, InstallError, InstallPlan,
    ManualBuildConfig, ManualBuildExecutor, MappingTable, MetadataPatch, PackageCategorizer,
    PackageMapping, Phase, ProgressSink, ReinstallOverrides, StepRange,
};

use common::{test_runner, ScriptBackend};

fn plan_for(table: &MappingTable, names: &[&str]) -> InstallPlan {
    let deps: Vec<_> = names
        .iter()
        .map(|n| Dependency::new(*n, DependencyStatus::Missing))
        .collect();
    PackageCategorizer::new(table, &[]).categorize(&deps, &ReinstallOverrides::new())
}

fn build_config(work_root: &Path) -> ManualBuildConfig {
    ManualBuildConfig {
        work_root: work_root.to_path_buf(),
        ..ManualBuildConfig::default()
    }
}

fn range() -> StepRange {
    StepRange::for_phase(Phase::ManualBuilds)
}

fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Local git repository with a single committed file
fn local_repo(root: &Path, file: &str, contents: &str) -> std::path::PathBuf {
    named_repo(root, "upstream", &[(file, contents)])
}

/// Local git repository `<root>/<name>` with the given files committed
fn named_repo(root: &Path, name: &str, files: &[(&str, &str)]) -> std::path::PathBuf {
    let repo = root.join(name);
    fs::create_dir_all(&repo).unwrap();
    for (file, contents) in files {
        fs::write(repo.join(file), contents).unwrap();
    }
    let git = |args: &[&str]| {
        let status = Command::new("git")
            .args(["-c", "user.name=test", "-c", "user.email=test@example.org"])
            .args(args)
            .current_dir(&repo)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {args:?} failed");
    };
    git(&["init", "-q"]);
    git(&["add", "."]);
    git(&["commit", "-q", "-m", "init"]);
    repo
}

#[test]
fn test_acquire_failure_names_package_and_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let work_root = tempfile::tempdir().unwrap();
    let table = MappingTable::new().with(
        "P",
        PackageMapping::manual(
            "P",
            BuildStrategy::cargo_git("file:///nonexistent/deskstrap/P.git", "p"),
        ),
    );
    let backend = ScriptBackend::new(scratch.path(), table.clone());
    let runner = test_runner(ProgressSink::disconnected());
    let config = build_config(work_root.path());
    let plan = plan_for(&table, &["P"]);

    let err = ManualBuildExecutor::new(&runner, &backend, &config)
        .build_all(&plan.manual, &range())
        .unwrap_err();

    match &err {
        InstallError::ManualBuild { package, step, .. } => {
            assert_eq!(package, "P");
            assert_eq!(*step, BuildStep::Acquire);
        }
        other => panic!("expected ManualBuild, got {other:?}"),
    }
    assert!(err.to_string().contains("P"));
    assert!(err.to_string().contains("acquire"));
    assert!(dir_is_empty(work_root.path()), "build directory left behind");
    // Nothing was installed
    assert!(backend.log_lines().is_empty());
}

#[test]
fn test_aur_url_is_used_for_makepkg() {
    let scratch = tempfile::tempdir().unwrap();
    let work_root = tempfile::tempdir().unwrap();
    let table = MappingTable::new().with(
        "cursor-theme",
        PackageMapping::manual("bibata", BuildStrategy::makepkg("bibata")),
    );
    let backend = ScriptBackend::new(scratch.path(), table.clone());
    let runner = test_runner(ProgressSink::disconnected());
    let config = ManualBuildConfig {
        aur_url: "file:///nonexistent/aur/".to_string(),
        ..build_config(work_root.path())
    };
    let plan = plan_for(&table, &["cursor-theme"]);

    let err = ManualBuildExecutor::new(&runner, &backend, &config)
        .build_all(&plan.manual, &range())
        .unwrap_err();

    assert!(matches!(
        err,
        InstallError::ManualBuild { step: BuildStep::Acquire, .. }
    ));
    if git_available() {
        // Trailing slash on the base URL is not doubled
        let recent = runner.recent_output().join("\n");
        assert!(recent.contains("/nonexistent/aur/bibata.git"), "{recent}");
    }
    assert!(dir_is_empty(work_root.path()));
}

#[test]
fn test_patch_failure_stops_before_build() {
    if !git_available() {
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let work_root = tempfile::tempdir().unwrap();
    let upstream = local_repo(scratch.path(), "Cargo.toml", "[package]\nname = \"w\"\n");

    let strategy = BuildStrategy::cargo_git(format!("file://{}", upstream.display()), "w")
        .with_patch(MetadataPatch::new("Cargo.toml", "edition = \"2018\"", "edition = \"2021\""))
        .with_shared_prerequisite("cargo");
    let table = MappingTable::new().with("w", PackageMapping::manual("w", strategy));
    let backend = ScriptBackend::new(scratch.path(), table.clone());
    let runner = test_runner(ProgressSink::disconnected());
    let config = build_config(work_root.path());
    let plan = plan_for(&table, &["w"]);

    let err = ManualBuildExecutor::new(&runner, &backend, &config)
        .build_all(&plan.manual, &range())
        .unwrap_err();

    assert!(matches!(
        err,
        InstallError::ManualBuild { step: BuildStep::Patch, .. }
    ));
    // The prerequisite step never ran
    assert!(backend.log_lines().is_empty());
    assert!(dir_is_empty(work_root.path()));
}

#[test]
fn test_shared_prerequisite_checked_before_build() {
    if !git_available() {
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let work_root = tempfile::tempdir().unwrap();
    // No Cargo.toml, so the build step itself fails
    let upstream = local_repo(scratch.path(), "README", "nothing to build\n");

    let strategy = BuildStrategy::cargo_git(format!("file://{}", upstream.display()), "w")
        .with_shared_prerequisite("rust-toolchain");
    let table = MappingTable::new().with("w", PackageMapping::manual("w", strategy));
    let backend = ScriptBackend::new(scratch.path(), table.clone());
    let runner = test_runner(ProgressSink::disconnected());
    let config = build_config(work_root.path());
    let plan = plan_for(&table, &["w"]);

    let err = ManualBuildExecutor::new(&runner, &backend, &config)
        .build_all(&plan.manual, &range())
        .unwrap_err();

    assert!(matches!(
        err,
        InstallError::ManualBuild { step: BuildStep::Build, .. }
    ));
    // Missing, so it was installed through the package manager
    assert_eq!(
        backend.log_lines(),
        vec!["query rust-toolchain", "install rust-toolchain"]
    );
    assert!(dir_is_empty(work_root.path()));
}

#[test]
fn test_installed_shared_prerequisite_is_not_reinstalled() {
    if !git_available() {
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let work_root = tempfile::tempdir().unwrap();
    let upstream = local_repo(scratch.path(), "README", "nothing to build\n");

    let strategy = BuildStrategy::cargo_git(format!("file://{}", upstream.display()), "w")
        .with_shared_prerequisite("rust-toolchain");
    let table = MappingTable::new().with("w", PackageMapping::manual("w", strategy));
    let backend = ScriptBackend::new(scratch.path(), table.clone()).with_installed("rust-toolchain");
    let runner = test_runner(ProgressSink::disconnected());
    let config = build_config(work_root.path());
    let plan = plan_for(&table, &["w"]);

    let _ = ManualBuildExecutor::new(&runner, &backend, &config).build_all(&plan.manual, &range());

    assert_eq!(backend.log_lines(), vec!["query rust-toolchain"]);
}

#[test]
fn test_makepkg_pipeline_installs_artifact() {
    if !git_available() {
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let work_root = tempfile::tempdir().unwrap();
    let aur = scratch.path().join("aur");
    named_repo(&aur, "hyprutils-git.git", &[("PKGBUILD", "pkgname=hyprutils-git\n")]);
    named_repo(
        &aur,
        "demo-git.git",
        &[
            ("PKGBUILD", "pkgname=demo-git\n"),
            (
                ".SRCINFO",
                "pkgbase = demo-git\n\
                 \tmakedepends = cmake\n\
                 \tmakedepends = git\n\
                 \tmakedepends = hyprutils-git>=0.2\n\
                 \tdepends = cairo\n\
                 \tdepends = sibling-git\n\
                 \tdepends = demo-git\n\
                 \n\
                 pkgname = demo-git\n",
            ),
        ],
    );

    let table = MappingTable::new()
        .with(
            "utils",
            PackageMapping::manual("hyprutils-git", BuildStrategy::makepkg("hyprutils-git")),
        )
        .with(
            "demo",
            PackageMapping::manual(
                "demo-git",
                BuildStrategy::makepkg("demo-git").with_shared_prerequisite("cmake"),
            ),
        );
    let backend = ScriptBackend::new(scratch.path(), table.clone());
    let runner = test_runner(ProgressSink::disconnected());
    let config = ManualBuildConfig {
        aur_url: format!("file://{}", aur.display()),
        ..build_config(work_root.path())
    };
    let plan = plan_for(&table, &["utils", "demo"]);

    ManualBuildExecutor::new(&runner, &backend, &config)
        .build_all(&plan.manual, &range())
        .expect("both builds should succeed");

    let log = backend.log_lines();
    assert_eq!(log.len(), 7, "{log:?}");
    assert_eq!(log[0], "makepkg");
    assert_eq!(log[2], "query cmake");
    assert_eq!(log[3], "install cmake");
    // Built in this run, AUR-only, shared or self dependencies stay out of the batch
    assert_eq!(log[4], "install cairo git");
    assert_eq!(log[5], "makepkg");
    for line in [&log[1], &log[6]] {
        assert!(line.starts_with("install-local "), "{line}");
        assert!(line.contains(&*work_root.path().to_string_lossy()), "{line}");
        assert!(line.ends_with("/src/demo-1.0-1-x86_64.pkg.tar.zst"), "{line}");
    }
    assert!(log[1].contains("deskstrap-hyprutils-git-"));
    assert!(log[6].contains("deskstrap-demo-git-"));
    assert!(dir_is_empty(work_root.path()), "build directory left behind");
}
