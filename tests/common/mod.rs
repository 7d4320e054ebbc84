//! Shared fixtures for integration tests
//!
//! `ScriptBackend` is a distro backend whose "package manager" is `sh`: every
//! command appends a line to a log file, so tests can assert exactly which
//! commands ran and in what order without touching the real system.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use deskstrap::{
    BundleRule, CancellationToken, CommandRunner, CommandSpec, DistroBackend, Distro, MappingTable,
    Privilege, ProgressEvent, ProgressSink, RunnerConfig, Selection,
};

pub const LOG_ENV: &str = "DESKSTRAP_TEST_LOG";

#[derive(Debug, Clone)]
pub struct ScriptBackend {
    pub distro: Distro,
    pub log: PathBuf,
    pub table: MappingTable,
    pub rules: &'static [BundleRule],
    /// Commands whose label matches exit non-zero
    pub fail_on: BTreeSet<String>,
    /// Repositories with a post-enable action
    pub post_enable: BTreeSet<String>,
    /// Packages the installed-query reports as present
    pub installed: BTreeSet<String>,
}

impl ScriptBackend {
    pub fn new(dir: &Path, table: MappingTable) -> Self {
        Self {
            distro: Distro::Arch,
            log: dir.join("commands.log"),
            table,
            rules: &[],
            fail_on: BTreeSet::new(),
            post_enable: BTreeSet::new(),
            installed: BTreeSet::new(),
        }
    }

    pub fn failing(mut self, label: &str) -> Self {
        self.fail_on.insert(label.to_string());
        self
    }

    pub fn with_post_enable(mut self, repo: &str) -> Self {
        self.post_enable.insert(repo.to_string());
        self
    }

    pub fn with_installed(mut self, package: &str) -> Self {
        self.installed.insert(package.to_string());
        self
    }

    /// Lines written by commands so far
    pub fn log_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn record<I, S>(&self, label: &str, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = if self.fail_on.contains(label) {
            r#"echo "$*" >> "$DESKSTRAP_TEST_LOG"; echo "error: $1 failed" >&2; exit 1"#
        } else {
            r#"echo "$*" >> "$DESKSTRAP_TEST_LOG""#
        };
        CommandSpec::new("sh")
            .args(["-c", script, "sh", label])
            .args(args)
            .env(LOG_ENV, self.log.to_string_lossy())
    }
}

impl DistroBackend for ScriptBackend {
    fn distro(&self) -> Distro {
        self.distro
    }

    fn mapping_table(&self, _selection: &Selection) -> MappingTable {
        self.table.clone()
    }

    fn bundle_rules(&self) -> &'static [BundleRule] {
        self.rules
    }

    fn prerequisite_packages(&self) -> Vec<String> {
        vec!["base-tools".to_string()]
    }

    fn install_command(&self, packages: &[String]) -> CommandSpec {
        self.record("install", packages.iter().cloned()).privileged()
    }

    fn reinstall_command(&self, packages: &[String]) -> CommandSpec {
        self.record("reinstall", packages.iter().cloned()).privileged()
    }

    fn query_installed_command(&self, package: &str) -> CommandSpec {
        let status = if self.installed.contains(package) { "0" } else { "1" };
        CommandSpec::new("sh")
            .args(["-c", r#"echo "query $1" >> "$DESKSTRAP_TEST_LOG"; exit "$2""#, "sh"])
            .args([package, status])
            .env(LOG_ENV, self.log.to_string_lossy())
    }

    fn enable_repository_command(&self, repo: &str) -> deskstrap::Result<CommandSpec> {
        Ok(self.record("enable", [repo]).privileged())
    }

    fn post_enable_action(&self, repo: &str) -> Option<CommandSpec> {
        self.post_enable
            .contains(repo)
            .then(|| self.record("post", [repo]).privileged())
    }

    fn install_local_package_command(&self, path: &Path) -> CommandSpec {
        self.record("install-local", [path.to_string_lossy()]).privileged()
    }

    /// Logs the build and leaves a package plus its debug split behind
    fn makepkg_command(&self) -> CommandSpec {
        CommandSpec::new("sh")
            .args([
                "-c",
                r#"echo makepkg >> "$DESKSTRAP_TEST_LOG"; touch demo-1.0-1-x86_64.pkg.tar.zst demo-debug-1.0-1-x86_64.pkg.tar.zst"#,
            ])
            .env(LOG_ENV, self.log.to_string_lossy())
    }
}

/// Runner with a short timeout, running privileged commands directly
pub fn test_runner(sink: ProgressSink) -> CommandRunner {
    runner_with(sink, Duration::from_secs(10), CancellationToken::new())
}

pub fn runner_with(sink: ProgressSink, timeout: Duration, cancel: CancellationToken) -> CommandRunner {
    CommandRunner::new(
        RunnerConfig {
            timeout,
            tick: Duration::from_millis(20),
            dry_run: false,
            privilege: Privilege::Direct,
        },
        sink,
        cancel,
    )
}

/// Progress values must never go down
pub fn assert_non_decreasing(events: &[ProgressEvent]) {
    for pair in events.windows(2) {
        assert!(
            pair[1].progress + 1e-9 >= pair[0].progress,
            "progress went backwards: {} ({}) -> {} ({})",
            pair[0].progress,
            pair[0].step,
            pair[1].progress,
            pair[1].step
        );
    }
}
