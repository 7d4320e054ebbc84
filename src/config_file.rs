//! Provisioning file handling for headless runs.
//!
//! A provisioning file carries everything the surrounding layers would
//! normally hand over: the detected dependencies and the distro / window
//! manager / terminal selection. Values are typed enums, so a typo in the
//! file fails at load time instead of halfway through an install.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command_runner::DEFAULT_TIMEOUT;
use crate::installer::InstallRequest;
use crate::manual_build::ManualBuildConfig;
use crate::types::{Dependency, Distro, PackageVariant, Selection, Terminal, WindowManager};

/// Upper bound for the inactivity timeout (a build that is silent for a
/// full day is not coming back)
const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Provisioning configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionConfig {
    pub distro: Distro,
    #[serde(default)]
    pub window_manager: WindowManager,
    #[serde(default)]
    pub terminal: Terminal,
    /// Dependency name -> requested variant
    #[serde(default)]
    pub variants: BTreeMap<String, PackageVariant>,
    /// Dependencies to reinstall even if detected as installed
    #[serde(default)]
    pub reinstall: BTreeSet<String>,
    pub dependencies: Vec<Dependency>,
    /// Inactivity timeout per command
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Parent directory for source builds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl ProvisionConfig {
    pub fn new(distro: Distro) -> Self {
        Self {
            distro,
            window_manager: WindowManager::default(),
            terminal: Terminal::default(),
            variants: BTreeMap::new(),
            reinstall: BTreeSet::new(),
            dependencies: Vec::new(),
            timeout_secs: default_timeout_secs(),
            work_dir: None,
        }
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.dependencies.is_empty() {
            anyhow::bail!("At least one dependency must be listed");
        }

        let mut seen = BTreeSet::new();
        for dep in &self.dependencies {
            let name = dep.name.trim();
            if name.is_empty() {
                anyhow::bail!("Dependency names cannot be empty");
            }
            if name != dep.name || name.contains(char::is_whitespace) {
                anyhow::bail!("Dependency name {:?} contains whitespace", dep.name);
            }
            if !seen.insert(name) {
                anyhow::bail!("Dependency {} is listed twice", name);
            }
        }

        for name in self.variants.keys().chain(&self.reinstall) {
            if !seen.contains(name.as_str()) {
                anyhow::bail!("{} is not in the dependency list", name);
            }
        }

        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            anyhow::bail!("timeout_secs must be between 1 and {}", MAX_TIMEOUT_SECS);
        }

        if let Some(dir) = &self.work_dir {
            if !dir.is_absolute() {
                anyhow::bail!("work_dir must be an absolute path, got {:?}", dir);
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn selection(&self) -> Selection {
        Selection {
            distro: self.distro,
            window_manager: self.window_manager,
            terminal: self.terminal,
            variants: self.variants.clone(),
        }
    }

    pub fn to_request(&self) -> InstallRequest {
        InstallRequest {
            dependencies: self.dependencies.clone(),
            selection: self.selection(),
            reinstall: self.reinstall.clone(),
        }
    }

    pub fn build_config(&self) -> ManualBuildConfig {
        let mut build = ManualBuildConfig::default();
        if let Some(dir) = &self.work_dir {
            build.work_root = dir.clone();
        }
        build
    }
}
