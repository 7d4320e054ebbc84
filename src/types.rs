//! Type-safe input types for the orchestrator
//!
//! Everything the surrounding layers hand to the installer (dependency list,
//! distro/window manager/terminal selection, variant choices) is expressed as
//! proper Rust enums so mapping tables can match exhaustively.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Supported host distributions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Distro {
    Arch,
    Fedora,
    #[serde(rename = "opensuse")]
    #[strum(serialize = "opensuse")]
    OpenSuse,
}

/// Window manager / compositor being provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WindowManager {
    #[default]
    Hyprland,
    Sway,
}

/// Terminal emulator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Terminal {
    #[default]
    Kitty,
    Alacritty,
    Foot,
    Wezterm,
}

/// Package flavour requested for a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PackageVariant {
    /// Released package from the distribution or an extra repository
    #[default]
    Stable,
    /// Development snapshot built from the upstream branch
    Git,
}

/// Detection result for one dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DependencyStatus {
    #[default]
    Missing,
    Installed,
    NeedsUpdate,
    NeedsReinstall,
}

/// A dependency as reported by detection. Read-only to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub status: DependencyStatus,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Dependency {
    pub fn new(name: impl Into<String>, status: DependencyStatus) -> Self {
        Self {
            name: name.into(),
            status,
            version: None,
            required: true,
        }
    }

    /// Mark this dependency as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Dependency names whose `Installed` status must not suppress reinstallation
pub type ReinstallOverrides = BTreeSet<String>;

/// The distro/window manager/terminal/variant context a mapping table is built for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub distro: Distro,
    #[serde(default)]
    pub window_manager: WindowManager,
    #[serde(default)]
    pub terminal: Terminal,
    #[serde(default)]
    pub variants: BTreeMap<String, PackageVariant>,
}

impl Selection {
    pub fn new(distro: Distro, window_manager: WindowManager, terminal: Terminal) -> Self {
        Self {
            distro,
            window_manager,
            terminal,
            variants: BTreeMap::new(),
        }
    }

    /// Request a variant for a dependency
    pub fn with_variant(mut self, dependency: impl Into<String>, variant: PackageVariant) -> Self {
        self.variants.insert(dependency.into(), variant);
        self
    }

    /// Variant selected for a dependency (`Stable` unless overridden)
    pub fn variant_of(&self, dependency: &str) -> PackageVariant {
        self.variants.get(dependency).copied().unwrap_or_default()
    }
}
