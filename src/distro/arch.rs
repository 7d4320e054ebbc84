//! Arch Linux: pacman for repository packages, AUR recipes built with makepkg.

use std::path::Path;

use crate::command_runner::CommandSpec;
use crate::error::{InstallError, Result};
use crate::mapping::{BuildStrategy, BundleRule, MappingTable, PackageMapping};
use crate::types::{Distro, PackageVariant, Selection, Terminal, WindowManager};

use super::{owned, DistroBackend};

/// Hyprland components with an AUR `-git` recipe
const HYPR_GIT_STACK: &[&str] = &[
    "hyprland",
    "hyprpaper",
    "hyprlock",
    "hypridle",
    "hyprutils",
    "hyprlang",
    "hyprcursor",
    "aquamarine",
    "hyprwayland-scanner",
    "xdg-desktop-portal-hyprland",
];

/// Repository packages whose names match the dependency name
const SAME_NAME: &[&str] = &[
    "sway",
    "swaybg",
    "swaylock",
    "swayidle",
    "xdg-desktop-portal-wlr",
    "waybar",
    "grim",
    "slurp",
    "wl-clipboard",
    "cliphist",
    "brightnessctl",
    "playerctl",
    "pipewire",
    "wireplumber",
    "swww",
    "jq",
    "git",
];

const BUNDLE_RULES: &[BundleRule] = &[
    BundleRule::new("hyprlang-git", &["hyprutils-git"]),
    BundleRule::new("hyprcursor-git", &["hyprlang-git"]),
    BundleRule::new(
        "aquamarine-git",
        &["hyprutils-git", "hyprwayland-scanner-git"],
    ),
    BundleRule::new(
        "hyprland-git",
        &[
            "aquamarine-git",
            "hyprlang-git",
            "hyprcursor-git",
            "hyprutils-git",
            "hyprwayland-scanner-git",
        ],
    ),
    BundleRule::new("hyprlock-git", &["hyprlang-git", "hyprutils-git"]),
    BundleRule::new("hypridle-git", &["hyprlang-git", "hyprutils-git"]),
    BundleRule::new("hyprpaper-git", &["hyprlang-git", "hyprutils-git"]),
    BundleRule::new(
        "xdg-desktop-portal-hyprland-git",
        &["hyprlang-git", "hyprutils-git", "hyprwayland-scanner-git"],
    ),
];

#[derive(Debug, Default, Clone)]
pub struct ArchBackend;

impl ArchBackend {
    pub fn new() -> Self {
        Self
    }

    fn terminal_mapping(terminal: Terminal) -> PackageMapping {
        PackageMapping::system(terminal.to_string())
    }
}

impl DistroBackend for ArchBackend {
    fn distro(&self) -> Distro {
        Distro::Arch
    }

    fn mapping_table(&self, selection: &Selection) -> MappingTable {
        let mut table = MappingTable::new();

        // hyprland-git links against the -git builds of its libraries
        let compositor = selection.variant_of("hyprland");
        for &name in HYPR_GIT_STACK {
            let variant = match compositor {
                PackageVariant::Git => PackageVariant::Git,
                PackageVariant::Stable => selection.variant_of(name),
            };
            let mapping = match variant {
                PackageVariant::Stable => PackageMapping::system(name),
                PackageVariant::Git => {
                    let pkgbase = format!("{}-git", name);
                    PackageMapping::manual(
                        pkgbase.clone(),
                        BuildStrategy::makepkg(pkgbase).with_shared_prerequisite("cmake"),
                    )
                }
            };
            table.insert(name, mapping);
        }
        for &name in SAME_NAME {
            table.insert(name, PackageMapping::system(name));
        }

        table.insert("rofi", PackageMapping::system("rofi-wayland"));
        table.insert("nerd-font", PackageMapping::system("ttf-jetbrains-mono-nerd"));
        table.insert(
            "cursor-theme",
            PackageMapping::manual(
                "bibata-cursor-theme-bin",
                BuildStrategy::makepkg("bibata-cursor-theme-bin"),
            ),
        );
        table.insert(
            "wallust",
            PackageMapping::manual("wallust", BuildStrategy::makepkg("wallust")),
        );

        let (notifier, polkit) = match selection.window_manager {
            WindowManager::Hyprland => ("swaync", "hyprpolkitagent"),
            WindowManager::Sway => ("mako", "polkit-gnome"),
        };
        table.insert("notification-daemon", PackageMapping::system(notifier));
        table.insert("polkit-agent", PackageMapping::system(polkit));

        for terminal in [
            Terminal::Kitty,
            Terminal::Alacritty,
            Terminal::Foot,
            Terminal::Wezterm,
        ] {
            table.insert(terminal.to_string(), Self::terminal_mapping(terminal));
        }
        table.insert("terminal", Self::terminal_mapping(selection.terminal));

        table
    }

    fn bundle_rules(&self) -> &'static [BundleRule] {
        BUNDLE_RULES
    }

    fn prerequisite_packages(&self) -> Vec<String> {
        owned(["git", "base-devel"])
    }

    fn install_command(&self, packages: &[String]) -> CommandSpec {
        CommandSpec::new("pacman")
            .args(["-S", "--needed", "--noconfirm"])
            .args(packages.iter().cloned())
            .privileged()
    }

    fn reinstall_command(&self, packages: &[String]) -> CommandSpec {
        CommandSpec::new("pacman")
            .args(["-S", "--noconfirm"])
            .args(packages.iter().cloned())
            .privileged()
    }

    fn query_installed_command(&self, package: &str) -> CommandSpec {
        CommandSpec::new("pacman").args(["-Q", package])
    }

    fn enable_repository_command(&self, repo: &str) -> Result<CommandSpec> {
        Err(InstallError::config(format!(
            "arch packages never come from extra repositories (asked for {})",
            repo
        )))
    }

    fn install_local_package_command(&self, path: &Path) -> CommandSpec {
        CommandSpec::new("pacman")
            .args(["-U", "--noconfirm"])
            .arg(path.to_string_lossy())
            .privileged()
    }
}
