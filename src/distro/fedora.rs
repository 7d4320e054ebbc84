//! Fedora: dnf, with the Hyprland stack and a few extras from COPR.

use std::path::Path;

use crate::command_runner::CommandSpec;
use crate::error::Result;
use crate::mapping::{BuildStrategy, MappingTable, PackageMapping};
use crate::types::{Distro, PackageVariant, Selection, Terminal, WindowManager};

use super::{owned, DistroBackend};

pub const HYPRLAND_COPR: &str = "solopasha/hyprland";
pub const SWAYNC_COPR: &str = "erikreider/SwayNotificationCenter";
pub const WEZTERM_COPR: &str = "wezfurlong/wezterm-nightly";

/// Wins over the Fedora repositories, which ship older Hyprland builds
const HYPRLAND_COPR_PRIORITY: u32 = 1;

const WALLUST_REPO: &str = "https://codeberg.org/explosion-mental/wallust.git";

/// Packages provided by the Hyprland COPR. Those with a `-git` build honour
/// the git variant.
const HYPRLAND_COPR_PACKAGES: &[(&str, bool)] = &[
    ("hyprland", true),
    ("hyprpaper", true),
    ("hyprlock", true),
    ("hypridle", true),
    ("hyprutils", true),
    ("hyprlang", true),
    ("hyprcursor", true),
    ("aquamarine", true),
    ("hyprwayland-scanner", true),
    ("xdg-desktop-portal-hyprland", true),
    ("cliphist", false),
    ("swww", false),
];

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
    "brightnessctl",
    "playerctl",
    "pipewire",
    "wireplumber",
    "jq",
    "git",
];

#[derive(Debug, Default, Clone)]
pub struct FedoraBackend;

impl FedoraBackend {
    pub fn new() -> Self {
        Self
    }

    fn terminal_mapping(terminal: Terminal) -> PackageMapping {
        match terminal {
            Terminal::Wezterm => PackageMapping::extra("wezterm", WEZTERM_COPR),
            other => PackageMapping::system(other.to_string()),
        }
    }
}

impl DistroBackend for FedoraBackend {
    fn distro(&self) -> Distro {
        Distro::Fedora
    }

    fn mapping_table(&self, selection: &Selection) -> MappingTable {
        let mut table = MappingTable::new();

        for &(name, has_git) in HYPRLAND_COPR_PACKAGES {
            let package = match selection.variant_of(name) {
                PackageVariant::Git if has_git => format!("{}-git", name),
                _ => name.to_string(),
            };
            table.insert(name, PackageMapping::extra(package, HYPRLAND_COPR));
        }
        for &name in SAME_NAME {
            table.insert(name, PackageMapping::system(name));
        }

        table.insert("rofi", PackageMapping::system("rofi-wayland"));
        table.insert("nerd-font", PackageMapping::system("jetbrains-mono-fonts-all"));
        table.insert(
            "wallust",
            PackageMapping::manual(
                "wallust",
                BuildStrategy::cargo_git(WALLUST_REPO, "wallust").with_shared_prerequisite("cargo"),
            ),
        );

        match selection.window_manager {
            WindowManager::Hyprland => {
                table.insert(
                    "notification-daemon",
                    PackageMapping::extra("SwayNotificationCenter", SWAYNC_COPR),
                );
                table.insert(
                    "polkit-agent",
                    PackageMapping::extra("hyprpolkitagent", HYPRLAND_COPR),
                );
            }
            WindowManager::Sway => {
                table.insert("notification-daemon", PackageMapping::system("mako"));
                table.insert("polkit-agent", PackageMapping::system("polkit-gnome"));
            }
        }

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

    fn prerequisite_packages(&self) -> Vec<String> {
        owned(["git", "gcc", "gcc-c++", "make"])
    }

    fn refresh_command(&self) -> Option<CommandSpec> {
        Some(CommandSpec::new("dnf").args(["makecache", "-y"]).privileged())
    }

    fn install_command(&self, packages: &[String]) -> CommandSpec {
        CommandSpec::new("dnf")
            .args(["install", "-y"])
            .args(packages.iter().cloned())
            .privileged()
    }

    fn reinstall_command(&self, packages: &[String]) -> CommandSpec {
        CommandSpec::new("dnf")
            .args(["reinstall", "-y"])
            .args(packages.iter().cloned())
            .privileged()
    }

    fn query_installed_command(&self, package: &str) -> CommandSpec {
        CommandSpec::new("rpm").args(["-q", package])
    }

    fn enable_repository_command(&self, repo: &str) -> Result<CommandSpec> {
        Ok(CommandSpec::new("dnf")
            .args(["copr", "enable", "-y", repo])
            .privileged())
    }

    fn post_enable_action(&self, repo: &str) -> Option<CommandSpec> {
        if repo != HYPRLAND_COPR {
            return None;
        }
        let repo_id = format!("copr:copr.fedorainfracloud.org:{}", repo.replace('/', ":"));
        Some(
            CommandSpec::new("dnf")
                .args(["config-manager", "setopt"])
                .arg(format!("{}.priority={}", repo_id, HYPRLAND_COPR_PRIORITY))
                .privileged(),
        )
    }

    fn install_local_package_command(&self, path: &Path) -> CommandSpec {
        CommandSpec::new("dnf")
            .args(["install", "-y"])
            .arg(path.to_string_lossy())
            .privileged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyprland_comes_from_copr() {
        let selection = Selection::new(Distro::Fedora, WindowManager::Hyprland, Terminal::Kitty)
            .with_variant("hyprland", PackageVariant::Git)
            .with_variant("swww", PackageVariant::Git);
        let table = FedoraBackend::new().mapping_table(&selection);

        assert_eq!(
            table.get("hyprland").unwrap(),
            &PackageMapping::extra("hyprland-git", HYPRLAND_COPR)
        );
        // No git build of swww in the COPR
        assert_eq!(table.get("swww").unwrap().package, "swww");
        assert!(table.get("cursor-theme").is_none());
    }

    #[test]
    fn test_priority_adjusted_only_for_hyprland_copr() {
        let backend = FedoraBackend::new();
        let action = backend.post_enable_action(HYPRLAND_COPR).unwrap();
        assert_eq!(
            action.args.last().map(String::as_str),
            Some("copr:copr.fedorainfracloud.org:solopasha:hyprland.priority=1")
        );
        assert!(backend.post_enable_action(SWAYNC_COPR).is_none());
    }

    #[test]
    fn test_wezterm_nightly_copr() {
        let selection = Selection::new(Distro::Fedora, WindowManager::Sway, Terminal::Wezterm);
        let table = FedoraBackend::new().mapping_table(&selection);
        assert_eq!(table.get("terminal").unwrap().source.repo(), Some(WEZTERM_COPR));
        assert_eq!(table.get("notification-daemon").unwrap().package, "mako");
    }
}
