//! openSUSE Tumbleweed: zypper, with Wayland packages from the OBS X11:Wayland project.

use std::path::Path;

use crate::command_runner::CommandSpec;
use crate::error::Result;
use crate::mapping::{BuildStrategy, MappingTable, PackageMapping};
use crate::types::{Distro, Selection, Terminal, WindowManager};

use super::{owned, DistroBackend};

pub const WAYLAND_OBS_REPO: &str =
    "https://download.opensuse.org/repositories/X11:/Wayland/openSUSE_Tumbleweed/";

/// Lower number wins; the default repositories sit at 99
const WAYLAND_OBS_PRIORITY: u32 = 90;

const WALLUST_REPO: &str = "https://codeberg.org/explosion-mental/wallust.git";

const WAYLAND_OBS_PACKAGES: &[&str] = &[
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
    "swww",
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
    "cliphist",
    "brightnessctl",
    "playerctl",
    "pipewire",
    "wireplumber",
    "jq",
    "git",
];

/// zypper alias for a repository URL.
///
/// `https://download.opensuse.org/repositories/X11:/Wayland/openSUSE_Tumbleweed/`
/// becomes `X11_Wayland`; URLs outside the OBS layout fall back to a
/// sanitized form of the whole URL.
pub fn repo_alias(url: &str) -> String {
    if let Some((_, project)) = url.split_once("/repositories/") {
        let name: String = project
            .split('/')
            .filter(|s| !s.is_empty())
            .take_while(|s| !s.starts_with("openSUSE_"))
            .collect();
        if !name.is_empty() {
            return name.replace(':', "_");
        }
    }

    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let alias: String = without_scheme
        .trim_end_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    alias.trim_matches('-').to_string()
}

#[derive(Debug, Default, Clone)]
pub struct OpenSuseBackend;

impl OpenSuseBackend {
    pub fn new() -> Self {
        Self
    }

    fn zypper() -> CommandSpec {
        CommandSpec::new("zypper").arg("--non-interactive")
    }
}

impl DistroBackend for OpenSuseBackend {
    fn distro(&self) -> Distro {
        Distro::OpenSuse
    }

    // The OBS project carries release builds only, so variants are ignored
    fn mapping_table(&self, selection: &Selection) -> MappingTable {
        let mut table = MappingTable::new();

        for &name in WAYLAND_OBS_PACKAGES {
            table.insert(name, PackageMapping::extra(name, WAYLAND_OBS_REPO));
        }
        for &name in SAME_NAME {
            table.insert(name, PackageMapping::system(name));
        }

        table.insert("rofi", PackageMapping::system("rofi-wayland"));
        table.insert("nerd-font", PackageMapping::system("jetbrains-mono-fonts"));
        table.insert(
            "wallust",
            PackageMapping::manual(
                "wallust",
                BuildStrategy::cargo_git(WALLUST_REPO, "wallust").with_shared_prerequisite("cargo"),
            ),
        );

        let (notifier, polkit) = match selection.window_manager {
            WindowManager::Hyprland => ("SwayNotificationCenter", "polkit-kde-agent-6"),
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
            table.insert(terminal.to_string(), PackageMapping::system(terminal.to_string()));
        }
        table.insert(
            "terminal",
            PackageMapping::system(selection.terminal.to_string()),
        );

        table
    }

    fn prerequisite_packages(&self) -> Vec<String> {
        owned(["git", "gcc", "gcc-c++", "make"])
    }

    fn refresh_command(&self) -> Option<CommandSpec> {
        Some(
            Self::zypper()
                .args(["--gpg-auto-import-keys", "refresh"])
                .privileged(),
        )
    }

    fn install_command(&self, packages: &[String]) -> CommandSpec {
        Self::zypper()
            .args(["--gpg-auto-import-keys", "install", "--no-recommends"])
            .args(packages.iter().cloned())
            .privileged()
    }

    fn reinstall_command(&self, packages: &[String]) -> CommandSpec {
        Self::zypper()
            .args(["install", "--force"])
            .args(packages.iter().cloned())
            .privileged()
    }

    fn query_installed_command(&self, package: &str) -> CommandSpec {
        CommandSpec::new("rpm").args(["-q", package])
    }

    fn enable_repository_command(&self, repo: &str) -> Result<CommandSpec> {
        Ok(Self::zypper()
            .args(["addrepo", "--refresh", repo])
            .arg(repo_alias(repo))
            .privileged())
    }

    fn post_enable_action(&self, repo: &str) -> Option<CommandSpec> {
        (repo == WAYLAND_OBS_REPO).then(|| {
            Self::zypper()
                .args(["modifyrepo", "--priority"])
                .arg(WAYLAND_OBS_PRIORITY.to_string())
                .arg(repo_alias(repo))
                .privileged()
        })
    }

    fn install_local_package_command(&self, path: &Path) -> CommandSpec {
        Self::zypper()
            .args(["install", "--allow-unsigned-rpm"])
            .arg(path.to_string_lossy())
            .privileged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_alias_from_obs_url() {
        assert_eq!(repo_alias(WAYLAND_OBS_REPO), "X11_Wayland");
        assert_eq!(
            repo_alias("https://download.opensuse.org/repositories/home:/someone/openSUSE_Tumbleweed/"),
            "home_someone"
        );
    }

    #[test]
    fn test_repo_alias_fallback() {
        assert_eq!(repo_alias("https://example.org/rpms/"), "example-org-rpms");
    }

    #[test]
    fn test_enable_and_priority_use_same_alias() {
        let backend = OpenSuseBackend::new();
        let enable = backend.enable_repository_command(WAYLAND_OBS_REPO).unwrap();
        let post = backend.post_enable_action(WAYLAND_OBS_REPO).unwrap();
        assert_eq!(enable.args.last(), post.args.last());
        assert_eq!(
            post.args,
            vec!["--non-interactive", "modifyrepo", "--priority", "90", "X11_Wayland"]
        );
    }
}
