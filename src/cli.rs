use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Environment variable read for the sudo password when `--password-stdin`
/// is not given
pub const PASSWORD_ENV: &str = "DESKSTRAP_SUDO_PASSWORD";

/// deskstrap - provision a Wayland desktop from a dependency list
#[derive(Parser, Debug)]
#[command(name = "deskstrap")]
#[command(about = "Install the packages a desktop setup needs, building from source where required")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install everything a provisioning file asks for
    Install {
        /// Path to the provisioning file
        #[arg(short, long)]
        config: PathBuf,

        /// Print progress events as JSON lines on stdout
        #[arg(long)]
        json: bool,

        /// Show the commands that would run without executing them
        #[arg(long)]
        dry_run: bool,

        /// Read the sudo password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },
    /// Show how dependencies would be split across repositories
    Plan {
        /// Path to the provisioning file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a provisioning file
    Validate {
        /// Path to the provisioning file to validate
        config: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_flags() {
        let cli = Cli::try_parse_from([
            "deskstrap",
            "install",
            "--config",
            "desk.json",
            "--json",
            "--password-stdin",
        ])
        .unwrap();
        match cli.command {
            Commands::Install {
                config,
                json,
                dry_run,
                password_stdin,
            } => {
                assert_eq!(config, PathBuf::from("desk.json"));
                assert!(json);
                assert!(!dry_run);
                assert!(password_stdin);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_validate_takes_positional_path() {
        let cli = Cli::try_parse_from(["deskstrap", "validate", "desk.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Validate { .. }));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["deskstrap"]).is_err());
    }
}
