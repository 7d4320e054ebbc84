//! deskstrap library
//!
//! Package installation orchestrator for provisioning a Wayland desktop:
//! categorizes detected dependencies, enables extra repositories, installs
//! packages and builds the rest from source, streaming progress as it goes.

pub mod categorizer;
pub mod cli;
pub mod command_runner;
pub mod config_file;
pub mod credential;
pub mod distro;
pub mod error;
pub mod install_state;
pub mod installer;
pub mod manual_build;
pub mod mapping;
pub mod process_guard;
pub mod progress;
pub mod repository;
pub mod types;

// Re-export main types for convenience
pub use categorizer::{InstallBucket, InstallPlan, PackageCategorizer, PlannedPackage, ResolutionWarning};
pub use command_runner::{
    CancellationToken, CommandOutput, CommandRunner, CommandSpec, RunnerConfig, StepRange,
};
pub use config_file::ProvisionConfig;
pub use credential::{Credential, Privilege};
pub use distro::{ArchBackend, DistroBackend, DistroRegistry, FedoraBackend, OpenSuseBackend};
pub use error::{InstallError, Result};
pub use install_state::{Phase, PhaseTracker, PhaseTransitionError};
pub use installer::{ConfigurationStep, InstallRequest, InstallSummary, Installer, NoopConfiguration};
pub use manual_build::{BuildStep, ManualBuildConfig, ManualBuildExecutor};
pub use mapping::{BuildStrategy, BundleRule, MappingTable, MetadataPatch, PackageMapping, PackageSource, RepositoryType};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use progress::{LogWindow, ProgressEvent, ProgressSink};
pub use repository::RepositoryEnabler;
pub use types::{
    Dependency, DependencyStatus, Distro, PackageVariant, ReinstallOverrides, Selection, Terminal,
    WindowManager,
};
