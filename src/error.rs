//! Error handling module for deskstrap
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every fatal condition raised by the orchestrator is an `InstallError`; the
//! scheduler wraps it in `InstallError::Phase` before it reaches the caller.

use std::time::Duration;

use thiserror::Error;

use crate::install_state::Phase;
use crate::manual_build::BuildStep;
use crate::types::Distro;

/// Main error type for the installation orchestrator
#[derive(Error, Debug)]
pub enum InstallError {
    /// Process exited with a non-zero status
    #[error("`{command}` failed (exit code {}): {last_line}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        last_line: String,
    },

    /// No output was received within the inactivity window
    #[error("`{command}` produced no output for {timeout:?} and was terminated")]
    Timeout { command: String, timeout: Duration },

    /// Caller requested cancellation
    #[error("`{command}` was cancelled")]
    Cancelled { command: String },

    /// Process could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Enabling an extra repository failed
    #[error("failed to enable repository {repo}: {source}")]
    RepositoryEnable {
        repo: String,
        #[source]
        source: Box<InstallError>,
    },

    /// A step of a source build failed
    #[error("manual build of {package} failed during {step}: {source}")]
    ManualBuild {
        package: String,
        step: BuildStep,
        #[source]
        source: Box<InstallError>,
    },

    /// The build finished but produced nothing matching the artifact pattern
    #[error("no build artifact matching {pattern}")]
    ArtifactNotFound { pattern: String },

    /// The configuration collaborator reported a failure
    #[error("configuration step failed: {0}")]
    Configuration(String),

    /// No backend registered for the distribution
    #[error("unsupported distribution: {0}")]
    UnsupportedDistro(Distro),

    /// Invalid input handed to the orchestrator
    #[error("Configuration error: {0}")]
    Config(String),

    /// Phase state machine violation
    #[error("Phase transition error: {0}")]
    Transition(#[from] crate::install_state::PhaseTransitionError),

    /// IO errors (work directories, metadata files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Fatal error annotated with the phase (and package) it aborted
    #[error("{phase} failed{}: {source}", .package.as_ref().map(|p| format!(" for {p}")).unwrap_or_default())]
    Phase {
        phase: Phase,
        package: Option<String>,
        #[source]
        source: Box<InstallError>,
    },
}

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    /// Create an invalid-input error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an error with the phase and package it aborted
    pub fn in_phase(self, phase: Phase, package: Option<String>) -> Self {
        Self::Phase {
            phase,
            package,
            source: Box::new(self),
        }
    }

    /// Follow the wrapper chain down to the error that started it
    pub fn root_cause(&self) -> &InstallError {
        match self {
            Self::Phase { source, .. }
            | Self::ManualBuild { source, .. }
            | Self::RepositoryEnable { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True if the run ended because a command went silent for too long
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::Timeout { .. })
    }

    /// True if the run ended because the caller cancelled it
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled { .. })
    }

    /// The phase this error aborted, if it has been wrapped
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}
