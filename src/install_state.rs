//! Install Phase State Machine
//!
//! This module owns the ordered list of installation phases and the progress
//! sub-range each one reserves. `PhaseTracker` is the scheduler's source of
//! truth for where a run is and refuses transitions that would move backwards.
//!
//! # Phase Flow
//!
//! ```text
//! Prerequisites        0.05 - 0.12
//!     ↓
//! RepositoryEnable     0.15 - 0.27   (skipped without extra-repo packages)
//!     ↓
//! SystemPackages       0.35 - 0.60   (skipped if empty)
//!     ↓
//! ExtraRepoPackages    0.62 - 0.72   (skipped if empty)
//!     ↓
//! ManualBuilds         0.72 - 0.88   (skipped if empty)
//!     ↓
//! Configuration        0.90
//!     ↓
//! Complete             1.00
//!
//! (Any non-terminal phase can transition to Failed)
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

/// Installation phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum Phase {
    Prerequisites = 0,
    RepositoryEnable = 1,
    SystemPackages = 2,
    ExtraRepoPackages = 3,
    ManualBuilds = 4,
    Configuration = 5,
    Complete = 6,
    /// Terminal failure state
    Failed = 255,
}

impl Phase {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Progress sub-range reserved for this phase, as `(start, end)`
    pub const fn range(self) -> (f64, f64) {
        match self {
            Self::Prerequisites => (0.05, 0.12),
            Self::RepositoryEnable => (0.15, 0.27),
            Self::SystemPackages => (0.35, 0.60),
            Self::ExtraRepoPackages => (0.62, 0.72),
            Self::ManualBuilds => (0.72, 0.88),
            Self::Configuration => (0.90, 0.90),
            Self::Complete => (1.0, 1.0),
            Self::Failed => (0.0, 0.0),
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Prerequisites => "Preparing prerequisites",
            Self::RepositoryEnable => "Enabling repositories",
            Self::SystemPackages => "Installing system packages",
            Self::ExtraRepoPackages => "Installing extra repository packages",
            Self::ManualBuilds => "Building packages from source",
            Self::Configuration => "Applying configuration",
            Self::Complete => "Installation complete",
            Self::Failed => "Installation failed",
        }
    }

    /// All phases in order (excluding Failed)
    pub const fn all() -> &'static [Self] {
        &[
            Self::Prerequisites,
            Self::RepositoryEnable,
            Self::SystemPackages,
            Self::ExtraRepoPackages,
            Self::ManualBuilds,
            Self::Configuration,
            Self::Complete,
        ]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during phase transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransitionError {
    #[error("Cannot go backwards from {from} to {to} (installation is forward-only)")]
    BackwardTransition { from: Phase, to: Phase },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: Phase },

    #[error("Already at phase {phase}")]
    AlreadyAtPhase { phase: Phase },
}

/// Tracks the current phase of one run.
///
/// Unlike a strict stage chain, phases may be skipped (an empty bucket has
/// nothing to install) but never revisited.
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker {
    current: Option<Phase>,
    failed_at: Option<Phase>,
    skipped: Vec<Phase>,
    /// (phase, unix timestamp) in the order phases were entered
    history: Vec<(Phase, u64)>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first phase is entered
    #[inline]
    pub fn current(&self) -> Option<Phase> {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<Phase> {
        self.failed_at
    }

    pub fn history(&self) -> &[(Phase, u64)] {
        &self.history
    }

    pub fn skipped(&self) -> &[Phase] {
        &self.skipped
    }

    pub fn is_complete(&self) -> bool {
        self.current == Some(Phase::Complete)
    }

    /// Enter `target`, which must lie strictly after the current phase.
    pub fn enter(&mut self, target: Phase) -> Result<Phase, PhaseTransitionError> {
        if let Some(current) = self.current {
            if current.is_terminal() {
                return Err(PhaseTransitionError::FromTerminalState { from: current });
            }
            if target == current {
                return Err(PhaseTransitionError::AlreadyAtPhase { phase: target });
            }
            if target.order() < current.order() || target == Phase::Failed {
                return Err(PhaseTransitionError::BackwardTransition {
                    from: current,
                    to: target,
                });
            }
        }

        self.record(target);
        self.current = Some(target);
        Ok(target)
    }

    /// Record that a phase was passed over because it had nothing to do.
    pub fn skip(&mut self, phase: Phase) -> Result<(), PhaseTransitionError> {
        if let Some(current) = self.current {
            if current.is_terminal() {
                return Err(PhaseTransitionError::FromTerminalState { from: current });
            }
            if phase.order() <= current.order() {
                return Err(PhaseTransitionError::BackwardTransition {
                    from: current,
                    to: phase,
                });
            }
        }
        self.skipped.push(phase);
        Ok(())
    }

    /// Mark the run as failed in the current phase.
    pub fn fail(&mut self) -> Result<(), PhaseTransitionError> {
        if let Some(current) = self.current {
            if current.is_terminal() {
                return Err(PhaseTransitionError::FromTerminalState { from: current });
            }
        }
        self.failed_at = self.current;
        self.record(Phase::Failed);
        self.current = Some(Phase::Failed);
        Ok(())
    }

    fn record(&mut self, phase: Phase) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.history.push((phase, timestamp));
    }
}
