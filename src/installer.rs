//! Installation orchestration
//!
//! [`Installer`] drives one run through the fixed phase sequence, asking the
//! categorizer for a plan and handing each bucket to the component that knows
//! how to install it. All progress funnels through the runner's sink, so the
//! caller sees a single ordered event stream ending in either a completion
//! event or an error.

use std::error::Error as StdError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::categorizer::{InstallBucket, InstallPlan, PackageCategorizer};
use crate::command_runner::{CommandRunner, CommandSpec, StepRange};
use crate::credential::Privilege;
use crate::distro::{DistroBackend, DistroRegistry};
use crate::error::{InstallError, Result};
use crate::install_state::{Phase, PhaseTracker};
use crate::manual_build::{ManualBuildConfig, ManualBuildExecutor};
use crate::progress::ProgressEvent;
use crate::repository::RepositoryEnabler;
use crate::types::{Dependency, ReinstallOverrides, Selection};

/// Post-install configuration hook run in the Configuration phase.
pub trait ConfigurationStep: Send + Sync {
    fn apply(
        &self,
        selection: &Selection,
        runner: &CommandRunner,
    ) -> std::result::Result<(), Box<dyn StdError + Send + Sync>>;
}

/// Configuration step that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConfiguration;

impl ConfigurationStep for NoopConfiguration {
    fn apply(
        &self,
        _selection: &Selection,
        _runner: &CommandRunner,
    ) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> {
        Ok(())
    }
}

/// Everything one run needs from the outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub dependencies: Vec<Dependency>,
    pub selection: Selection,
    #[serde(default)]
    pub reinstall: ReinstallOverrides,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct InstallSummary {
    pub plan: InstallPlan,
    /// Phases entered, in order
    pub phases: Vec<Phase>,
    pub skipped: Vec<Phase>,
    pub repositories_enabled: usize,
    pub elapsed_secs: f64,
}

/// Phase scheduler for one installation run.
pub struct Installer {
    registry: Arc<DistroRegistry>,
    runner: CommandRunner,
    build: ManualBuildConfig,
    configuration: Box<dyn ConfigurationStep>,
}

impl Installer {
    pub fn new(registry: Arc<DistroRegistry>, runner: CommandRunner) -> Self {
        Self {
            registry,
            runner,
            build: ManualBuildConfig::default(),
            configuration: Box::new(NoopConfiguration),
        }
    }

    pub fn with_build_config(mut self, build: ManualBuildConfig) -> Self {
        self.build = build;
        self
    }

    pub fn with_configuration(mut self, step: impl ConfigurationStep + 'static) -> Self {
        self.configuration = Box::new(step);
        self
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    /// Categorize the request without installing anything
    pub fn plan(&self, request: &InstallRequest) -> Result<InstallPlan> {
        let backend = self.registry.get(request.selection.distro)?;
        Ok(Self::plan_with(backend, request))
    }

    fn plan_with(backend: &dyn DistroBackend, request: &InstallRequest) -> InstallPlan {
        let table = backend.mapping_table(&request.selection);
        PackageCategorizer::new(&table, backend.bundle_rules())
            .categorize(&request.dependencies, &request.reinstall)
    }

    /// Run every phase. The first failure aborts the run.
    pub fn run(&self, request: &InstallRequest) -> Result<InstallSummary> {
        let started = Instant::now();
        let mut tracker = PhaseTracker::new();

        let outcome = self
            .registry
            .get(request.selection.distro)
            .map_err(|e| e.in_phase(Phase::Prerequisites, None))
            .and_then(|backend| {
                let plan = Self::plan_with(backend, request);
                let enabled = self.execute(backend, &plan, &request.selection, &mut tracker)?;
                Ok((plan, enabled))
            });

        match outcome {
            Ok((plan, repositories_enabled)) => {
                let summary = InstallSummary {
                    plan,
                    phases: tracker.history().iter().map(|(p, _)| *p).collect(),
                    skipped: tracker.skipped().to_vec(),
                    repositories_enabled,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                };
                info!(
                    packages = summary.plan.total_packages(),
                    elapsed_secs = summary.elapsed_secs,
                    "installation complete"
                );
                Ok(summary)
            }
            Err(e) => {
                let failed_in = tracker.current().unwrap_or(Phase::Prerequisites);
                if let Err(te) = tracker.fail() {
                    error!(%te, "could not record failure");
                }
                let message = self.runner.redact(&e.to_string());
                error!(phase = ?failed_in, "{}", message);
                self.runner.sink().emit(
                    ProgressEvent::new(Phase::Failed, failed_in.range().0, Phase::Failed.description())
                        .with_error(message),
                );
                Err(e)
            }
        }
    }

    /// Run on a background thread; events arrive on the sink's receiver.
    pub fn spawn(self, request: InstallRequest) -> JoinHandle<Result<InstallSummary>> {
        thread::spawn(move || self.run(&request))
    }

    fn execute(
        &self,
        backend: &dyn DistroBackend,
        plan: &InstallPlan,
        selection: &Selection,
        tracker: &mut PhaseTracker,
    ) -> Result<usize> {
        self.enter(tracker, Phase::Prerequisites)?;
        self.prerequisites(backend, plan)
            .map_err(|e| e.in_phase(Phase::Prerequisites, None))?;

        let mut enabled = 0;
        if plan.extra.is_empty() {
            tracker.skip(Phase::RepositoryEnable)?;
        } else {
            self.enter(tracker, Phase::RepositoryEnable)?;
            let mut enabler = RepositoryEnabler::new(&self.runner, backend);
            enabled = enabler
                .enable_all(&plan.extra, &StepRange::for_phase(Phase::RepositoryEnable))
                .map_err(|e| {
                    let repo = match &e {
                        InstallError::RepositoryEnable { repo, .. } => Some(repo.clone()),
                        _ => None,
                    };
                    e.in_phase(Phase::RepositoryEnable, repo)
                })?;
        }

        self.install_bucket(tracker, backend, &plan.system, Phase::SystemPackages)?;
        self.install_bucket(tracker, backend, &plan.extra, Phase::ExtraRepoPackages)?;

        if plan.manual.is_empty() {
            tracker.skip(Phase::ManualBuilds)?;
        } else {
            self.enter(tracker, Phase::ManualBuilds)?;
            ManualBuildExecutor::new(&self.runner, backend, &self.build)
                .build_all(&plan.manual, &StepRange::for_phase(Phase::ManualBuilds))
                .map_err(|e| {
                    let package = match &e {
                        InstallError::ManualBuild { package, .. } => Some(package.clone()),
                        _ => None,
                    };
                    e.in_phase(Phase::ManualBuilds, package)
                })?;
        }

        self.enter(tracker, Phase::Configuration)?;
        self.configuration
            .apply(selection, &self.runner)
            .map_err(|e| InstallError::Configuration(e.to_string()).in_phase(Phase::Configuration, None))?;

        tracker.enter(Phase::Complete)?;
        self.runner.sink().emit(
            ProgressEvent::new(Phase::Complete, 1.0, Phase::Complete.description()).complete(),
        );
        Ok(enabled)
    }

    fn enter(&self, tracker: &mut PhaseTracker, phase: Phase) -> Result<()> {
        tracker.enter(phase)?;
        info!(phase = ?phase, "{}", phase.description());
        self.runner
            .sink()
            .emit(ProgressEvent::new(phase, phase.range().0, phase.description()));
        Ok(())
    }

    fn prerequisites(&self, backend: &dyn DistroBackend, plan: &InstallPlan) -> Result<()> {
        if plan.is_empty() {
            info!("nothing to install");
            return Ok(());
        }

        let mut steps: Vec<(CommandSpec, String)> = Vec::new();
        if matches!(self.runner.config().privilege, Privilege::Sudo(_)) {
            // Fails fast on a wrong password
            steps.push((
                CommandSpec::new("true").privileged(),
                "Validating credentials".to_string(),
            ));
        }
        if let Some(refresh) = backend.refresh_command() {
            steps.push((refresh, "Refreshing package metadata".to_string()));
        }
        if !plan.manual.is_empty() {
            let packages = backend.prerequisite_packages();
            if !packages.is_empty() {
                steps.push((
                    backend.install_command(&packages),
                    "Installing build prerequisites".to_string(),
                ));
            }
        }

        let range = StepRange::for_phase(Phase::Prerequisites);
        for (i, (command, label)) in steps.iter().enumerate() {
            self.runner
                .run(command, &range.split(i, steps.len()).with_step(label.clone()))?;
        }
        Ok(())
    }

    fn install_bucket(
        &self,
        tracker: &mut PhaseTracker,
        backend: &dyn DistroBackend,
        bucket: &InstallBucket,
        phase: Phase,
    ) -> Result<()> {
        if bucket.is_empty() {
            tracker.skip(phase)?;
            return Ok(());
        }
        self.enter(tracker, phase)?;

        let mut commands = Vec::new();
        let install = bucket.install_targets();
        if !install.is_empty() {
            let label = format!("Installing {} packages", install.len());
            commands.push((backend.install_command(&install), label, install));
        }
        let reinstall = bucket.reinstall_targets();
        if !reinstall.is_empty() {
            let label = format!("Reinstalling {}", reinstall.join(", "));
            commands.push((backend.reinstall_command(&reinstall), label, reinstall));
        }

        let range = StepRange::for_phase(phase);
        for (i, (command, label, packages)) in commands.iter().enumerate() {
            self.runner
                .run(command, &range.split(i, commands.len()).with_step(label.clone()))
                .map_err(|e| e.in_phase(phase, Some(packages.join(", "))))?;
        }
        Ok(())
    }
}
