//! deskstrap - Main entry point
//!
//! Headless front end for the installation orchestrator: reads a
//! provisioning file, runs the installer on a worker thread and prints the
//! progress stream.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use deskstrap::cli::{Cli, Commands, PASSWORD_ENV};
use deskstrap::process_guard::{self, ProcessGuard};
use deskstrap::{
    CancellationToken, CommandRunner, Credential, DistroRegistry, InstallPlan, Installer,
    PackageCategorizer, Privilege, ProgressEvent, ProgressSink, ProvisionConfig, RunnerConfig,
};

/// Exit status after SIGINT-style cancellation
const EXIT_CANCELLED: u8 = 130;

/// Logs go to stderr so stdout stays free for progress output
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse_args();
    debug!(?cli, "CLI arguments parsed");

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Validate { config } => {
            info!("Validating configuration file: {:?}", config);
            let loaded = load_config(&config)?;
            println!(
                "✓ Configuration file is valid: {} dependencies for {} / {}",
                loaded.dependencies.len(),
                loaded.distro,
                loaded.window_manager
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Plan { config } => {
            let loaded = load_config(&config)?;
            let registry = DistroRegistry::with_defaults();
            let backend = registry.get(loaded.distro)?;
            let request = loaded.to_request();
            let table = backend.mapping_table(&request.selection);
            let plan = PackageCategorizer::new(&table, backend.bundle_rules())
                .categorize(&request.dependencies, &request.reinstall);
            print_plan(&plan);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Install {
            config,
            json,
            dry_run,
            password_stdin,
        } => install(&config, json, dry_run, password_stdin),
    }
}

fn load_config(path: &Path) -> Result<ProvisionConfig> {
    let config = ProvisionConfig::load_from_file(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", path))?;
    Ok(config)
}

fn read_credential(from_stdin: bool) -> Result<Option<Credential>> {
    if from_stdin {
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read password from stdin")?;
        return Ok(Some(Credential::new(line)));
    }
    Ok(std::env::var(PASSWORD_ENV).ok().map(Credential::new))
}

fn install(path: &Path, json: bool, dry_run: bool, password_stdin: bool) -> Result<ExitCode> {
    let config = load_config(path)?;
    let privilege = Privilege::detect(read_credential(password_stdin)?).without_unneeded_password();
    if matches!(&privilege, Privilege::Sudo(c) if c.is_empty()) && !dry_run {
        warn!("no sudo password supplied, relying on cached credentials or NOPASSWD");
    }

    let cancel = CancellationToken::new();
    if let Err(e) = process_guard::init_signal_handlers(cancel.clone()) {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    let (sink, events) = ProgressSink::channel();
    let runner = CommandRunner::new(
        RunnerConfig {
            timeout: config.timeout(),
            dry_run,
            privilege,
            ..RunnerConfig::default()
        },
        sink,
        cancel,
    );
    let installer = Installer::new(Arc::new(DistroRegistry::with_defaults()), runner)
        .with_build_config(config.build_config());

    info!(distro = %config.distro, dry_run, "starting installation");
    let handle = installer.spawn(config.to_request());

    let mut printer = EventPrinter::new(json);
    for event in events {
        printer.print(&event)?;
    }

    let result = handle
        .join()
        .map_err(|_| anyhow!("installer thread panicked"))?;

    match result {
        Ok(summary) => {
            for warning in &summary.plan.warnings {
                eprintln!("! {}", warning);
            }
            if !json {
                println!(
                    "✓ Installed {} packages in {:.0}s",
                    summary.plan.total_packages(),
                    summary.elapsed_secs
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("✗ Installation cancelled");
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_plan(plan: &InstallPlan) {
    for bucket in plan.buckets() {
        if bucket.is_empty() {
            continue;
        }
        println!("{}:", bucket.kind());
        for entry in bucket.entries() {
            let origin = match (entry.source.repo(), entry.source.strategy()) {
                (Some(repo), _) => format!(" [{}]", repo),
                (_, Some(strategy)) => format!(" [{}]", strategy.label()),
                _ => String::new(),
            };
            let reinstall = if entry.reinstall { " (reinstall)" } else { "" };
            println!("  {} <- {}{}{}", entry.package, entry.dependency, origin, reinstall);
        }
    }
    if !plan.satisfied.is_empty() {
        println!("already installed: {}", plan.satisfied.join(", "));
    }
    for warning in &plan.warnings {
        println!("! {}", warning);
    }
    if plan.is_empty() {
        println!("nothing to install");
    }
}

/// Renders events either as JSON lines or as a compact human log
struct EventPrinter {
    json: bool,
    last_step: String,
}

impl EventPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            last_step: String::new(),
        }
    }

    fn print(&mut self, event: &ProgressEvent) -> Result<()> {
        let mut out = io::stdout().lock();
        if self.json {
            let line = serde_json::to_string(event).context("Failed to serialize event")?;
            writeln!(out, "{}", line)?;
            return Ok(());
        }

        if event.step != self.last_step {
            let lock = if event.needs_privilege { " 🔒" } else { "" };
            writeln!(out, "[{:>3.0}%] {}{}", event.progress * 100.0, event.step, lock)?;
            self.last_step.clone_from(&event.step);
        }
        if let Some(line) = &event.log_output {
            writeln!(out, "       {}", line)?;
        }
        if let Some(err) = &event.error {
            eprintln!("✗ {}", err);
        }
        Ok(())
    }
}
