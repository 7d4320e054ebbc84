//! Process lifecycle management for package manager and build processes
//!
//! Package installs and source builds run for minutes and spawn their own
//! children (pacman hooks, compilers, git). If deskstrap dies or a command is
//! killed for inactivity, the whole process tree has to go with it.
//!
//! - Children are spawned in their own process group with `PR_SET_PDEATHSIG`
//! - Running child PIDs are tracked in a registry
//! - Termination signals the process GROUP: SIGTERM, grace period, SIGKILL
//! - A signal handler turns the first SIGINT/SIGTERM/SIGHUP into a cancellation
//!   of the running install, and a second one into an immediate cleanup + exit

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::command_runner::CancellationToken;

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Registry tracking all spawned child process groups
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Prevents a second cleanup pass racing the first
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the process-wide child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!(pid, "registered child process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!(pid, "unregistered child process");
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    /// Terminate all tracked process groups.
    /// Sends SIGTERM first, waits up to `grace_period`, then SIGKILL.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            debug!("cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        info!(count = self.pids.len(), "terminating child processes");

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids {
            signal_group_or_process(pid, Signal::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                info!("all child processes terminated gracefully");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids {
            if is_process_alive(pid) {
                warn!(pid, "process group did not terminate, sending SIGKILL");
                signal_group_or_process(pid, Signal::SIGKILL);
            }
        }

        self.pids.clear();
    }
}

/// Signal a process group, falling back to the single process.
pub(crate) fn signal_group_or_process(pid: u32, sig: Signal) {
    if let Err(e) = send_signal_to_group(pid, sig) {
        debug!(pid, %e, ?sig, "group signal failed, signalling process directly");
        if let Err(e2) = send_signal(pid, sig) {
            debug!(pid, %e2, ?sig, "direct signal failed");
        }
    }
}

fn send_signal(pid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), sig)
}

/// Negative PID addresses every process in the group, so pacman hooks and
/// compiler children receive the signal too
pub(crate) fn send_signal_to_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// Check if a process is still alive (not dead or zombie)
pub fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state; zombies count as dead
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// RAII guard that terminates all registered children on drop.
/// Held by the binary for the lifetime of an install.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        debug!("ProcessGuard dropped, initiating cleanup");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// The first signal cancels `token`, letting the running command be killed
/// and the scheduler unwind with a cancellation error. A second signal tears
/// down every registered child and exits immediately.
pub fn init_signal_handlers(token: CancellationToken) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            if !token.is_cancelled() {
                info!(signal = sig, "received signal, cancelling install");
                token.cancel();
                continue;
            }

            error!(signal = sig, "received second signal, terminating children");
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that dies with us
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe functions
        // (setpgid, prctl) between fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
