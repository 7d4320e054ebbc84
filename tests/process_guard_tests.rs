//! Integration tests for process group cleanup
//!
//! Package managers and compilers fork helpers of their own. These verify that
//! terminating a registered child takes its whole process group down, not just
//! the direct child.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use deskstrap::process_guard::is_process_alive;
use deskstrap::{ChildRegistry, CommandProcessGroup, ProcessGuard};

fn wait_for_death(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !is_process_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

/// Spawn a shell in its own group that backgrounds a long sleep and reports
/// the sleep's PID on stdout
fn spawn_tree() -> (Child, u32) {
    let mut child = Command::new("sh")
        .args(["-c", "sleep 1000 & echo $!; wait"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .in_new_process_group()
        .spawn()
        .expect("spawn sh");

    let stdout = child.stdout.take().expect("piped stdout");
    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line).expect("read grandchild pid");
    let grandchild = line.trim().parse().expect("numeric pid");
    (child, grandchild)
}

#[test]
fn test_child_leads_its_own_process_group() {
    let (mut child, grandchild) = spawn_tree();
    let pgid = nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(child.id() as i32)))
        .expect("getpgid");
    assert_eq!(pgid.as_raw() as u32, child.id());

    let ours = nix::unistd::getpgrp();
    assert_ne!(pgid, ours, "child must not share the test's process group");

    let mut registry = ChildRegistry::default();
    registry.register(child.id());
    registry.terminate_all(Duration::from_millis(500));
    let _ = child.wait();
    assert!(wait_for_death(grandchild, Duration::from_secs(3)));
}

#[test]
fn test_terminate_all_reaches_grandchildren() {
    let (mut child, grandchild) = spawn_tree();
    assert!(is_process_alive(grandchild));

    let mut registry = ChildRegistry::default();
    registry.register(child.id());
    registry.terminate_all(Duration::from_secs(1));

    let _ = child.wait();
    assert!(
        wait_for_death(grandchild, Duration::from_secs(3)),
        "backgrounded grandchild {grandchild} survived group termination"
    );
    assert_eq!(registry.count(), 0);
}

#[test]
fn test_process_guard_reports_global_registry() {
    let guard = ProcessGuard::new();
    let before = guard.child_count();

    let pid = 4_000_000;
    ChildRegistry::global().lock().unwrap().register(pid);
    assert_eq!(guard.child_count(), before + 1);
    ChildRegistry::global().lock().unwrap().unregister(pid);
    assert_eq!(guard.child_count(), before);

    // Dropping the guard would terminate the global registry, which other
    // tests in this binary may still be using
    std::mem::forget(guard);
}
