//! Pre-run environment hygiene.
//!
//! Kills stale processes still holding the registry's ports, so a crashed
//! previous run cannot poison this one. Best-effort: failures are warnings,
//! never errors.

#![cfg(unix)]

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Command;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ServiceRegistry;

const TERM_WAIT: Duration = Duration::from_millis(100);
const TERM_ATTEMPTS: u32 = 20;

pub struct CleanupManager {
    target_ports: Vec<u16>,
}

impl CleanupManager {
    pub fn new(target_ports: Vec<u16>) -> Self {
        Self { target_ports }
    }

    /// Target every port the registry declares.
    pub fn for_registry(registry: &ServiceRegistry) -> Self {
        Self::new(registry.ports())
    }

    /// Free all target ports. Returns how many stale processes were killed.
    pub async fn cleanup(&self) -> usize {
        debug!("🧹 Freeing target ports: {:?}", self.target_ports);
        let mut killed = 0;
        for &port in &self.target_ports {
            for pid in find_processes_using_port(port) {
                if pid == std::process::id() as i32 {
                    continue;
                }
                match kill_gracefully(pid).await {
                    Ok(()) => {
                        debug!("🔓 Freed port {} (killed pid {})", port, pid);
                        killed += 1;
                    }
                    Err(e) => warn!("⚠️ Failed to free port {} (pid {}): {}", port, pid, e),
                }
            }
        }
        killed
    }
}

/// PIDs of processes bound to the port, via `lsof`. An empty list when the
/// port is free or `lsof` is unavailable.
fn find_processes_using_port(port: u16) -> Vec<i32> {
    let output = match Command::new("lsof")
        .arg("-ti")
        .arg(format!(":{port}"))
        .output()
    {
        Ok(output) if output.status.success() => output,
        // lsof exits non-zero when nothing matches.
        _ => return Vec::new(),
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// SIGTERM, bounded wait, then SIGKILL.
async fn kill_gracefully(pid: i32) -> Result<(), String> {
    let nix_pid = Pid::from_raw(pid);
    match signal::kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(nix::errno::Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(format!("SIGTERM failed: {e}")),
    }

    for _ in 0..TERM_ATTEMPTS {
        if !process_exists(pid) {
            return Ok(());
        }
        sleep(TERM_WAIT).await;
    }

    warn!("🔨 Pid {} ignored SIGTERM, using SIGKILL", pid);
    signal::kill(nix_pid, Signal::SIGKILL).map_err(|e| format!("SIGKILL failed: {e}"))?;
    sleep(TERM_WAIT).await;
    if process_exists(pid) {
        return Err(format!("pid {pid} still exists after SIGKILL"));
    }
    Ok(())
}

fn process_exists(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}
