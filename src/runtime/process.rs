//! Process lifecycle control: spawn, liveness wait, graceful-then-forced
//! stop, and best-effort total teardown.
//!
//! Handles live in a table owned by the controller; everything else reads
//! service state through the accessor methods. A confirmed stop always reaps
//! the child, so no zombie processes survive a run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::config::ServiceDescriptor;
use crate::error::{StartError, StopError};

/// Grace window between SIGTERM and SIGKILL.
pub const STOP_GRACE_WINDOW: Duration = Duration::from_secs(10);

const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL_LIMIT: usize = 8 * 1024;

/// Lifecycle state of one managed service process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Exit status and captured stderr tail of a process that died.
#[derive(Debug, Clone)]
pub struct ExitInfo {
    pub status: Option<i32>,
    pub stderr_tail: String,
}

/// Handle for a managed service process. Owned exclusively by the
/// controller's table; the child is dropped once the stop is confirmed.
pub struct ServiceHandle {
    pub id: String,
    pub display_name: String,
    pub port: u16,
    pub pid: u32,
    pub state: ServiceState,
    pub exit_info: Option<ExitInfo>,
    child: Option<Child>,
}

/// Spawns and terminates one OS process per service.
pub struct ProcessController {
    /// Working directory for every launched executable; relative executable
    /// paths resolve against it too.
    build_dir: PathBuf,
    grace_window: Duration,
    handles: Mutex<HashMap<String, ServiceHandle>>,
}

impl ProcessController {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            grace_window: STOP_GRACE_WINDOW,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Override the SIGTERM-to-SIGKILL grace window (fluent API)
    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    fn resolve_executable(&self, executable: &std::path::Path) -> PathBuf {
        if executable.is_absolute() {
            executable.to_path_buf()
        } else {
            self.build_dir.join(executable)
        }
    }

    /// Launch the descriptor's executable and wait up to its startup budget.
    /// An early exit fails the start and carries the captured stderr tail; a
    /// process still alive at budget expiry is Running. Liveness only —
    /// readiness is the health gate's job.
    pub async fn start(&self, descriptor: &ServiceDescriptor) -> Result<u32, StartError> {
        {
            let handles = self.handles.lock().await;
            if let Some(handle) = handles.get(&descriptor.id) {
                if matches!(handle.state, ServiceState::Starting | ServiceState::Running) {
                    return Err(StartError::AlreadyRunning {
                        id: descriptor.id.clone(),
                    });
                }
            }
        }

        let executable = self.resolve_executable(&descriptor.executable);
        if !executable.exists() {
            return Err(StartError::ExecutableNotFound { path: executable });
        }

        let mut cmd = Command::new(&executable);
        cmd.args(&descriptor.args)
            .current_dir(&self.build_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| StartError::Spawn {
            id: descriptor.id.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);
        tracing::info!("🚀 Started {} (PID: {})", descriptor.display_name, pid);

        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(stderr, Arc::clone(&stderr_tail));
        }
        if let Some(stdout) = child.stdout.take() {
            spawn_stdout_drain(stdout);
        }

        // Liveness wait: the process must survive its startup budget.
        let deadline = Instant::now() + descriptor.startup_budget;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    // Give the drain task a beat to flush the last lines.
                    sleep(Duration::from_millis(50)).await;
                    let tail = String::from_utf8_lossy(&stderr_tail.lock().await)
                        .trim()
                        .to_string();
                    let mut handles = self.handles.lock().await;
                    handles.insert(
                        descriptor.id.clone(),
                        ServiceHandle {
                            id: descriptor.id.clone(),
                            display_name: descriptor.display_name.clone(),
                            port: descriptor.port,
                            pid,
                            state: ServiceState::Failed,
                            exit_info: Some(ExitInfo {
                                status: status.code(),
                                stderr_tail: tail.clone(),
                            }),
                            child: None,
                        },
                    );
                    return Err(StartError::ExitedDuringStartup {
                        id: descriptor.id.clone(),
                        status: status.to_string(),
                        stderr_tail: tail,
                    });
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    sleep(LIVENESS_POLL_INTERVAL).await;
                }
                Err(source) => {
                    return Err(StartError::Spawn {
                        id: descriptor.id.clone(),
                        source,
                    });
                }
            }
        }

        tracing::info!(
            "✅ {} alive after startup budget ({:?})",
            descriptor.display_name,
            descriptor.startup_budget
        );
        let mut handles = self.handles.lock().await;
        handles.insert(
            descriptor.id.clone(),
            ServiceHandle {
                id: descriptor.id.clone(),
                display_name: descriptor.display_name.clone(),
                port: descriptor.port,
                pid,
                state: ServiceState::Running,
                exit_info: None,
                child: Some(child),
            },
        );
        Ok(pid)
    }

    /// Graceful termination with forced-kill escalation. Always reaps the
    /// child before returning. Idempotent: stopping an already-stopped or
    /// unknown service is a no-op.
    pub async fn stop(&self, id: &str) -> Result<(), StopError> {
        let (mut child, display_name) = {
            let mut handles = self.handles.lock().await;
            let Some(handle) = handles.get_mut(id) else {
                return Ok(());
            };
            if matches!(
                handle.state,
                ServiceState::Stopped | ServiceState::Failed | ServiceState::NotStarted
            ) {
                return Ok(());
            }
            let Some(child) = handle.child.take() else {
                handle.state = ServiceState::Stopped;
                return Ok(());
            };
            handle.state = ServiceState::Stopping;
            (child, handle.display_name.clone())
        };
        // The table lock is not held across the grace window.

        let result = terminate(&mut child, id, self.grace_window).await;
        drop(child);

        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get_mut(id) {
            handle.state = ServiceState::Stopped;
        }
        match &result {
            Ok(()) => tracing::info!("🛑 Stopped {}", display_name),
            Err(e) => tracing::warn!("⚠️ Stop of {} reported: {}", display_name, e),
        }
        result
    }

    /// Apply [`stop`](Self::stop) across services in the given order,
    /// continuing past individual failures. Teardown is best-effort and
    /// total.
    pub async fn stop_all(&self, order: &[String]) -> Vec<(String, StopError)> {
        if !order.is_empty() {
            tracing::info!("🛑 Stopping {} services", order.len());
        }
        let mut failures = Vec::new();
        for id in order {
            if let Err(e) = self.stop(id).await {
                failures.push((id.clone(), e));
            }
        }
        failures
    }

    /// Lifecycle state for a service; `NotStarted` when no start was ever
    /// attempted.
    pub async fn state(&self, id: &str) -> ServiceState {
        self.handles
            .lock()
            .await
            .get(id)
            .map(|handle| handle.state)
            .unwrap_or(ServiceState::NotStarted)
    }

    /// Live check against the OS, not just the recorded state.
    pub async fn is_running(&self, id: &str) -> bool {
        let mut handles = self.handles.lock().await;
        let Some(handle) = handles.get_mut(id) else {
            return false;
        };
        match handle.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn pid(&self, id: &str) -> Option<u32> {
        self.handles.lock().await.get(id).map(|handle| handle.pid)
    }

    pub async fn exit_info(&self, id: &str) -> Option<ExitInfo> {
        self.handles
            .lock()
            .await
            .get(id)
            .and_then(|handle| handle.exit_info.clone())
    }
}

#[async_trait::async_trait]
impl crate::traits::ProcessControl for ProcessController {
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<u32, StartError> {
        ProcessController::start(self, descriptor).await
    }

    async fn stop(&self, id: &str) -> Result<(), StopError> {
        ProcessController::stop(self, id).await
    }

    async fn stop_all(&self, order: &[String]) -> Vec<(String, StopError)> {
        ProcessController::stop_all(self, order).await
    }

    async fn is_running(&self, id: &str) -> bool {
        ProcessController::is_running(self, id).await
    }
}

/// SIGTERM first, SIGKILL after the grace window, then reap.
async fn terminate(child: &mut Child, id: &str, grace_window: Duration) -> Result<(), StopError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => tracing::warn!("⚠️ Failed to SIGTERM pid {}: {}", pid, e),
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    let deadline = Instant::now() + grace_window;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {
                if Instant::now() >= deadline {
                    break;
                }
                sleep(LIVENESS_POLL_INTERVAL).await;
            }
            Err(source) => {
                return Err(StopError::Wait {
                    id: id.to_string(),
                    source,
                });
            }
        }
    }

    tracing::warn!("🔨 '{}' did not stop within {:?}, force killing", id, grace_window);
    child.kill().await.map_err(|source| StopError::Kill {
        id: id.to_string(),
        source,
    })
}

fn spawn_stderr_drain(stderr: ChildStderr, buffer: Arc<Mutex<Vec<u8>>>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut buf = buffer.lock().await;
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
            let excess = buf.len().saturating_sub(STDERR_TAIL_LIMIT);
            if excess > 0 {
                buf.drain(..excess);
            }
        }
    });
}

/// Consume stdout so a chatty service never blocks on a full pipe.
fn spawn_stdout_drain(stdout: ChildStdout) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(_)) = lines.next_line().await {}
    });
}
