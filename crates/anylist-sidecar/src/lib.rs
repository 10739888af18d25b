//! Supervisor for the locally spawned AnyList server binary.
//!
//! When a deployment configures a server binary instead of a remote address,
//! the supervisor spawns it on loopback, pumps its output into tracing and a
//! bounded ring buffer, watches for exit, and reports availability to the
//! HTTP client. There is deliberately no restart policy: a crashed server
//! stays down until the operator reconfigures and the runtime is set up
//! again.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};

use anylist_core::{AnylistError, BridgeConfig, OutputRingBuffer, OutputStream, Result};

const OUTPUT_RING_CAPACITY: usize = 2000;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Supervised process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Launch parameters for the server binary, fixed at construction.
#[derive(Debug, Clone)]
struct LaunchSpec {
    binary: PathBuf,
    email: String,
    password: String,
    credentials_file: PathBuf,
    port: u16,
}

pub struct ServerSupervisor {
    spec: LaunchSpec,
    state: Arc<RwLock<SupervisorState>>,
    /// Serializes start/stop transitions so two callers can't double-spawn.
    lifecycle_lock: Mutex<()>,
    child: Arc<Mutex<Option<Child>>>,
    output: Arc<OutputRingBuffer>,
}

impl ServerSupervisor {
    /// Builds a supervisor from the bridge configuration. Requires the
    /// local-binary fields; `BridgeConfig::validate` guarantees them when a
    /// binary is configured.
    pub fn from_config(config: &BridgeConfig) -> Result<Arc<Self>> {
        let binary = config.server_binary.clone().ok_or_else(|| {
            AnylistError::InvalidConfig("server_binary is not configured".to_string())
        })?;
        let email = config.email.clone().ok_or_else(|| {
            AnylistError::InvalidConfig("server_binary requires email".to_string())
        })?;
        let password = config.password.clone().ok_or_else(|| {
            AnylistError::InvalidConfig("server_binary requires password".to_string())
        })?;

        Ok(Arc::new(Self {
            spec: LaunchSpec {
                binary,
                email,
                password,
                credentials_file: config.credentials_file.clone(),
                port: config.port,
            },
            state: Arc::new(RwLock::new(SupervisorState::Stopped)),
            lifecycle_lock: Mutex::new(()),
            child: Arc::new(Mutex::new(None)),
            output: Arc::new(OutputRingBuffer::new(OUTPUT_RING_CAPACITY)),
        }))
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.read().await
    }

    pub fn port(&self) -> u16 {
        self.spec.port
    }

    /// Base URL of the supervised server. Only meaningful while
    /// `available()` reports true.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.spec.port)
    }

    /// True iff a child handle exists and the process has not exited.
    pub async fn available(&self) -> bool {
        let mut child_guard = self.child.lock().await;
        match child_guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Recent captured output lines, oldest first.
    pub fn output_snapshot(&self, last_n: usize) -> Vec<String> {
        self.output
            .snapshot(last_n)
            .into_iter()
            .map(|line| line.text)
            .collect()
    }

    /// Spawns the server binary and returns as soon as the child is running.
    /// Readiness is not probed; the first HTTP call observes the server once
    /// it is listening.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle_guard = self.lifecycle_lock.lock().await;

        if *self.state.read().await == SupervisorState::Running && self.available().await {
            tracing::debug!("server binary already running");
            return Ok(());
        }

        *self.state.write().await = SupervisorState::Starting;

        if let Err(e) = self.ensure_executable() {
            *self.state.write().await = SupervisorState::Failed;
            return Err(e);
        }
        if let Some(parent) = self.spec.credentials_file.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                *self.state.write().await = SupervisorState::Failed;
                return Err(e.into());
            }
        }

        tracing::info!(
            binary = %self.spec.binary.display(),
            port = self.spec.port,
            "starting anylist server binary"
        );

        let mut cmd = Command::new(&self.spec.binary);
        cmd.args([
            "--port",
            &self.spec.port.to_string(),
            "--email",
            &self.spec.email,
            "--password",
            &self.spec.password,
            "--credentials-file",
            &self.spec.credentials_file.to_string_lossy(),
            "--ip-filter",
            "127.0.0.1",
        ]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Orphan guard: if the supervisor is dropped without stop(), the
            // runtime still reaps the child.
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                *self.state.write().await = SupervisorState::Failed;
                return Err(AnylistError::Supervisor(format!(
                    "failed to spawn server binary: {e}"
                )));
            }
        };

        // Always drain piped stdio; an undrained pipe can stall the child
        // once its buffers fill.
        if let Some(stdout) = child.stdout.take() {
            let output = self.output.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(target: "anylist.server", "{line}");
                    output.push(OutputStream::Stdout, line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let output = self.output.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(target: "anylist.server", "{line}");
                    output.push(OutputStream::Stderr, line);
                }
            });
        }

        {
            let mut child_guard = self.child.lock().await;
            *child_guard = Some(child);
        }
        *self.state.write().await = SupervisorState::Running;

        tokio::spawn(watch_exit(
            Arc::clone(&self.child),
            Arc::clone(&self.state),
            Arc::clone(&self.output),
        ));

        tracing::info!(port = self.spec.port, "anylist server binary started");
        Ok(())
    }

    /// Requests graceful termination of the child, if any. Idempotent and
    /// non-blocking: the exit watcher records the final state once the
    /// process is gone.
    pub async fn stop(&self) {
        let _lifecycle_guard = self.lifecycle_lock.lock().await;

        let mut child_guard = self.child.lock().await;
        let Some(child) = child_guard.as_mut() else {
            return;
        };

        *self.state.write().await = SupervisorState::Stopping;

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            tracing::info!(pid, "sending SIGTERM to anylist server binary");
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            return;
        }

        if let Err(e) = child.start_kill() {
            tracing::warn!("failed to signal server binary: {e}");
        }
    }

    /// Verifies the binary exists and is runnable, repairing the executable
    /// bit when possible.
    fn ensure_executable(&self) -> Result<()> {
        let path = &self.spec.binary;
        let display = path.display().to_string();

        let metadata = std::fs::metadata(path)
            .map_err(|_| AnylistError::BinaryNotFound(display.clone()))?;
        if !metadata.is_file() {
            return Err(AnylistError::BinaryNotFound(display));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mut permissions = metadata.permissions();
            if permissions.mode() & 0o111 == 0 {
                tracing::debug!("fixing server binary permissions");
                permissions.set_mode(permissions.mode() | 0o755);
                std::fs::set_permissions(path, permissions)
                    .map_err(|_| AnylistError::BinaryPermission(display.clone()))?;

                let repaired = std::fs::metadata(path)
                    .map_err(|_| AnylistError::BinaryNotFound(display.clone()))?;
                if repaired.permissions().mode() & 0o111 == 0 {
                    return Err(AnylistError::BinaryPermission(display));
                }
            }
        }

        Ok(())
    }
}

/// Polls the child until it exits, then records the outcome. A non-zero
/// exit that wasn't requested via `stop()` is logged together with the tail
/// of the captured output.
async fn watch_exit(
    child: Arc<Mutex<Option<Child>>>,
    state: Arc<RwLock<SupervisorState>>,
    output: Arc<OutputRingBuffer>,
) {
    loop {
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;

        let status = {
            let mut child_guard = child.lock().await;
            let Some(running) = child_guard.as_mut() else {
                return;
            };
            match running.try_wait() {
                Ok(Some(status)) => {
                    child_guard.take();
                    status
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("failed to query server binary status: {e}");
                    continue;
                }
            }
        };

        let stopping = *state.read().await == SupervisorState::Stopping;
        if stopping || status.success() {
            *state.write().await = SupervisorState::Stopped;
            tracing::info!("anylist server binary stopped");
        } else {
            *state.write().await = SupervisorState::Failed;
            let tail = output.tail(20);
            if tail.is_empty() {
                tracing::error!("server binary exited unexpectedly with status {status}");
            } else {
                tracing::error!(
                    "server binary exited unexpectedly with status {status}\nrecent output:\n{tail}"
                );
            }
        }
        return;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_config(dir: &tempfile::TempDir, script: &str) -> (BridgeConfig, PathBuf) {
        let binary = dir.path().join("fake-server.sh");
        let mut file = std::fs::File::create(&binary).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{script}").unwrap();
        drop(file);

        let config = BridgeConfig {
            server_binary: Some(binary.clone()),
            email: Some("user@example.com".into()),
            password: Some("hunter2".into()),
            credentials_file: dir.path().join("credentials"),
            ..Default::default()
        };
        (config, binary)
    }

    #[tokio::test]
    async fn start_repairs_permissions_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        // Written without the executable bit to exercise the repair path.
        let (config, _binary) = test_config(&dir, "echo server-is-up\nsleep 30");
        let supervisor = ServerSupervisor::from_config(&config).unwrap();

        supervisor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(supervisor.available().await);
        assert_eq!(supervisor.state().await, SupervisorState::Running);
        assert!(supervisor
            .output_snapshot(10)
            .iter()
            .any(|line| line.contains("server-is-up")));

        supervisor.stop().await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!supervisor.available().await);
        assert_eq!(supervisor.state().await, SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn nonzero_exit_flips_to_failed_and_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _binary) = test_config(&dir, "echo boom >&2\nexit 3");
        let supervisor = ServerSupervisor::from_config(&config).unwrap();

        supervisor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert!(!supervisor.available().await);
        assert_eq!(supervisor.state().await, SupervisorState::Failed);
        // The stderr pipe was drained before the exit was observed.
        assert!(supervisor
            .output_snapshot(10)
            .iter()
            .any(|line| line.contains("boom")));
    }

    #[tokio::test]
    async fn missing_binary_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            server_binary: Some(dir.path().join("does-not-exist")),
            email: Some("user@example.com".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let supervisor = ServerSupervisor::from_config(&config).unwrap();

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, AnylistError::BinaryNotFound(_)));
        assert!(!supervisor.available().await);
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _binary) = test_config(&dir, "sleep 30");
        let supervisor = ServerSupervisor::from_config(&config).unwrap();

        // No child yet: both calls are no-ops.
        supervisor.stop().await;
        supervisor.stop().await;
        assert_eq!(supervisor.state().await, SupervisorState::Stopped);
    }

    #[test]
    fn base_url_uses_configured_port() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, _binary) = test_config(&dir, "sleep 1");
        config.port = 9123;
        let supervisor = ServerSupervisor::from_config(&config).unwrap();
        assert_eq!(supervisor.base_url(), "http://127.0.0.1:9123");
    }
}
