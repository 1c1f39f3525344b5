// src/pool/process_backend.rs
//! Backend that runs runners as local child processes
//!
//! A spawned process is expected to start a runner server and announce it by
//! printing `RUNNER_READY <url>` on stdout. The child receives
//! `FLAME_MODE=runner` and a loopback bind address with an ephemeral port
//! unless the configured environment overrides them.

use crate::pool::backend::Backend;
use crate::pool::types::{RunnerHandle, SpawnOptions};
use crate::utils::errors::{FlameError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Line prefix a runner prints once it accepts invocations
pub const READY_PREFIX: &str = "RUNNER_READY ";

/// How runner processes are launched
#[derive(Debug, Clone)]
pub struct ProcessBackendConfig {
    /// Executable name (looked up in PATH) or path
    pub program: String,

    pub args: Vec<String>,

    /// Extra environment, applied after the defaults
    pub env: Vec<(String, String)>,

    /// Working directory
    pub work_dir: Option<PathBuf>,

    /// How long to wait for the ready line
    pub ready_timeout: Duration,

    /// Time between SIGTERM and SIGKILL
    pub grace_period: Duration,
}

impl Default for ProcessBackendConfig {
    fn default() -> Self {
        Self {
            program: "flame-runner".to_string(),
            args: vec![],
            env: vec![],
            work_dir: None,
            ready_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(2),
        }
    }
}

impl ProcessBackendConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// Spawns runners as child processes and tracks them by runner id
#[derive(Debug)]
pub struct ProcessBackend {
    config: ProcessBackendConfig,
    children: DashMap<String, Child>,
}

impl ProcessBackend {
    pub fn new(config: ProcessBackendConfig) -> Self {
        Self {
            config,
            children: DashMap::new(),
        }
    }

    /// Number of live children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn find_executable(&self) -> Result<PathBuf> {
        let program = &self.config.program;
        if program.contains(std::path::MAIN_SEPARATOR) {
            return Ok(PathBuf::from(program));
        }

        which::which(program).map_err(|e| {
            FlameError::config(format!("Executable '{}' not found in PATH: {}", program, e))
        })
    }

    fn command(&self, executable: PathBuf, options: &SpawnOptions) -> Command {
        let mut command = Command::new(executable);
        command
            .args(&self.config.args)
            .env("FLAME_MODE", "runner")
            .env("FLAME_SERVER__HOST", "127.0.0.1")
            .env("FLAME_SERVER__PORT", "0")
            .env("FLAME_POOL", &options.pool_name);

        for (key, value) in &self.config.env {
            command.env(key, value);
        }
        if let Some(work_dir) = &self.config.work_dir {
            command.current_dir(work_dir);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

/// Read stdout until the ready line, returning the announced URL
async fn wait_ready(reader: &mut tokio::io::Lines<BufReader<ChildStdout>>) -> Result<String> {
    loop {
        let line = reader
            .next_line()
            .await
            .map_err(|e| FlameError::invoke(format!("Failed to read runner output: {}", e)))?;

        match line {
            Some(line) => {
                if let Some(url) = line.trim().strip_prefix(READY_PREFIX) {
                    return Ok(url.trim().to_string());
                }
                debug!("runner: {}", line);
            }
            None => return Err(FlameError::invoke("Runner exited before becoming ready")),
        }
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    async fn spawn(&self, options: SpawnOptions) -> Result<RunnerHandle> {
        let executable = self.find_executable()?;
        debug!("Spawning runner for pool '{}': {:?}", options.pool_name, executable);

        let mut child = self
            .command(executable, &options)
            .spawn()
            .map_err(|e| FlameError::invoke(format!("Failed to spawn runner: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FlameError::invoke("Runner stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        let url = match tokio::time::timeout(self.config.ready_timeout, wait_ready(&mut lines)).await
        {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(e);
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(FlameError::timeout(format!(
                    "Runner not ready after {}ms",
                    self.config.ready_timeout.as_millis()
                )));
            }
        };

        // Keep draining stdout so the child never blocks on a full pipe
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("runner: {}", line);
            }
        });

        let id = ulid::Ulid::new().to_string();
        info!("Runner {} ready at {} (pid {:?})", id, url, child.id());
        self.children.insert(id.clone(), child);

        Ok(RunnerHandle::new(id, url))
    }

    async fn terminate(&self, runner: &RunnerHandle) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some((_, mut child)) = self.children.remove(&runner.id) else {
            debug!("Runner {} not tracked, nothing to terminate", runner.id);
            return Ok(());
        };

        let Some(pid) = child.id() else {
            // Already reaped
            return Ok(());
        };

        debug!("Sending SIGTERM to runner {} (pid {})", runner.id, pid);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to pid {}: {}", pid, e);
        }

        match tokio::time::timeout(self.config.grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Runner {} exited: {}", runner.id, status);
                Ok(())
            }
            _ => {
                debug!("Runner {} still alive, sending SIGKILL", runner.id);
                child.kill().await.map_err(|e| {
                    FlameError::invoke(format!("Failed to kill runner {}: {}", runner.id, e))
                })
            }
        }
    }

    async fn health_check(&self, runner: &RunnerHandle) -> Result<bool> {
        let Some(mut child) = self.children.get_mut(&runner.id) else {
            return Ok(false);
        };
        Ok(matches!(child.try_wait(), Ok(None)))
    }
}
