//! Process Supervisor
//!
//! Owns the external inference server process for the server backend:
//! spawn, health polling, and process-tree teardown on every exit path.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use url::Url;

use crate::http_client::build_http_client;
use crate::types::{LlmError, LlmResult};

/// How to launch and probe the server.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub binary: PathBuf,
    pub models_dir: PathBuf,
    pub preset_file: PathBuf,
    pub models_max: u32,
    pub port: u16,
    pub health_interval: Duration,
    pub health_timeout: Duration,
}

/// Lifecycle of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Healthy,
    Stopped,
}

/// Handle to the running server process.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    client: reqwest::Client,
    child: Option<Child>,
    state: SupervisorState,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> LlmResult<Self> {
        Ok(Self {
            config,
            client: build_http_client(Some(Duration::from_secs(1)))?,
            child: None,
            state: SupervisorState::NotStarted,
        })
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Full command line, binary first.
    pub fn command_line(&self) -> Vec<String> {
        vec![
            self.config.binary.display().to_string(),
            "--models-dir".to_string(),
            self.config.models_dir.display().to_string(),
            "--models-preset".to_string(),
            self.config.preset_file.display().to_string(),
            "--no-models-autoload".to_string(),
            "--models-max".to_string(),
            self.config.models_max.to_string(),
            "--port".to_string(),
            self.config.port.to_string(),
        ]
    }

    /// Spawn the server and wait for it to report healthy.
    ///
    /// Does nothing when already running. A health timeout kills the child
    /// and returns a load failure.
    pub async fn start(&mut self) -> LlmResult<()> {
        if matches!(self.state, SupervisorState::Starting | SupervisorState::Healthy) {
            return Ok(());
        }

        let args = self.command_line();
        tracing::info!("ProcessSupervisor: starting {}", args.join(" "));
        self.state = SupervisorState::Starting;

        let mut command = Command::new(&args[0]);
        command
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            self.state = SupervisorState::Stopped;
            self.startup_error(format!("failed to spawn: {}", e))
        })?;
        self.child = Some(child);

        let health_url = self.health_url()?;
        match wait_until_healthy(
            &self.client,
            &health_url,
            self.config.health_interval,
            self.config.health_timeout,
        )
        .await
        {
            Ok(()) => {
                tracing::info!("ProcessSupervisor: server healthy on port {}", self.config.port);
                self.state = SupervisorState::Healthy;
                Ok(())
            }
            Err(e) => {
                tracing::error!("ProcessSupervisor: server did not become healthy: {}", e);
                self.shutdown().await;
                Err(self.startup_error(e.to_string()))
            }
        }
    }

    /// Kill the process tree. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            if self.state != SupervisorState::NotStarted {
                self.state = SupervisorState::Stopped;
            }
            return;
        };

        tracing::info!("ProcessSupervisor: shutting down server");
        if let Some(pid) = child.id() {
            kill_tree(pid);
        }
        if let Err(e) = child.kill().await {
            tracing::debug!("ProcessSupervisor: direct kill after tree kill: {}", e);
        }
        self.state = SupervisorState::Stopped;
    }

    pub fn base_url(&self) -> LlmResult<Url> {
        Url::parse(&format!("http://127.0.0.1:{}", self.config.port)).map_err(|e| {
            LlmError::InvalidRequest {
                message: format!("invalid server url: {}", e),
            }
        })
    }

    fn health_url(&self) -> LlmResult<Url> {
        self.base_url()?
            .join("/health")
            .map_err(|e| LlmError::InvalidRequest {
                message: format!("invalid health url: {}", e),
            })
    }

    fn startup_error(&self, message: String) -> LlmError {
        LlmError::LoadFailed {
            model: self.config.binary.display().to_string(),
            message,
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                kill_tree(pid);
            }
            let _ = child.start_kill();
        }
    }
}

/// Poll `url` every `interval` until it answers 200 or `timeout` elapses.
pub async fn wait_until_healthy(
    client: &reqwest::Client,
    url: &Url,
    interval: Duration,
    timeout: Duration,
) -> LlmResult<()> {
    let poll = async {
        loop {
            match client.get(url.clone()).send().await {
                Ok(response) if response.status().as_u16() == 200 => return,
                Ok(response) => {
                    tracing::debug!("ProcessSupervisor: health status {}", response.status());
                }
                Err(e) => tracing::debug!("ProcessSupervisor: health probe failed: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| LlmError::Timeout {
            message: format!("{} not healthy within {}ms", url, timeout.as_millis()),
        })
}

/// Kill `pid` and all of its descendants. Best effort.
#[cfg(windows)]
fn kill_tree(pid: u32) {
    let result = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        tracing::warn!("ProcessSupervisor: taskkill failed for {}: {}", pid, e);
    }
}

/// Kill `pid` and all of its descendants. Best effort.
///
/// The child leads its own process group, so signalling the negated pid
/// reaches every process it spawned.
#[cfg(unix)]
fn kill_tree(pid: u32) {
    let result = std::process::Command::new("kill")
        .args(["-KILL", &format!("-{}", pid)])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        tracing::warn!("ProcessSupervisor: group kill failed for {}: {}", pid, e);
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(_pid: u32) {}
