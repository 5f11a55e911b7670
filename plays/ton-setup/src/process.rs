//! Runs the engine: once to create its database, once more to prove the
//! provisioned instance answers on its console.

use std::time::Instant;

use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use tokio::process::Child;

use crate::{
    config::ProcessSettings,
    descriptor::InstanceDescriptor,
    error::{Result, SetupError},
    tools::{EngineCommand, ToolCommand},
};

/// What the console prints when the engine answered `gettime`.
pub const READY_MARKER: &str = "received validator time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Initializing,
    Starting,
    Verifying,
    Stopping,
}

pub struct LifecycleController<'a> {
    settings: &'a ProcessSettings,
    state: ProcessState,
    child: Option<Child>,
    started_at: Option<Instant>,
}

impl<'a> LifecycleController<'a> {
    pub fn new(settings: &'a ProcessSettings) -> Self {
        Self {
            settings,
            state: ProcessState::Stopped,
            child: None,
            started_at: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    fn expect_state(&self, expected: ProcessState, action: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SetupError::Validation(format!(
                "cannot {action} while the process is {:?}",
                self.state
            )))
        }
    }

    /// Let the engine create its database, keyring and `config.json`.
    pub async fn init_database(&mut self, desc: &InstanceDescriptor) -> Result<()> {
        self.expect_state(ProcessState::Stopped, "initialize")?;
        tracing::info!("Initializing {} database", desc.binaries.process.display());
        self.state = ProcessState::Initializing;
        let result = EngineCommand::init(desc).run(self.settings.init_timeout).await;
        self.state = ProcessState::Stopped;
        result.map(|_| ())
    }

    /// Spawn the long-running process.
    pub fn start(&mut self, launch: &ToolCommand) -> Result<()> {
        self.expect_state(ProcessState::Stopped, "start")?;
        tracing::info!("Starting {}", launch.name());
        self.state = ProcessState::Starting;
        match launch.spawn() {
            Ok(child) => {
                self.child = Some(child);
                self.started_at = Some(Instant::now());
                Ok(())
            }
            Err(e) => {
                self.state = ProcessState::Stopped;
                Err(e)
            }
        }
    }

    /// Probe with `probe` until its stdout carries [`READY_MARKER`] or the
    /// readiness window closes. A probe that fails, times out or answers
    /// without the marker is simply retried.
    pub async fn verify(&mut self, probe: &ToolCommand) -> Result<()> {
        self.expect_state(ProcessState::Starting, "verify")?;
        self.state = ProcessState::Verifying;
        let started = self.started_at.unwrap_or_else(Instant::now);

        tokio::time::sleep(self.settings.verify_initial_delay).await;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tracing::debug!("Checking node function, attempt {}", attempt);

            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(SetupError::Verification(format!(
                        "process exited with {status} before answering"
                    )));
                }
            }

            match probe.run(self.settings.console_timeout).await {
                Ok(out) if out.stdout.contains(READY_MARKER) => {
                    tracing::info!("Node answered after {} attempt(s)", attempt);
                    return Ok(());
                }
                Ok(_) => tracing::debug!("console answered without validator time"),
                Err(e) => tracing::debug!("console probe failed: {}", e),
            }

            if started.elapsed() >= self.settings.verify_deadline {
                return Err(SetupError::Verification(format!(
                    "no validator time after {attempt} attempt(s) in {:?}",
                    self.settings.verify_deadline
                )));
            }
            tokio::time::sleep(self.settings.verify_interval).await;
        }
    }

    /// Ask the process to exit with SIGTERM. Does not wait for it.
    pub fn stop(&mut self) -> Result<()> {
        let Some(child) = self.child.take() else {
            self.state = ProcessState::Stopped;
            return Ok(());
        };
        tracing::info!("Stopping node");
        self.state = ProcessState::Stopping;
        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!("SIGTERM to {} failed: {}", pid, e);
            }
        }
        self.started_at = None;
        self.state = ProcessState::Stopped;
        Ok(())
    }
}
