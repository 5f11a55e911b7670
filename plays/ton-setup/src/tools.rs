//! Command lines of the external TON binaries.
//!
//! Each binary gets a small builder so argument order lives in one place and
//! can be checked without spawning anything. [`ToolCommand::run`] executes a
//! built command with a deadline; [`ToolCommand::spawn`] starts one that keeps
//! running.

use std::{
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::process::{Child, Command};

use crate::{
    descriptor::InstanceDescriptor,
    error::{Result, SetupError},
};

/// Verbosity the engine runs with while creating its database.
pub const INIT_VERBOSITY: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn flag(self, name: &str, value: impl fmt::Display) -> Self {
        self.arg(name).arg(value.to_string())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// File name of the program, used to label errors and log lines.
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Space separated command line, unquoted, as it appears in a unit file.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(OsString::from));
        cmd
    }

    /// Run to completion. Spawn failures, a non-zero exit and running past
    /// `timeout` are all errors; a timed out process is killed.
    pub async fn run(&self, timeout: Duration) -> Result<ToolOutput> {
        let name = self.name();
        tracing::debug!("exec: {}", self.command_line());

        let child = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SetupError::tool(&name, format!("cannot execute: {e}"), ""))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| SetupError::Timeout {
                tool: name.clone(),
                after: timeout,
            })?
            .map_err(|e| SetupError::tool(&name, format!("wait failed: {e}"), ""))?;

        let out = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !out.status.success() {
            let detail = if out.stderr.trim().is_empty() {
                out.stdout.clone()
            } else {
                out.stderr.clone()
            };
            return Err(SetupError::tool(name, format!("exited with {}", out.status), detail));
        }
        Ok(out)
    }

    /// Start without waiting. Output is discarded; the caller owns stopping it.
    pub fn spawn(&self) -> Result<Child> {
        tracing::debug!("spawn: {}", self.command_line());
        self.command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SetupError::tool(self.name(), format!("cannot execute: {e}"), ""))
    }
}

// ── validator-engine / dht-server ──

/// Builder for the engine command line. Shared flags come first, mode
/// specific ones are appended by the caller, [`EngineCommand::finish`] closes
/// with logging and daemon flags.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    cmd: ToolCommand,
}

impl EngineCommand {
    /// One shot database initialization.
    pub fn init(desc: &InstanceDescriptor) -> ToolCommand {
        ToolCommand::new(&desc.binaries.process)
            .flag("--global-config", desc.configs.global.display())
            .flag("--db", desc.paths.db.display())
            .flag("--ip", desc.public_endpoint())
            .flag("--logname", desc.paths.init_log.join("init").display())
            .flag("--verbosity", INIT_VERBOSITY)
    }

    pub fn service(desc: &InstanceDescriptor) -> Self {
        let mut cmd = ToolCommand::new(&desc.binaries.process)
            .flag("--db", desc.paths.db.display())
            .flag("--global-config", desc.configs.global.display())
            .flag("--verbosity", desc.launch.verbosity);
        if desc.launch.threads > 0 {
            cmd = cmd.flag("--threads", desc.launch.threads);
        }
        Self { cmd }
    }

    pub fn flag(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.cmd = self.cmd.flag(name, value);
        self
    }

    /// `--logname` is left out when output goes through cronolog instead.
    pub fn finish(self, desc: &InstanceDescriptor, daemonize: bool) -> ToolCommand {
        let mut cmd = self.cmd;
        if !desc.launch.use_cronolog {
            cmd = cmd.flag("--logname", desc.paths.log.join("node").display());
        }
        if daemonize {
            cmd = cmd.arg("--daemonize");
        }
        cmd
    }
}

// ── generate-random-id ──

pub struct KeygenCommand;

impl KeygenCommand {
    /// Writes `<basename>` and `<basename>.pub`, prints `<short id> <hash>`.
    pub fn keys(binary: &Path, basename: &Path) -> ToolCommand {
        ToolCommand::new(binary)
            .flag("--mode", "keys")
            .flag("--name", basename.display())
    }

    /// Signs `record` with the private key at `keyring_entry`, prints JSON.
    pub fn sign_dht(binary: &Path, keyring_entry: &Path, record: &str) -> ToolCommand {
        ToolCommand::new(binary)
            .flag("-m", "dht")
            .flag("-k", keyring_entry.display())
            .flag("-a", record)
    }
}

// ── validator-engine-console ──

pub struct ConsoleCommand;

impl ConsoleCommand {
    pub fn exec(
        binary: &Path,
        address: &str,
        port: u16,
        client_key: &Path,
        server_pub: &Path,
        cmd: &str,
    ) -> ToolCommand {
        ToolCommand::new(binary)
            .flag("--address", format!("{address}:{port}"))
            .flag("--key", client_key.display())
            .flag("--pub", server_pub.display())
            .flag("--verbosity", 0)
            .flag("--cmd", cmd)
    }
}
