//! Command line surface.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::descriptor::Mode;

#[derive(Debug, Clone, Parser)]
#[command(name = "ton-setup", version, about = "Configure TON full node or dht server")]
pub struct Args {
    /// Instance kind: node or dht.
    #[arg(short = 'm', long, env = "TON_SETUP_MODE", value_parser = parse_mode)]
    pub mode: Mode,

    /// Instance name, used for service naming.
    #[arg(short = 'I', long, env = "TON_SETUP_INSTANCE_NAME")]
    pub instance_name: String,

    /// TON distribution home (the cmake install prefix).
    #[arg(short = 'd', long, env = "TON_SETUP_DIST_HOME", value_name = "DIR")]
    pub dist_home: PathBuf,

    /// URL or local path of the network global config.
    #[arg(short = 'g', long, env = "TON_SETUP_GLOBAL_CONFIG")]
    pub global_config: String,

    /// Home of the node / server.
    #[arg(short = 'H', long, env = "TON_SETUP_HOME", value_name = "DIR")]
    pub home: PathBuf,

    /// Configs and console keys [default: <home>/etc].
    #[arg(long, env = "TON_SETUP_ETC_PATH", value_name = "DIR")]
    pub etc_path: Option<PathBuf>,

    /// Service database [default: <home>/db].
    #[arg(long, env = "TON_SETUP_DB_PATH", value_name = "DIR")]
    pub db_path: Option<PathBuf>,

    /// Logs [default: <home>/logs].
    #[arg(long, env = "TON_SETUP_LOG_PATH", value_name = "DIR")]
    pub log_path: Option<PathBuf>,

    /// Configuration backups [default: <home>/backups].
    #[arg(long, env = "TON_SETUP_BACKUP_PATH", value_name = "DIR")]
    pub backup_path: Option<PathBuf>,

    /// URL of a lzip compressed tar dump of the node database.
    #[arg(long = "restore-dump", env = "TON_SETUP_RESTORE_DUMP", value_name = "URL")]
    pub dump_url: Option<String>,

    /// Public IPv4 address or hostname; detected via checkip.amazonaws.com
    /// when omitted.
    #[arg(long, env = "TON_SETUP_ADDRESS")]
    pub address: Option<String>,

    /// Main UDP port of the node / dht server.
    #[arg(long, env = "TON_SETUP_SERVICE_PORT")]
    pub service_port: Option<u16>,

    /// Liteserver port (node only).
    #[arg(long = "ls-port", env = "TON_SETUP_LS_PORT")]
    pub ls_port: Option<u16>,

    /// Console port (node only).
    #[arg(long, env = "TON_SETUP_CONSOLE_PORT")]
    pub console_port: Option<u16>,

    /// Seconds of history a new node syncs.
    #[arg(long, env = "TON_SETUP_SYNC_BEFORE", default_value_t = 604800)]
    pub sync_before: u64,

    /// Owner of installed files [default: current user].
    #[arg(long, env = "TON_SETUP_INSTALL_USER")]
    pub install_user: Option<String>,

    /// User the service runs as [default: current user].
    #[arg(long, env = "TON_SETUP_SERVICE_USER")]
    pub service_user: Option<String>,

    #[arg(long, env = "TON_SETUP_STATE_TTL", default_value_t = 604800)]
    pub state_ttl: u64,

    #[arg(long, env = "TON_SETUP_ARCHIVE_TTL", default_value_t = 86400)]
    pub archive_ttl: u64,

    /// Verbosity of the running service.
    #[arg(long, env = "TON_SETUP_SERVICE_VERBOSITY", default_value_t = 1)]
    pub service_verbosity: u8,

    /// Threads of the running service [default: cores - 1].
    #[arg(long, env = "TON_SETUP_SERVICE_THREADS")]
    pub service_threads: Option<u32>,

    /// Pipe service output through cronolog.
    #[arg(long, env = "TON_SETUP_USE_CRONOLOG")]
    pub use_cronolog: bool,

    /// Cronolog binary [default: cronolog from PATH].
    #[arg(long, env = "TON_SETUP_CRONOLOG_BIN", value_name = "FILE")]
    pub cronolog_bin: Option<PathBuf>,

    /// Cronolog file name template, relative to the log path.
    #[arg(long, env = "TON_SETUP_CRONOLOG_TEMPLATE", default_value = "%Y-%m-%d.log")]
    pub cronolog_template: String,

    /// Destroy and overwrite an existing configuration and database.
    #[arg(long)]
    pub force: bool,

    /// Copy the unit into the systemd unit directory and reload systemd.
    #[arg(long)]
    pub install_systemd_service: bool,

    /// Enable and start the installed unit.
    #[arg(long)]
    pub start_systemd_service: bool,

    /// Seconds to keep probing the console after starting the node.
    #[arg(long, env = "TON_SETUP_VERIFY_TIMEOUT", default_value_t = 15)]
    pub verify_timeout: u64,

    /// Verbosity of this tool: 0 none, 1 errors, 2 info, 3 debug.
    #[arg(short = 'v', long, env = "TON_SETUP_VERBOSITY", default_value_t = 3)]
    pub verbosity: u8,
}

fn parse_mode(raw: &str) -> Result<Mode, String> {
    raw.parse::<Mode>().map_err(|e| e.to_string())
}

/// Log level selection, built once from the arguments and handed to the
/// subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub verbosity: u8,
}

impl LogConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            verbosity: args.verbosity,
        }
    }

    pub fn directive(&self) -> &'static str {
        match self.verbosity {
            0 => "off",
            1 => "error",
            2 => "info",
            _ => "debug",
        }
    }

    /// `RUST_LOG` takes precedence over the numeric verbosity.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }

    pub fn init(&self) {
        tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_target(false)
            .init();
    }
}
