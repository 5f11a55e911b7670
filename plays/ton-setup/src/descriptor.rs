//! The resolved description of one instance.
//!
//! An [`InstanceDescriptor`] is produced once by
//! [`DescriptorBuilder`](crate::config::DescriptorBuilder) and is not changed
//! afterwards. Generated identities live in [`KeySet`] and are only joined with
//! the descriptor when the instance dump is written.

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::SetupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Node,
    Dht,
}

impl Mode {
    /// File name of the long-running process under `<dist>/bin`.
    pub fn process_binary(self) -> &'static str {
        match self {
            Mode::Node => "validator-engine",
            Mode::Dht => "dht-server",
        }
    }

    /// Key of the local config array this instance publishes itself under.
    pub fn snippet_key(self) -> &'static str {
        match self {
            Mode::Node => "liteservers",
            Mode::Dht => "dht",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Node => f.write_str("node"),
            Mode::Dht => f.write_str("dht"),
        }
    }
}

impl FromStr for Mode {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(Mode::Node),
            "dht" => Ok(Mode::Dht),
            other => Err(SetupError::Validation(format!("Unknown mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub address: std::net::Ipv4Addr,
    pub service_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ls_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paths {
    pub dist: PathBuf,
    pub home: PathBuf,
    pub etc: PathBuf,
    pub db: PathBuf,
    pub log: PathBuf,
    pub init_log: PathBuf,
    pub backup: PathBuf,
}

impl Paths {
    pub fn keys_dir(&self) -> PathBuf {
        self.etc.join("keys")
    }

    pub fn keyring_dir(&self) -> PathBuf {
        self.db.join("keyring")
    }

    pub fn initial_backup_dir(&self) -> PathBuf {
        self.backup.join("initial")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configs {
    pub global: PathBuf,
    pub local: PathBuf,
    pub snip: PathBuf,
    pub instance: PathBuf,
    pub node: PathBuf,
}

impl Configs {
    pub fn for_paths(paths: &Paths) -> Self {
        Self {
            global: paths.etc.join("global.config.json"),
            local: paths.etc.join("local.config.json"),
            snip: paths.etc.join("snip.config.json"),
            instance: paths.etc.join("instance.config.json"),
            node: paths.db.join("config.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binaries {
    pub process: PathBuf,
    pub validator_engine_console: PathBuf,
    pub generate_random_id: PathBuf,
    pub sed: Option<PathBuf>,
    pub cronolog: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user: String,
    pub uid: u32,
    pub group: String,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Users {
    pub install: Account,
    pub service: Account,
}

/// Knobs for the launched process and the generated unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParams {
    pub verbosity: u8,
    pub threads: u32,
    pub state_ttl: u64,
    pub archive_ttl: u64,
    pub sync_before: u64,
    pub use_cronolog: bool,
    pub cronolog_template: String,
}

/// Operator choices that do not change the instance layout but are kept in
/// the dump for later inspection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetupParams {
    pub global_config_source: String,
    pub restore_dump: Option<String>,
    pub force: bool,
    pub install_systemd_service: bool,
    pub start_systemd_service: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub name: String,
    pub mode: Mode,
    pub network: Network,
    pub paths: Paths,
    pub configs: Configs,
    pub binaries: Binaries,
    pub users: Users,
    pub launch: LaunchParams,
    pub setup_params: SetupParams,
}

impl InstanceDescriptor {
    /// The `--ip` value handed to the engine during database initialization.
    pub fn public_endpoint(&self) -> String {
        format!("{}:{}", self.network.address, self.network.service_port)
    }
}

/// Identity triple printed and written by `generate-random-id --mode keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Hex id; also the file name of the private key inside the keyring.
    pub short_id: String,
    pub public_id_hash: String,
    pub public_key_base64: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    Server,
    Client,
    Liteserver,
}

impl KeyRole {
    pub const ALL: [KeyRole; 3] = [KeyRole::Server, KeyRole::Client, KeyRole::Liteserver];

    pub fn basename(self) -> &'static str {
        match self {
            KeyRole::Server => "server",
            KeyRole::Client => "client",
            KeyRole::Liteserver => "liteserver",
        }
    }
}

/// Console identities of a node instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    pub server: KeyMaterial,
    pub client: KeyMaterial,
    pub liteserver: KeyMaterial,
}

impl KeySet {
    pub fn get(&self, role: KeyRole) -> &KeyMaterial {
        match role {
            KeyRole::Server => &self.server,
            KeyRole::Client => &self.client,
            KeyRole::Liteserver => &self.liteserver,
        }
    }

    pub fn to_map(&self) -> BTreeMap<KeyRole, KeyMaterial> {
        KeyRole::ALL
            .iter()
            .map(|role| (*role, self.get(*role).clone()))
            .collect()
    }
}

/// Everything persisted as `instance.config.json`.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceRecord<'a> {
    #[serde(flatten)]
    pub descriptor: &'a InstanceDescriptor,
    pub keys: BTreeMap<KeyRole, KeyMaterial>,
}
