//! Node and DHT server differ in which keys they need, what they publish and
//! how they are launched. Each difference is a method of [`ModeStrategy`];
//! the strategy is picked once from [`Mode`].

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    config::ProcessSettings,
    descriptor::{InstanceDescriptor, KeyRole, KeySet, Mode},
    error::{IoContext, Result, SetupError},
    keys::{self, pub_file, KeyProvisioner},
    process::LifecycleController,
    synth,
    tools::{ConsoleCommand, EngineCommand, KeygenCommand, ToolCommand},
};

/// Address the console dials during verification.
pub const CONSOLE_HOST: &str = "127.0.0.1";

#[async_trait]
pub trait ModeStrategy: Send + Sync {
    /// Console identities, if this mode has any.
    async fn provision_keys(
        &self,
        desc: &InstanceDescriptor,
        settings: &ProcessSettings,
    ) -> Result<Option<KeySet>>;

    /// Amend the engine config where needed and return the snippet this
    /// instance publishes in its local config.
    async fn synthesize_config(
        &self,
        desc: &InstanceDescriptor,
        keys: Option<&KeySet>,
        settings: &ProcessSettings,
    ) -> Result<Value>;

    /// Engine arguments specific to this mode, appended after the shared ones.
    fn extend_launch(&self, desc: &InstanceDescriptor, cmd: EngineCommand, first_run: bool)
        -> EngineCommand;

    /// Start, probe and stop the provisioned instance.
    async fn verify(
        &self,
        desc: &InstanceDescriptor,
        settings: &ProcessSettings,
    ) -> Result<()>;

    /// Full engine command line.
    fn launch_command(
        &self,
        desc: &InstanceDescriptor,
        first_run: bool,
        daemonize: bool,
    ) -> ToolCommand {
        self.extend_launch(desc, EngineCommand::service(desc), first_run)
            .finish(desc, daemonize)
    }
}

pub fn strategy_for(mode: Mode) -> Box<dyn ModeStrategy> {
    match mode {
        Mode::Node => Box::new(NodeStrategy),
        Mode::Dht => Box::new(DhtStrategy),
    }
}

/// Write the snippet and the local config derived from the global one.
pub async fn publish_snippet(desc: &InstanceDescriptor, snippet: Value) -> Result<()> {
    tracing::info!("Writing local snippet {}", desc.configs.snip.display());
    synth::write_document(&desc.configs.snip, &snippet).await?;

    tracing::info!("Creating local config {}", desc.configs.local.display());
    let global = synth::read_document(&desc.configs.global).await?;
    let local = synth::local_config(global, desc.mode, snippet);
    synth::write_document(&desc.configs.local, &local).await
}

// ── Full node ──

pub struct NodeStrategy;

impl NodeStrategy {
    fn ports(desc: &InstanceDescriptor) -> Result<(u16, u16)> {
        match (desc.network.ls_port, desc.network.console_port) {
            (Some(ls), Some(console)) => Ok((ls, console)),
            _ => Err(SetupError::Validation(
                "node instance without liteserver or console port".into(),
            )),
        }
    }

    pub fn console_probe(desc: &InstanceDescriptor) -> Result<ToolCommand> {
        let (_, console_port) = Self::ports(desc)?;
        let keys_dir = desc.paths.keys_dir();
        Ok(ConsoleCommand::exec(
            &desc.binaries.validator_engine_console,
            CONSOLE_HOST,
            console_port,
            &keys_dir.join(KeyRole::Client.basename()),
            &pub_file(&keys_dir.join(KeyRole::Server.basename())),
            "gettime",
        ))
    }
}

#[async_trait]
impl ModeStrategy for NodeStrategy {
    async fn provision_keys(
        &self,
        desc: &InstanceDescriptor,
        settings: &ProcessSettings,
    ) -> Result<Option<KeySet>> {
        let provisioner =
            KeyProvisioner::new(&desc.binaries.generate_random_id, settings.keygen_timeout);
        let keys = provisioner.generate_console_keys(&desc.paths).await?;
        keys::install_into_keyring(&desc.paths, &keys).await?;
        Ok(Some(keys))
    }

    async fn synthesize_config(
        &self,
        desc: &InstanceDescriptor,
        keys: Option<&KeySet>,
        _settings: &ProcessSettings,
    ) -> Result<Value> {
        let keys = keys.ok_or_else(|| {
            SetupError::Validation("node config needs console keys".into())
        })?;
        let (ls_port, console_port) = Self::ports(desc)?;

        tracing::info!("Binding liteserver and console in {}", desc.configs.node.display());
        let mut node = synth::read_document(&desc.configs.node).await?;
        synth::bind_node_endpoints(&mut node, keys, ls_port, console_port);
        synth::write_document(&desc.configs.node, &node).await?;

        Ok(synth::node_snippet(desc.network.address, ls_port, keys))
    }

    fn extend_launch(
        &self,
        desc: &InstanceDescriptor,
        mut cmd: EngineCommand,
        first_run: bool,
    ) -> EngineCommand {
        let launch = &desc.launch;
        cmd = cmd.flag(
            "--session-logs",
            desc.paths.log.join("session-logs.log").display(),
        );
        if launch.state_ttl > 0 {
            cmd = cmd.flag("--state-ttl", launch.state_ttl);
        }
        if launch.archive_ttl > 0 {
            cmd = cmd.flag("--archive-ttl", launch.archive_ttl);
        }
        if launch.sync_before > 0 && first_run {
            cmd = cmd.flag("--sync-before", launch.sync_before);
        }
        cmd
    }

    async fn verify(&self, desc: &InstanceDescriptor, settings: &ProcessSettings) -> Result<()> {
        let probe = Self::console_probe(desc)?;
        let mut controller = LifecycleController::new(settings);
        controller.start(&self.launch_command(desc, true, false))?;
        let verified = controller.verify(&probe).await;
        controller.stop()?;
        verified
    }
}

// ── DHT server ──

pub struct DhtStrategy;

impl DhtStrategy {
    /// Key the engine generated while creating its database: the first
    /// keyring entry in name order.
    pub async fn signing_key(desc: &InstanceDescriptor) -> Result<std::path::PathBuf> {
        let keyring = desc.paths.keyring_dir();
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&keyring)
            .await
            .with_path("read keyring", &keyring)?;
        while let Some(entry) = dir.next_entry().await.with_path("read keyring", &keyring)? {
            entries.push(entry.path());
        }
        entries.sort();
        entries.into_iter().next().ok_or_else(|| {
            SetupError::Validation(format!("keyring {} is empty", keyring.display()))
        })
    }
}

#[async_trait]
impl ModeStrategy for DhtStrategy {
    async fn provision_keys(
        &self,
        _desc: &InstanceDescriptor,
        _settings: &ProcessSettings,
    ) -> Result<Option<KeySet>> {
        Ok(None)
    }

    async fn synthesize_config(
        &self,
        desc: &InstanceDescriptor,
        _keys: Option<&KeySet>,
        settings: &ProcessSettings,
    ) -> Result<Value> {
        tracing::info!("Signing DHT record");
        let key = Self::signing_key(desc).await?;
        let record = synth::dht_address_list(desc.network.address, desc.network.service_port);
        let cmd = KeygenCommand::sign_dht(
            &desc.binaries.generate_random_id,
            &key,
            &record.to_string(),
        );
        let out = cmd.run(settings.keygen_timeout).await?;
        serde_json::from_str(&out.stdout).map_err(|e| {
            SetupError::tool(
                cmd.name(),
                format!("signed record is not JSON: {e}"),
                out.stdout.clone(),
            )
        })
    }

    fn extend_launch(
        &self,
        _desc: &InstanceDescriptor,
        cmd: EngineCommand,
        _first_run: bool,
    ) -> EngineCommand {
        cmd
    }

    async fn verify(&self, _desc: &InstanceDescriptor, _settings: &ProcessSettings) -> Result<()> {
        tracing::debug!("DHT server has no console, skipping verification");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::descriptor::{
        Account, Binaries, Configs, LaunchParams, Network, Paths, SetupParams, Users,
    };
    use std::{net::Ipv4Addr, path::PathBuf};

    pub(crate) fn descriptor(mode: Mode, use_cronolog: bool) -> InstanceDescriptor {
        let paths = Paths {
            dist: "/opt/ton".into(),
            home: "/srv/n1".into(),
            etc: "/srv/n1/etc".into(),
            db: "/srv/n1/db".into(),
            log: "/srv/n1/logs".into(),
            init_log: "/srv/n1/logs/init".into(),
            backup: "/srv/n1/backups".into(),
        };
        let account = Account {
            user: "ton".into(),
            uid: 1000,
            group: "ton".into(),
            gid: 1000,
        };
        InstanceDescriptor {
            name: "n1".into(),
            mode,
            network: Network {
                address: Ipv4Addr::new(203, 0, 113, 7),
                service_port: 30303,
                ls_port: (mode == Mode::Node).then_some(30304),
                console_port: (mode == Mode::Node).then_some(30305),
            },
            configs: Configs::for_paths(&paths),
            binaries: Binaries {
                process: PathBuf::from("/opt/ton/bin").join(mode.process_binary()),
                validator_engine_console: "/opt/ton/bin/validator-engine-console".into(),
                generate_random_id: "/opt/ton/bin/generate-random-id".into(),
                sed: Some("/bin/sed".into()),
                cronolog: Some("/usr/bin/cronolog".into()),
            },
            paths,
            users: Users {
                install: account.clone(),
                service: account,
            },
            launch: LaunchParams {
                verbosity: 1,
                threads: 7,
                state_ttl: 604800,
                archive_ttl: 86400,
                sync_before: 604800,
                use_cronolog,
                cronolog_template: "%Y-%m-%d.log".into(),
            },
            setup_params: SetupParams::default(),
        }
    }

    #[test]
    fn node_launch_first_run() {
        let desc = descriptor(Mode::Node, false);
        let cmd = strategy_for(Mode::Node).launch_command(&desc, true, true);
        assert_eq!(
            cmd.command_line(),
            "/opt/ton/bin/validator-engine --db /srv/n1/db \
             --global-config /srv/n1/etc/global.config.json --verbosity 1 --threads 7 \
             --session-logs /srv/n1/logs/session-logs.log --state-ttl 604800 \
             --archive-ttl 86400 --sync-before 604800 --logname /srv/n1/logs/node --daemonize"
        );
    }

    #[test]
    fn node_restart_skips_sync_horizon_and_cronolog_drops_logname() {
        let mut desc = descriptor(Mode::Node, true);
        desc.launch.threads = 0;
        desc.launch.archive_ttl = 0;
        let cmd = strategy_for(Mode::Node).launch_command(&desc, false, false);
        let line = cmd.command_line();
        assert!(!line.contains("--sync-before"));
        assert!(!line.contains("--logname"));
        assert!(!line.contains("--threads"));
        assert!(!line.contains("--archive-ttl"));
        assert!(line.contains("--state-ttl 604800"));
    }

    #[test]
    fn dht_launch_has_no_node_flags() {
        let desc = descriptor(Mode::Dht, false);
        let cmd = strategy_for(Mode::Dht).launch_command(&desc, true, false);
        assert_eq!(
            cmd.command_line(),
            "/opt/ton/bin/dht-server --db /srv/n1/db \
             --global-config /srv/n1/etc/global.config.json --verbosity 1 --threads 7 \
             --logname /srv/n1/logs/node"
        );
    }

    #[test]
    fn console_probe_uses_client_key_and_server_pub() {
        let desc = descriptor(Mode::Node, false);
        let probe = NodeStrategy::console_probe(&desc).unwrap();
        assert_eq!(
            probe.args(),
            [
                "--address",
                "127.0.0.1:30305",
                "--key",
                "/srv/n1/etc/keys/client",
                "--pub",
                "/srv/n1/etc/keys/server.pub",
                "--verbosity",
                "0",
                "--cmd",
                "gettime"
            ]
        );
    }

    #[tokio::test]
    async fn dht_signing_key_is_first_entry_by_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut desc = descriptor(Mode::Dht, false);
        desc.paths.db = tmp.path().to_path_buf();
        let keyring = desc.paths.keyring_dir();
        std::fs::create_dir_all(&keyring).unwrap();
        for name in ["F00D", "0ABC", "BEEF"] {
            std::fs::write(keyring.join(name), b"k").unwrap();
        }
        assert_eq!(
            DhtStrategy::signing_key(&desc).await.unwrap(),
            keyring.join("0ABC")
        );
    }

    #[tokio::test]
    async fn dht_empty_keyring_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut desc = descriptor(Mode::Dht, false);
        desc.paths.db = tmp.path().to_path_buf();
        std::fs::create_dir_all(desc.paths.keyring_dir()).unwrap();
        assert!(DhtStrategy::signing_key(&desc).await.is_err());
    }
}
