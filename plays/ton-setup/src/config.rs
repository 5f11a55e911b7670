//! Settings and resolution of the instance descriptor.
//!
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use nix::unistd::{getuid, Group, User};

use crate::{
    cli::Args,
    descriptor::{
        Account, Binaries, Configs, InstanceDescriptor, LaunchParams, Mode, Network, Paths,
        SetupParams, Users,
    },
    error::{Result, SetupError},
    net::{resolve_public_address, GlobalConfigSource},
    paths::trim_trailing_separators,
    ports::PortAllocator,
};

// ── .env file helpers ──

/// Load KEY=VALUE pairs from a .env file into the process environment.
/// Skips comments (#) and empty lines. Does not override env vars that are
/// already set. A missing file is not an error.
pub fn load_dotenv(env_path: &Path) {
    if let Ok(contents) = fs::read_to_string(env_path) {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

/// Resolve a value with priority: explicit > env var. Empty values count as
/// unset.
pub fn default_val_opt(explicit: Option<&str>, env_key: &str) -> Option<String> {
    explicit
        .filter(|v| !v.is_empty())
        .map(String::from)
        .or_else(|| std::env::var(env_key).ok().filter(|v| !v.is_empty()))
}

// ── Tunables ──

/// Deadlines around the external binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSettings {
    pub init_timeout: Duration,
    pub keygen_timeout: Duration,
    pub console_timeout: Duration,
    /// Pause between starting the node and the first console probe.
    pub verify_initial_delay: Duration,
    pub verify_interval: Duration,
    /// Probing stops once this much time has passed since the start.
    pub verify_deadline: Duration,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            keygen_timeout: Duration::from_secs(10),
            console_timeout: Duration::from_secs(3),
            verify_initial_delay: Duration::from_secs(1),
            verify_interval: Duration::from_secs(1),
            verify_deadline: Duration::from_secs(15),
        }
    }
}

/// Where units go and how systemd is driven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub unit_dir: PathBuf,
    pub systemctl: PathBuf,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from("/etc/systemd/system"),
            systemctl: PathBuf::from("systemctl"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub process: ProcessSettings,
    pub service: ServiceSettings,
}

impl Settings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            process: ProcessSettings {
                verify_deadline: Duration::from_secs(args.verify_timeout),
                ..Default::default()
            },
            service: ServiceSettings::default(),
        }
    }
}

// ── Descriptor resolution ──

fn default_threads() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
        .saturating_sub(1)
}

fn normalise(path: &Path) -> PathBuf {
    PathBuf::from(trim_trailing_separators(&path.to_string_lossy()))
}

/// Collects operator input, checks it and resolves everything the run needs
/// into an [`InstanceDescriptor`]. Nothing on disk is modified while building.
#[derive(Debug)]
pub struct DescriptorBuilder {
    args: Args,
    ports: PortAllocator,
}

impl DescriptorBuilder {
    pub fn new(args: Args) -> Self {
        Self {
            args,
            ports: PortAllocator::default(),
        }
    }

    pub fn resolve_paths(&self) -> Paths {
        let a = &self.args;
        let home = normalise(&a.home);
        let pick = |explicit: &Option<PathBuf>, fallback: &str| {
            explicit
                .as_deref()
                .map(normalise)
                .unwrap_or_else(|| home.join(fallback))
        };
        let log = pick(&a.log_path, "logs");
        Paths {
            dist: normalise(&a.dist_home),
            etc: pick(&a.etc_path, "etc"),
            db: pick(&a.db_path, "db"),
            init_log: log.join("init"),
            log,
            backup: pick(&a.backup_path, "backups"),
            home,
        }
    }

    pub fn resolve_binaries(&self, paths: &Paths) -> Result<Binaries> {
        let a = &self.args;
        let bin = paths.dist.join("bin");
        let binaries = Binaries {
            process: bin.join(a.mode.process_binary()),
            validator_engine_console: bin.join("validator-engine-console"),
            generate_random_id: bin.join("generate-random-id"),
            sed: which::which("sed").ok(),
            cronolog: match &a.cronolog_bin {
                Some(explicit) if explicit.is_file() => Some(explicit.clone()),
                Some(explicit) => {
                    return Err(SetupError::Validation(format!(
                        "Cronolog binary {} does not exist",
                        explicit.display()
                    )))
                }
                None => which::which("cronolog").ok(),
            },
        };

        let mut required = vec![&binaries.process, &binaries.generate_random_id];
        if a.mode == Mode::Node {
            required.push(&binaries.validator_engine_console);
        }
        for path in required {
            if !path.is_file() {
                return Err(SetupError::Validation(format!(
                    "Process binary {} does not exist",
                    path.display()
                )));
            }
        }
        if a.use_cronolog {
            if binaries.cronolog.is_none() {
                return Err(SetupError::Validation(
                    "Cronolog binary file cannot be found".into(),
                ));
            }
            if binaries.sed.is_none() {
                return Err(SetupError::Validation("sed binary cannot be found".into()));
            }
        }
        Ok(binaries)
    }

    pub fn resolve_users(&self) -> Result<Users> {
        Ok(Users {
            install: lookup_account(self.args.install_user.as_deref())?,
            service: lookup_account(self.args.service_user.as_deref())?,
        })
    }

    fn launch_params(&self) -> LaunchParams {
        let a = &self.args;
        LaunchParams {
            verbosity: a.service_verbosity,
            threads: a.service_threads.unwrap_or_else(default_threads),
            state_ttl: a.state_ttl,
            archive_ttl: a.archive_ttl,
            sync_before: a.sync_before,
            use_cronolog: a.use_cronolog,
            cronolog_template: a.cronolog_template.clone(),
        }
    }

    /// Validate input and resolve the descriptor. Also returns where the
    /// global config is to be fetched from.
    pub async fn build(mut self) -> Result<(InstanceDescriptor, GlobalConfigSource)> {
        tracing::debug!("Checking parameters");
        if self.args.instance_name.trim().is_empty() {
            return Err(SetupError::Validation("instance name is empty".into()));
        }
        if !self.args.dist_home.exists() {
            return Err(SetupError::Validation(format!(
                "Distribution path {} does not exist",
                self.args.dist_home.display()
            )));
        }

        tracing::debug!("Populating instance data");
        let paths = self.resolve_paths();
        let binaries = self.resolve_binaries(&paths)?;
        let source = GlobalConfigSource::parse(&self.args.global_config)?;
        let users = self.resolve_users()?;
        let address = resolve_public_address(self.args.address.as_deref()).await?;

        for port in [self.args.service_port, self.args.ls_port, self.args.console_port]
            .into_iter()
            .flatten()
        {
            self.ports.reserve(port);
        }
        let service_port = self.ports.resolve(self.args.service_port).await?;
        let (ls_port, console_port) = match self.args.mode {
            Mode::Node => (
                Some(self.ports.resolve(self.args.ls_port).await?),
                Some(self.ports.resolve(self.args.console_port).await?),
            ),
            Mode::Dht => (None, None),
        };

        let configs = Configs::for_paths(&paths);
        let launch = self.launch_params();
        let a = self.args;
        let descriptor = InstanceDescriptor {
            name: a.instance_name,
            mode: a.mode,
            network: Network {
                address,
                service_port,
                ls_port,
                console_port,
            },
            paths,
            configs,
            binaries,
            users,
            launch,
            setup_params: SetupParams {
                global_config_source: a.global_config,
                restore_dump: a.dump_url,
                force: a.force,
                install_systemd_service: a.install_systemd_service,
                start_systemd_service: a.start_systemd_service,
            },
        };
        Ok((descriptor, source))
    }
}

/// Name, uid and primary group of `name`, or of the invoking user.
pub fn lookup_account(name: Option<&str>) -> Result<Account> {
    let user = match default_val_opt(name, "USER") {
        Some(name) => User::from_name(&name)
            .map_err(|e| SetupError::Validation(format!("cannot look up user {name}: {e}")))?
            .ok_or_else(|| SetupError::Validation(format!("Unknown user {name}")))?,
        None => User::from_uid(getuid())
            .map_err(|e| SetupError::Validation(format!("cannot look up current user: {e}")))?
            .ok_or_else(|| SetupError::Validation("current user has no passwd entry".into()))?,
    };
    let group = Group::from_gid(user.gid)
        .map_err(|e| SetupError::Validation(format!("cannot look up group {}: {e}", user.gid)))?
        .ok_or_else(|| SetupError::Validation(format!("Unknown group {}", user.gid)))?;
    Ok(Account {
        user: user.name,
        uid: user.uid.as_raw(),
        group: group.name,
        gid: group.gid.as_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "ton-setup",
            "-m",
            "node",
            "-I",
            "fullnode",
            "-d",
            "/opt/ton/",
            "-g",
            "https://ton.org/global.config.json",
            "-H",
            "/srv/fullnode//",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn paths_default_under_home_without_trailing_separators() {
        let paths = DescriptorBuilder::new(args(&[])).resolve_paths();
        assert_eq!(paths.dist, PathBuf::from("/opt/ton"));
        assert_eq!(paths.home, PathBuf::from("/srv/fullnode"));
        assert_eq!(paths.etc, PathBuf::from("/srv/fullnode/etc"));
        assert_eq!(paths.db, PathBuf::from("/srv/fullnode/db"));
        assert_eq!(paths.log, PathBuf::from("/srv/fullnode/logs"));
        assert_eq!(paths.init_log, PathBuf::from("/srv/fullnode/logs/init"));
        assert_eq!(paths.backup, PathBuf::from("/srv/fullnode/backups"));
    }

    #[test]
    fn explicit_paths_override_defaults() {
        let paths = DescriptorBuilder::new(args(&[
            "--db-path",
            "/var/lib/ton/db/",
            "--log-path",
            "/var/log/ton",
        ]))
        .resolve_paths();
        assert_eq!(paths.db, PathBuf::from("/var/lib/ton/db"));
        assert_eq!(paths.init_log, PathBuf::from("/var/log/ton/init"));
        assert_eq!(paths.etc, PathBuf::from("/srv/fullnode/etc"));
    }

    #[test]
    fn missing_binaries_fail_validation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dist = tmp.path().to_str().unwrap().to_string();
        let mut a = args(&[]);
        a.dist_home = PathBuf::from(&dist);
        let builder = DescriptorBuilder::new(a);
        let paths = builder.resolve_paths();
        let err = builder.resolve_binaries(&paths).unwrap_err();
        assert!(matches!(err, SetupError::Validation(ref m) if m.contains("validator-engine")));
    }

    #[test]
    fn missing_explicit_cronolog_fails_validation() {
        let builder = DescriptorBuilder::new(args(&[
            "--use-cronolog",
            "--cronolog-bin",
            "/nonexistent/cronolog",
        ]));
        let paths = builder.resolve_paths();
        let err = builder.resolve_binaries(&paths).unwrap_err();
        assert!(matches!(err, SetupError::Validation(ref m) if m.starts_with("Cronolog")));
    }

    #[test]
    fn explicit_value_beats_environment() {
        std::env::set_var("TON_SETUP_TEST_FALLBACK_USER", "bob");
        assert_eq!(
            default_val_opt(Some("alice"), "TON_SETUP_TEST_FALLBACK_USER").as_deref(),
            Some("alice")
        );
        assert_eq!(
            default_val_opt(Some(""), "TON_SETUP_TEST_FALLBACK_USER").as_deref(),
            Some("bob")
        );
        assert_eq!(default_val_opt(None, "TON_SETUP_TEST_SURELY_UNSET"), None);
    }

    #[test]
    fn current_user_resolves() {
        let me = lookup_account(None).unwrap();
        assert_eq!(me.uid, getuid().as_raw());
        assert!(!me.group.is_empty());
    }

    #[test]
    fn dotenv_does_not_override_existing_variables() {
        let tmp = tempfile::TempDir::new().unwrap();
        let env = tmp.path().join(".env");
        fs::write(
            &env,
            "# comment\nTON_SETUP_DOTENV_FRESH = loaded\nPATH=/clobbered\n\n",
        )
        .unwrap();
        load_dotenv(&env);
        assert_eq!(std::env::var("TON_SETUP_DOTENV_FRESH").unwrap(), "loaded");
        assert_ne!(std::env::var("PATH").unwrap(), "/clobbered");
    }
}
