//! One provisioning run, start to finish.
//!
//! The steps run strictly in order and stop at the first error. Nothing is
//! rolled back: a failed run leaves whatever it created for the operator to
//! inspect, and the next attempt needs `--force`.

use std::path::PathBuf;

use tracing::Instrument;

use crate::{
    backup,
    cli::Args,
    config::{DescriptorBuilder, Settings},
    descriptor::{InstanceDescriptor, InstanceRecord, KeySet},
    error::Result,
    mode::{publish_snippet, strategy_for, ModeStrategy},
    net::GlobalConfigSource,
    paths,
    process::LifecycleController,
    service::{self, Systemd},
    synth,
};

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub unit_file: PathBuf,
    pub installed_unit: Option<PathBuf>,
    pub keys: Option<KeySet>,
}

pub struct Orchestrator {
    desc: InstanceDescriptor,
    source: GlobalConfigSource,
    settings: Settings,
    strategy: Box<dyn ModeStrategy>,
}

impl Orchestrator {
    pub fn new(desc: InstanceDescriptor, source: GlobalConfigSource, settings: Settings) -> Self {
        let strategy = strategy_for(desc.mode);
        Self {
            desc,
            source,
            settings,
            strategy,
        }
    }

    /// Validate the arguments and resolve the descriptor.
    pub async fn from_args(args: Args) -> Result<Self> {
        let settings = Settings::from_args(&args);
        let (desc, source) = DescriptorBuilder::new(args).build().await?;
        Ok(Self::new(desc, source, settings))
    }

    pub async fn run(&self) -> Result<ProvisionReport> {
        let span = tracing::info_span!("instance", name = %self.desc.name, mode = %self.desc.mode);
        self.provision().instrument(span).await
    }

    async fn provision(&self) -> Result<ProvisionReport> {
        let desc = &self.desc;
        let process = &self.settings.process;

        paths::clear_leftovers(&desc.paths, &desc.configs, desc.setup_params.force)?;
        tracing::info!("Creating paths");
        paths::ensure_layout(&desc.paths)?;

        self.source.store(&desc.configs.global).await?;

        LifecycleController::new(process)
            .init_database(desc)
            .await?;

        let keys = self.strategy.provision_keys(desc, process).await?;
        let snippet = self
            .strategy
            .synthesize_config(desc, keys.as_ref(), process)
            .await?;
        publish_snippet(desc, snippet).await?;

        self.strategy.verify(desc, process).await?;

        let launch = self.strategy.launch_command(desc, true, false);
        let unit_file = service::write_unit(desc, &launch).await?;
        let systemd = Systemd::new(&self.settings.service);
        let installed_unit = if desc.setup_params.install_systemd_service {
            Some(systemd.install(&desc.name, &unit_file).await?)
        } else {
            None
        };

        tracing::info!("Creating instance configuration file");
        let record = InstanceRecord {
            descriptor: desc,
            keys: keys.as_ref().map(KeySet::to_map).unwrap_or_default(),
        };
        synth::write_document(&desc.configs.instance, &record).await?;

        backup::snapshot_initial(&desc.paths)?;

        tracing::info!("Set owner of installed files");
        let install = &desc.users.install;
        paths::reown(&desc.paths.home, install.uid, install.gid, true)?;
        tracing::info!("Set owner of service files");
        let service_owner = &desc.users.service;
        for dir in [&desc.paths.db, &desc.paths.log] {
            paths::reown(dir, service_owner.uid, service_owner.gid, true)?;
        }

        if desc.setup_params.start_systemd_service {
            systemd.enable_and_start(&desc.name).await?;
        }

        tracing::info!("Work completed");
        Ok(ProvisionReport {
            unit_file,
            installed_unit,
            keys,
        })
    }
}

/// Resolve `args` and provision the instance they describe.
pub async fn run(args: Args) -> Result<ProvisionReport> {
    Orchestrator::from_args(args).await?.run().await
}
