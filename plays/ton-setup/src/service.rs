//! systemd unit for the provisioned instance.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    config::ServiceSettings,
    descriptor::{InstanceDescriptor, Mode},
    error::{IoContext, Result, SetupError},
    tools::ToolCommand,
};

const NODE_UNIT: &str = include_str!("../templates/node.systemd.service");
const DHT_UNIT: &str = include_str!("../templates/dht.systemd.service");

const SYSTEMCTL_TIMEOUT: Duration = Duration::from_secs(30);

pub fn template_for(mode: Mode) -> &'static str {
    match mode {
        Mode::Node => NODE_UNIT,
        Mode::Dht => DHT_UNIT,
    }
}

/// Replace every literal occurrence of each token with its value, in order.
pub fn render(template: &str, stash: &[(&str, String)]) -> String {
    stash
        .iter()
        .fold(template.to_string(), |acc, (token, value)| {
            acc.replace(token, value)
        })
}

/// Run `cmd` under a shell that strips ANSI colours and hands the output to
/// cronolog.
pub fn cronolize_cmd(desc: &InstanceDescriptor, cmd: &str) -> Result<String> {
    let missing = |what: &str| SetupError::Validation(format!("{what} binary is not resolved"));
    let sed = desc.binaries.sed.as_ref().ok_or_else(|| missing("sed"))?;
    let cronolog = desc
        .binaries
        .cronolog
        .as_ref()
        .ok_or_else(|| missing("cronolog"))?;
    Ok(format!(
        "/bin/sh -c '{} 2>&1 | {} -u -e \"s/\\x1b\\[[0-9;]*m//g\" | {} {}/{}'",
        cmd,
        sed.display(),
        cronolog.display(),
        desc.paths.log.display(),
        desc.launch.cronolog_template
    ))
}

/// `ExecStart=` value for `launch`.
pub fn exec_start(desc: &InstanceDescriptor, launch: &ToolCommand) -> Result<String> {
    let line = launch.command_line();
    if desc.launch.use_cronolog {
        cronolize_cmd(desc, &line)
    } else {
        Ok(line)
    }
}

pub fn render_unit(desc: &InstanceDescriptor, launch: &ToolCommand) -> Result<String> {
    let stash = [
        ("##DESCRIPTION##", format!("{} service", desc.name)),
        ("##USER##", desc.users.service.user.clone()),
        ("##GROUP##", desc.users.service.group.clone()),
        ("##EXECSTART##", exec_start(desc, launch)?),
    ];
    Ok(render(template_for(desc.mode), &stash))
}

pub fn unit_file(desc: &InstanceDescriptor) -> PathBuf {
    desc.paths.etc.join(format!("{}.systemd.service", desc.name))
}

/// Render the unit into `<etc>/<name>.systemd.service`.
pub async fn write_unit(desc: &InstanceDescriptor, launch: &ToolCommand) -> Result<PathBuf> {
    let path = unit_file(desc);
    tracing::info!("Creating systemd service file {}", path.display());
    let unit = render_unit(desc, launch)?;
    tokio::fs::write(&path, unit).await.with_path("write", &path)?;
    Ok(path)
}

pub struct Systemd<'a> {
    settings: &'a ServiceSettings,
}

impl<'a> Systemd<'a> {
    pub fn new(settings: &'a ServiceSettings) -> Self {
        Self { settings }
    }

    fn systemctl(&self) -> ToolCommand {
        ToolCommand::new(&self.settings.systemctl)
    }

    /// Copy the unit into the unit directory as `<name>.service` and reload.
    pub async fn install(&self, name: &str, unit: &Path) -> Result<PathBuf> {
        tracing::info!("Installing systemd service {}", name);
        let dest = self.settings.unit_dir.join(format!("{name}.service"));
        tokio::fs::copy(unit, &dest).await.with_path("copy to", &dest)?;
        self.systemctl()
            .arg("daemon-reload")
            .run(SYSTEMCTL_TIMEOUT)
            .await?;
        Ok(dest)
    }

    pub async fn enable_and_start(&self, name: &str) -> Result<()> {
        tracing::info!("Enabling and starting systemd service {}", name);
        for action in ["enable", "start"] {
            self.systemctl()
                .arg(action)
                .arg(name)
                .run(SYSTEMCTL_TIMEOUT)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{strategy_for, tests::descriptor};

    #[test]
    fn tokens_are_replaced_everywhere() {
        let out = render(
            "##A## and ##A##, ##B##",
            &[("##A##", "x".to_string()), ("##B##", "y".to_string())],
        );
        assert_eq!(out, "x and x, y");
    }

    #[test]
    fn node_unit_carries_launch_and_accounts() {
        let desc = descriptor(Mode::Node, false);
        let launch = strategy_for(Mode::Node).launch_command(&desc, true, false);
        let unit = render_unit(&desc, &launch).unwrap();
        assert!(unit.contains("Description=n1 service"));
        assert!(unit.contains("User=ton\n"));
        assert!(unit.contains("Group=ton\n"));
        let exec = unit
            .lines()
            .find_map(|l| l.strip_prefix("ExecStart="))
            .unwrap();
        assert!(exec.starts_with("/opt/ton/bin/validator-engine --db /srv/n1/db"));
        assert!(exec.contains("--global-config /srv/n1/etc/global.config.json"));
        assert!(!unit.contains("##"));
    }

    #[test]
    fn cronolog_wraps_command_exactly() {
        let desc = descriptor(Mode::Dht, true);
        let wrapped = cronolize_cmd(&desc, "/opt/ton/bin/dht-server --db /srv/n1/db").unwrap();
        assert_eq!(
            wrapped,
            r#"/bin/sh -c '/opt/ton/bin/dht-server --db /srv/n1/db 2>&1 | /bin/sed -u -e "s/\x1b\[[0-9;]*m//g" | /usr/bin/cronolog /srv/n1/logs/%Y-%m-%d.log'"#
        );
    }

    #[test]
    fn cronolog_requires_resolved_helpers() {
        let mut desc = descriptor(Mode::Node, true);
        desc.binaries.cronolog = None;
        assert!(cronolize_cmd(&desc, "x").is_err());
    }

    #[test]
    fn unit_file_lives_in_etc() {
        let desc = descriptor(Mode::Node, false);
        assert_eq!(unit_file(&desc), PathBuf::from("/srv/n1/etc/n1.systemd.service"));
    }

    #[tokio::test]
    async fn install_copies_unit_and_reloads() {
        let tmp = tempfile::TempDir::new().unwrap();
        let unit = tmp.path().join("n1.systemd.service");
        std::fs::write(&unit, "[Unit]\n").unwrap();
        let unit_dir = tmp.path().join("system");
        std::fs::create_dir(&unit_dir).unwrap();
        let settings = ServiceSettings {
            unit_dir: unit_dir.clone(),
            systemctl: "/bin/true".into(),
        };
        let dest = Systemd::new(&settings).install("n1", &unit).await.unwrap();
        assert_eq!(dest, unit_dir.join("n1.service"));
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "[Unit]\n");
    }
}
