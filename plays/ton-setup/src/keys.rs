//! Key material produced by `generate-random-id`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use nix::errno::Errno;

use crate::{
    descriptor::{KeyMaterial, KeyRole, KeySet, Paths},
    error::{IoContext, Result, SetupError},
    tools::KeygenCommand,
};

/// Bytes in front of the raw key inside a `.pub` file.
pub const PUB_HEADER_LEN: usize = 4;

pub struct KeyProvisioner<'a> {
    keygen: &'a Path,
    timeout: Duration,
}

impl<'a> KeyProvisioner<'a> {
    pub fn new(keygen: &'a Path, timeout: Duration) -> Self {
        Self { keygen, timeout }
    }

    /// Generate one key pair at `basename` / `basename.pub`.
    pub async fn generate(&self, basename: &Path) -> Result<KeyMaterial> {
        let cmd = KeygenCommand::keys(self.keygen, basename);
        let out = cmd.run(self.timeout).await?;
        let (short_id, public_id_hash) = parse_ids(&out.stdout).ok_or_else(|| {
            SetupError::tool(
                cmd.name(),
                "expected '<short id> <public id hash>' on stdout",
                out.stdout.clone(),
            )
        })?;

        let pub_path = pub_file(basename);
        let raw = tokio::fs::read(&pub_path).await.with_path("read", &pub_path)?;
        let public_key_base64 = encode_public_key(&raw).ok_or_else(|| {
            SetupError::tool(
                cmd.name(),
                format!("{} is shorter than its header", pub_path.display()),
                "",
            )
        })?;

        Ok(KeyMaterial {
            short_id,
            public_id_hash,
            public_key_base64,
        })
    }

    /// Server, client and liteserver keys under `<etc>/keys`.
    pub async fn generate_console_keys(&self, paths: &Paths) -> Result<KeySet> {
        tracing::info!("Generating console server, client and liteserver keys");
        let keys_dir = paths.keys_dir();
        Ok(KeySet {
            server: self.generate(&keys_dir.join(KeyRole::Server.basename())).await?,
            client: self.generate(&keys_dir.join(KeyRole::Client.basename())).await?,
            liteserver: self
                .generate(&keys_dir.join(KeyRole::Liteserver.basename()))
                .await?,
        })
    }
}

/// Move the private keys the engine itself needs into its keyring, named by
/// short id. The client key stays behind for the console.
pub async fn install_into_keyring(paths: &Paths, keys: &KeySet) -> Result<()> {
    tracing::info!("Moving private keys into node database");
    let keyring = paths.keyring_dir();
    tokio::fs::create_dir_all(&keyring)
        .await
        .with_path("create directory", &keyring)?;
    for role in [KeyRole::Server, KeyRole::Liteserver] {
        let from = paths.keys_dir().join(role.basename());
        let to = keyring.join(&keys.get(role).short_id);
        move_file(&from, &to).await?;
    }
    Ok(())
}

/// Rename, or copy and delete when `to` is on another filesystem.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match tokio::fs::rename(from, to).await {
        Err(e) if e.raw_os_error() == Some(Errno::EXDEV as i32) => {
            tracing::debug!("{} is on another device, copying", to.display());
            tokio::fs::copy(from, to).await.with_path("copy key to", to)?;
            tokio::fs::remove_file(from).await.with_path("remove", from)
        }
        other => other.with_path("move key to", to),
    }
}

fn parse_ids(stdout: &str) -> Option<(String, String)> {
    let mut tokens = stdout.split_whitespace();
    let short_id = tokens.next()?.to_string();
    let hash = tokens.next()?.to_string();
    Some((short_id, hash))
}

fn encode_public_key(raw: &[u8]) -> Option<String> {
    raw.get(PUB_HEADER_LEN..).map(|key| BASE64.encode(key))
}

pub fn pub_file(basename: &Path) -> PathBuf {
    let mut name = basename.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}
