//! Directory layout of an instance and ownership of what ends up in it.

use std::{fs, os::unix::fs::chown, path::Path};

use walkdir::WalkDir;

use crate::{
    descriptor::{Configs, Paths},
    error::{IoContext, Result, SetupError},
};

/// Something a previous installation left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leftover {
    Database,
    Keys,
    InitialBackup,
}

impl Leftover {
    fn reason(self) -> &'static str {
        match self {
            Leftover::Database => "Database exists",
            Leftover::Keys => "Keys directory exists",
            Leftover::InitialBackup => "Initial backups directory exists",
        }
    }
}

/// Find leftovers of an earlier run. Without `force` the first one found is
/// an error; with `force` each one is removed (the whole database directory
/// for [`Leftover::Database`]).
///
/// Not atomic. Two runs against the same home must not overlap.
pub fn clear_leftovers(paths: &Paths, configs: &Configs, force: bool) -> Result<Vec<Leftover>> {
    let checks = [
        (Leftover::Database, configs.node.is_file(), paths.db.clone()),
        (Leftover::Keys, paths.keys_dir().is_dir(), paths.keys_dir()),
        (
            Leftover::InitialBackup,
            paths.initial_backup_dir().is_dir(),
            paths.initial_backup_dir(),
        ),
    ];

    let mut removed = Vec::new();
    for (leftover, present, target) in checks {
        if !present {
            continue;
        }
        tracing::info!("{} at {}", leftover.reason(), target.display());
        if !force {
            return Err(SetupError::PreexistingState(leftover.reason().to_string()));
        }
        tracing::info!("Destroying {}", target.display());
        fs::remove_dir_all(&target).with_path("remove", &target)?;
        removed.push(leftover);
    }
    Ok(removed)
}

/// Create every directory of the layout that does not exist yet.
pub fn ensure_layout(paths: &Paths) -> Result<()> {
    let keys = paths.keys_dir();
    let initial = paths.initial_backup_dir();
    let dirs = [
        &paths.home,
        &paths.etc,
        &paths.db,
        &paths.log,
        &paths.init_log,
        &paths.backup,
        &keys,
        &initial,
    ];
    for dir in dirs {
        if !dir.exists() {
            tracing::debug!("Creating path {}", dir.display());
        }
        fs::create_dir_all(dir).with_path("create directory", dir)?;
    }
    Ok(())
}

/// Change owner of `path`, and of everything below it when `recursive`.
pub fn reown(path: &Path, uid: u32, gid: u32, recursive: bool) -> Result<()> {
    if !recursive {
        return chown(path, Some(uid), Some(gid)).with_path("chown", path);
    }
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
            SetupError::io(format!("walk {}", at.display()), e.into())
        })?;
        chown(entry.path(), Some(uid), Some(gid)).with_path("chown", entry.path())?;
    }
    Ok(())
}

/// Strip trailing separators the way the operator's paths are normalised.
pub fn trim_trailing_separators(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() && raw.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
