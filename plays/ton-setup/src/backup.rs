//! Snapshot of the freshly provisioned database config and keyring.

use std::{fs, io, path::Path};

use walkdir::WalkDir;

use crate::{
    descriptor::Paths,
    error::{IoContext, Result, SetupError},
};

/// Copy `<db>/config.json` and the whole `<db>/keyring` into
/// `<backup>/initial`. Either one missing is an error.
pub fn snapshot_initial(paths: &Paths) -> Result<()> {
    tracing::info!("Creating configuration backup");
    let config = paths.db.join("config.json");
    let keyring = paths.keyring_dir();
    let initial = paths.initial_backup_dir();

    for (what, present) in [(&config, config.is_file()), (&keyring, keyring.is_dir())] {
        if !present {
            return Err(SetupError::io(
                format!("back up {}", what.display()),
                io::Error::new(io::ErrorKind::NotFound, "not found"),
            ));
        }
    }

    fs::create_dir_all(&initial).with_path("create directory", &initial)?;
    let dest = initial.join("config.json");
    fs::copy(&config, &dest).with_path("copy to", &dest)?;
    copy_tree(&keyring, &initial.join("keyring"))
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| SetupError::io(format!("walk {}", from.display()), e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| SetupError::Validation(e.to_string()))?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_path("create directory", &target)?;
        } else {
            fs::copy(entry.path(), &target).with_path("copy to", &target)?;
        }
    }
    Ok(())
}
