//! Target filesystem access.
//!
//! [`TargetFs`] is the seam between the engine and the disk. [`PosixFs`] writes
//! atomically: content goes to a temporary file in the target's directory, is
//! flushed, then renamed over the target, so readers never observe a
//! partially written certificate or key.

use crate::error::{ConfigError, Error, Result};
use crate::resource::Ownership;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub trait TargetFs {
    /// Current content, or `None` when the target does not exist.
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Replace the target with `content` and permission bits `mode`.
    fn write_atomic(&self, path: &Path, content: &[u8], mode: u32) -> Result<()>;

    /// Remove the target. Returns whether anything was removed.
    fn remove(&self, path: &Path) -> Result<bool>;

    /// Permission bits of an existing target.
    fn mode(&self, path: &Path) -> Option<u32>;

    /// Enforce owner, group and mode. Returns whether anything changed.
    fn apply_ownership(&self, path: &Path, ownership: &Ownership) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PosixFs;

impl TargetFs for PosixFs {
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn write_atomic(&self, path: &Path, content: &[u8], mode: u32) -> Result<()> {
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("/"));
        let mut file = NamedTempFile::new_in(dir).map_err(|e| Error::io(path, e))?;
        file.write_all(content).map_err(|e| Error::io(path, e))?;
        fs::set_permissions(file.path(), fs::Permissions::from_mode(mode))
            .map_err(|e| Error::io(path, e))?;
        if let Err(e) = file.as_file().sync_all() {
            warn!(path = %path.display(), error = %e, "fsync failed");
        }
        file.persist(path).map_err(|e| Error::io(path, e.error))?;
        debug!(path = %path.display(), bytes = content.len(), mode = %format!("{:o}", mode), "wrote file");
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn mode(&self, path: &Path) -> Option<u32> {
        fs::metadata(path)
            .ok()
            .map(|meta| meta.permissions().mode() & 0o7777)
    }

    fn apply_ownership(&self, path: &Path, ownership: &Ownership) -> Result<bool> {
        let meta = fs::metadata(path).map_err(|e| Error::io(path, e))?;
        let mut changed = false;

        let uid = ownership
            .owner
            .as_deref()
            .map(|owner| resolve_uid(path, owner))
            .transpose()?
            .filter(|&uid| uid != meta.uid());
        let gid = ownership
            .group
            .as_deref()
            .map(|group| resolve_gid(path, group))
            .transpose()?
            .filter(|&gid| gid != meta.gid());
        if uid.is_some() || gid.is_some() {
            std::os::unix::fs::chown(path, uid, gid).map_err(|e| Error::io(path, e))?;
            debug!(path = %path.display(), ?uid, ?gid, "changed ownership");
            changed = true;
        }

        if let Some(mode) = ownership.mode {
            if meta.permissions().mode() & 0o7777 != mode {
                fs::set_permissions(path, fs::Permissions::from_mode(mode))
                    .map_err(|e| Error::io(path, e))?;
                debug!(path = %path.display(), mode = %format!("{:o}", mode), "changed mode");
                changed = true;
            }
        }
        Ok(changed)
    }
}

fn resolve_uid(path: &Path, owner: &str) -> Result<u32> {
    if let Ok(uid) = owner.parse::<u32>() {
        return Ok(uid);
    }
    match nix::unistd::User::from_name(owner) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(unknown(path, "owner", format!("no such user '{}'", owner))),
        Err(e) => Err(unknown(path, "owner", format!("{}: {}", owner, e))),
    }
}

fn resolve_gid(path: &Path, group: &str) -> Result<u32> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(gid);
    }
    match nix::unistd::Group::from_name(group) {
        Ok(Some(group)) => Ok(group.gid.as_raw()),
        Ok(None) => Err(unknown(path, "group", format!("no such group '{}'", group))),
        Err(e) => Err(unknown(path, "group", format!("{}: {}", group, e))),
    }
}

fn unknown(path: &Path, field: &'static str, reason: String) -> Error {
    Error::Configuration(ConfigError::InvalidParameter {
        path: path.display().to_string(),
        field,
        reason,
    })
}
