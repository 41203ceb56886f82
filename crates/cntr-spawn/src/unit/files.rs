use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::descriptor::UnitDescriptor;
use super::generate::{network_file_name, service_file_name};
use crate::error::{UnitError, UnitResult};

/// Directory holding the service units written by `install`.
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Root filesystems of the containers, one directory per container.
pub const DEFAULT_STORAGE_DIR: &str = "/var/lib/machines";

/// networkd configuration directory, relative to a container root.
const NETWORK_UNIT_DIR: &str = "etc/systemd/network";

/// Reject names that would escape the unit or storage directory.
pub fn validate_name(name: &str) -> UnitResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.chars().any(|c| c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(UnitError::InvalidName(name.to_string()))
    }
}

/// On-disk locations of a container's unit files.
#[derive(Debug, Clone)]
pub struct UnitFiles {
    unit_dir: PathBuf,
    storage_dir: PathBuf,
}

impl UnitFiles {
    pub fn new(unit_dir: impl Into<PathBuf>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            storage_dir: storage_dir.into(),
        }
    }

    /// `<storage_dir>/<name>`
    pub fn container_root(&self, name: &str) -> PathBuf {
        self.storage_dir.join(name)
    }

    /// `<unit_dir>/<name>.service`
    pub fn service_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(service_file_name(name))
    }

    /// `<storage_dir>/<name>/etc/systemd/network/10-<name>.network`
    pub fn network_path(&self, name: &str) -> PathBuf {
        self.container_root(name)
            .join(NETWORK_UNIT_DIR)
            .join(network_file_name(name))
    }

    /// Write the service unit and, if given, the network unit.
    ///
    /// Returns the paths written.
    pub async fn write(
        &self,
        name: &str,
        service: &UnitDescriptor,
        network: Option<&UnitDescriptor>,
    ) -> UnitResult<Vec<PathBuf>> {
        validate_name(name)?;
        let mut written = Vec::with_capacity(2);

        let service_path = self.service_path(name);
        write_atomic(&service_path, &service.render()).await?;
        written.push(service_path);

        if let Some(network) = network {
            let network_path = self.network_path(name);
            write_atomic(&network_path, &network.render()).await?;
            written.push(network_path);
        }

        info!(container = %name, files = written.len(), "unit files written");
        Ok(written)
    }

    /// Delete both unit files. Files that are already gone are ignored.
    pub async fn remove(&self, name: &str) -> UnitResult<()> {
        validate_name(name)?;
        for path in [self.service_path(name), self.network_path(name)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed unit file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(container = %name, "unit files removed");
        Ok(())
    }
}

/// Write `content` to a temporary sibling, then rename it over `path`.
async fn write_atomic(path: &Path, content: &str) -> UnitResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| UnitError::InvalidName(path.display().to_string()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| UnitError::InvalidName(path.display().to_string()))?;

    tokio::fs::create_dir_all(parent).await?;
    let tmp = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    debug!(path = %path.display(), "wrote unit file");
    Ok(())
}
