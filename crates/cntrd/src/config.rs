use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use cntr_net::{
    DEFAULT_ADDRESS_POOL, DEFAULT_DEVICE, DEFAULT_PARENT_LINK, DEFAULT_POOL_OFFSET,
    HostNetworkSettings, NetworkKind,
};
use cntr_spawn::{DEFAULT_STORAGE_DIR, DEFAULT_UNIT_DIR};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{CliError, CliResult};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/photon-os-container/cntrd.yaml";

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub log_level: String,
    /// Container root filesystems, one directory per container.
    pub storage_dir: PathBuf,
    /// Where service units are installed.
    pub unit_dir: PathBuf,
    /// Configure machines already running when the daemon starts.
    pub configure_existing: bool,
    pub network: NetworkConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            unit_dir: PathBuf::from(DEFAULT_UNIT_DIR),
            configure_existing: false,
            network: NetworkConfig::default(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub kind: String,
    pub parent_link: String,
    pub device: String,
    pub address_pool: String,
    pub pool_offset: u32,
    pub gateway: Option<Ipv4Addr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            kind: NetworkKind::Bridge.to_string(),
            parent_link: DEFAULT_PARENT_LINK.to_string(),
            device: DEFAULT_DEVICE.to_string(),
            address_pool: DEFAULT_ADDRESS_POOL.to_string(),
            pool_offset: DEFAULT_POOL_OFFSET,
            gateway: None,
        }
    }
}

impl NetworkConfig {
    pub fn settings(&self) -> CliResult<HostNetworkSettings> {
        let kind = self
            .kind
            .parse()
            .map_err(|e| CliError::Config(format!("network.kind: {e}")))?;
        Ok(HostNetworkSettings {
            kind,
            device: self.device.clone(),
            parent_link: self.parent_link.clone(),
            address_pool: self.address_pool.clone(),
            pool_offset: self.pool_offset,
            gateway: self.gateway,
        })
    }
}

impl DaemonConfig {
    pub fn level(&self) -> CliResult<Level> {
        self.log_level
            .parse()
            .map_err(|_| CliError::Config(format!("unknown log_level {:?}", self.log_level)))
    }

    /// Resolve relative paths against `config_dir` (the directory containing the YAML file).
    fn resolve_relative_paths(&mut self, config_dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = config_dir.join(&*p);
            }
        };
        resolve(&mut self.storage_dir);
        resolve(&mut self.unit_dir);
    }
}

/// Load the daemon config from a YAML file.
///
/// Returns `None` if the file does not exist; every field has a default.
pub async fn load(path: &Path) -> CliResult<Option<DaemonConfig>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CliError::Config(format!("read {}: {e}", path.display()))),
    };
    let mut config: DaemonConfig = if content.trim().is_empty() {
        DaemonConfig::default()
    } else {
        serde_yaml_ng::from_str(&content)
            .map_err(|e| CliError::Config(format!("parse {}: {e}", path.display())))?
    };
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    Ok(Some(config))
}
