use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use ipnetwork::Ipv4Network;
use tracing::{info, warn};

use super::address::{AddressPool, DEFAULT_POOL_OFFSET};
use super::error::{NetworkError, Result};
use super::kind::NetworkKind;
use super::link::{LinkOps, LinkTable, create_bridge, create_ipvlan, create_macvlan, set_link_up};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Host-side device containers attach to.
pub const DEFAULT_DEVICE: &str = "photon";

/// Physical link the macvlan/ipvlan device sits on.
pub const DEFAULT_PARENT_LINK: &str = "eth0";

pub const DEFAULT_ADDRESS_POOL: &str = "172.16.85.50/24";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Host network settings, as read from the daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNetworkSettings {
    pub kind: NetworkKind,
    pub device: String,
    pub parent_link: String,
    pub address_pool: String,
    pub pool_offset: u32,
    /// Overrides gateway discovery on `parent_link`.
    pub gateway: Option<Ipv4Addr>,
}

impl Default for HostNetworkSettings {
    fn default() -> Self {
        Self {
            kind: NetworkKind::Bridge,
            device: DEFAULT_DEVICE.to_string(),
            parent_link: DEFAULT_PARENT_LINK.to_string(),
            address_pool: DEFAULT_ADDRESS_POOL.to_string(),
            pool_offset: DEFAULT_POOL_OFFSET,
            gateway: None,
        }
    }
}

// ---------------------------------------------------------------------------
// HostNetwork
// ---------------------------------------------------------------------------

/// Host networking state shared by every machine configuration.
///
/// The address pool is the only mutable part; leases are serialized through
/// its mutex so concurrent configurations never receive the same address.
#[derive(Debug)]
pub struct HostNetwork {
    kind: NetworkKind,
    device: String,
    gateway: Ipv4Addr,
    links: LinkTable,
    pool: Mutex<AddressPool>,
}

impl HostNetwork {
    pub fn new(
        kind: NetworkKind,
        device: impl Into<String>,
        gateway: Ipv4Addr,
        links: LinkTable,
        pool: AddressPool,
    ) -> Self {
        Self {
            kind,
            device: device.into(),
            gateway,
            links,
            pool: Mutex::new(pool),
        }
    }

    /// Prepare the host for container networking.
    ///
    /// Enables IPv4 forwarding through `ip_forward`, creates the shared
    /// device (idempotent), brings it up, resolves the gateway and snapshots
    /// the link table. The pool is validated first so a bad configuration
    /// fails before the host is touched.
    pub async fn setup(
        settings: &HostNetworkSettings,
        ops: &dyn LinkOps,
        ip_forward: &Path,
    ) -> Result<Self> {
        let pool = AddressPool::parse(&settings.address_pool, settings.pool_offset)?;

        ensure_ipv4_forward(ip_forward).await?;

        let device = settings.device.as_str();
        let parent = settings.parent_link.as_str();
        match settings.kind {
            NetworkKind::Macvlan => create_macvlan(ops, device, parent).await?,
            NetworkKind::Ipvlan => create_ipvlan(ops, device, parent).await?,
            NetworkKind::None | NetworkKind::Bridge | NetworkKind::Interface => {
                create_bridge(ops, device).await?;
            }
        }
        set_link_up(ops, device).await?;

        let gateway = match settings.gateway {
            Some(gateway) => gateway,
            None => ops.default_gateway(parent).await?,
        };

        let links = LinkTable::acquire(ops).await?;
        if !links.contains(parent) {
            warn!(link = %parent, "parent link not present in link table");
        }

        info!(
            kind = %settings.kind,
            device = %device,
            gateway = %gateway,
            pool = %pool.network(),
            first = %pool.cursor(),
            "host network ready"
        );

        Ok(Self::new(settings.kind, device, gateway, links, pool))
    }

    pub fn kind(&self) -> NetworkKind {
        self.kind
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    /// Name of the interface nspawn creates inside each container.
    pub fn container_link(&self) -> String {
        self.kind.container_link(&self.device)
    }

    /// Lease the next address from the pool.
    pub fn allocate(&self) -> Result<Ipv4Network> {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next()
    }
}

/// Turn on IPv4 forwarding. Returns `true` if the value had to be changed.
pub async fn ensure_ipv4_forward(path: &Path) -> Result<bool> {
    let current = tokio::fs::read_to_string(path).await.map_err(|e| {
        NetworkError::Unavailable(format!("cannot read {}: {e}", path.display()))
    })?;
    if current.trim() == "1" {
        return Ok(false);
    }
    tokio::fs::write(path, "1").await?;
    info!(path = %path.display(), "enabled IPv4 forwarding");
    Ok(true)
}
