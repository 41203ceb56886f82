mod address;
mod configure;
mod error;
mod host;
mod kind;
mod link;
mod netns;

pub use address::{AddressPool, DEFAULT_POOL_OFFSET};
pub use configure::{MachineConfigurator, NetnsConfigurator};
pub use error::{NetworkError, Result};
pub use host::{
    DEFAULT_ADDRESS_POOL, DEFAULT_DEVICE, DEFAULT_PARENT_LINK, HostNetwork, HostNetworkSettings,
    ensure_ipv4_forward,
};
pub use kind::{GUEST_VETH, NetworkKind, UnknownNetworkKind};
pub use link::{
    IpRoute, Link, LinkKind, LinkOps, LinkTable, MacAddr, create_bridge, create_ipvlan,
    create_macvlan, random_mac, set_link_up,
};
pub use netns::{NamespaceSwitch, NetnsGuard, ProcNetns};
