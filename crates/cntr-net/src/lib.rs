//! Host-side networking for systemd-nspawn machines: address leasing, shared
//! device management, per-machine namespace configuration and the machined
//! state watcher.

mod command;
mod machined;
mod network;
mod paths;
mod prerequisites;

pub use command::{CommandError, exec};
pub use machined::{
    MachineAction, MachineRecord, MachineRegistry, MachineSummary, MachineWatcher, Machinectl,
    UnknownMachineAction, WatchEvent, list_machines, parse_leader, parse_list, watch,
};
pub use network::{
    AddressPool, DEFAULT_ADDRESS_POOL, DEFAULT_DEVICE, DEFAULT_PARENT_LINK, DEFAULT_POOL_OFFSET,
    GUEST_VETH, HostNetwork, HostNetworkSettings, IpRoute, Link, LinkKind, LinkOps, LinkTable,
    MacAddr, MachineConfigurator, NamespaceSwitch, NetnsConfigurator, NetnsGuard, NetworkError,
    NetworkKind, ProcNetns, Result, UnknownNetworkKind, create_bridge, create_ipvlan,
    create_macvlan, ensure_ipv4_forward, random_mac, set_link_up,
};
pub use paths::{IPV4_FORWARD, MACHINES_STATE_DIR};
pub use prerequisites::check_prerequisites;
