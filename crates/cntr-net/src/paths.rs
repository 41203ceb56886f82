/// systemd-machined keeps one entry per running machine here.
pub const MACHINES_STATE_DIR: &str = "/run/systemd/machines";

/// sysctl `net.ipv4.ip_forward`.
pub const IPV4_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";
