//! Host link inventory and virtual device management.
//!
//! All kernel link programming goes through the [`LinkOps`] trait. The
//! production implementation, [`IpRoute`], drives `ip(8)`; tests inject an
//! in-memory implementation instead.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use tracing::{debug, info};

use crate::command::{CommandError, exec};

use super::error::{NetworkError, Result};

const LOOPBACK: &str = "lo";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A kernel network link as reported by `ip -o link show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub index: u32,
    pub name: String,
}

/// Kind of virtual device to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Bridge,
    Macvlan { parent: String },
    Ipvlan { parent: String },
}

/// MAC-48 hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_multicast(&self) -> bool {
        let [first, ..] = self.0;
        first & 0x01 != 0
    }

    pub fn is_locally_administered(&self) -> bool {
        let [first, ..] = self.0;
        first & 0x02 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Generate a random unicast, locally-administered MAC address.
pub fn random_mac() -> MacAddr {
    let [first, rest @ ..]: [u8; 6] = rand::random();
    let [b1, b2, b3, b4, b5] = rest;
    MacAddr([(first & 0xfe) | 0x02, b1, b2, b3, b4, b5])
}

// ---------------------------------------------------------------------------
// LinkOps
// ---------------------------------------------------------------------------

/// Kernel link operations used by the device manager and the namespace
/// configurator.
///
/// Implementations act on the network namespace of the thread polling the
/// returned futures.
#[async_trait]
pub trait LinkOps: Send + Sync {
    /// Enumerate all links, loopback included.
    async fn links(&self) -> Result<Vec<Link>>;
    /// Create a virtual device. Fails with [`NetworkError::AlreadyExists`] if
    /// a link with that name is already present.
    async fn add_link(&self, name: &str, kind: &LinkKind) -> Result<()>;
    async fn set_up(&self, name: &str) -> Result<()>;
    async fn set_hw_address(&self, name: &str, mac: MacAddr) -> Result<()>;
    async fn add_address(&self, name: &str, address: Ipv4Network) -> Result<()>;
    async fn add_default_route(&self, name: &str, gateway: Ipv4Addr) -> Result<()>;
    /// Gateway of the IPv4 default route going out through `name`.
    async fn default_gateway(&self, name: &str) -> Result<Ipv4Addr>;
}

/// [`LinkOps`] backed by the `ip` command.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpRoute;

/// Shorthand: run `ip <args>`, classifying well-known kernel errors.
async fn ip(args: &[&str], subject: &str) -> Result<String> {
    exec("ip", args).await.map_err(|e| classify(e, subject))
}

/// Map `ip` stderr to the error variants callers branch on.
fn classify(err: CommandError, subject: &str) -> NetworkError {
    if err.detail.contains("File exists") {
        NetworkError::AlreadyExists(subject.to_string())
    } else if err.detail.contains("Cannot find device") || err.detail.contains("does not exist")
    {
        NetworkError::LinkNotFound(subject.to_string())
    } else {
        NetworkError::Command(err)
    }
}

fn add_link_args<'a>(name: &'a str, kind: &'a LinkKind) -> Vec<&'a str> {
    let mut args = vec!["link", "add", name];
    match kind {
        LinkKind::Bridge => args.extend(["type", "bridge"]),
        LinkKind::Macvlan { parent } => {
            args.extend(["link", parent.as_str(), "type", "macvlan", "mode", "bridge"]);
        }
        LinkKind::Ipvlan { parent } => {
            args.extend(["link", parent.as_str(), "type", "ipvlan", "mode", "l2"]);
        }
    }
    args
}

/// Parse `ip -o link show` output.
///
/// Lines look like `5: mv-photon@if2: <BROADCAST,...> mtu 1500 ...`; the
/// `@peer` suffix is not part of the link name.
fn parse_link_list(output: &str) -> Vec<Link> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, ": ");
            let index = fields.next()?.trim().parse().ok()?;
            let name = fields.next()?.split('@').next()?.trim();
            if name.is_empty() {
                return None;
            }
            Some(Link {
                index,
                name: name.to_string(),
            })
        })
        .collect()
}

/// Extract the gateway from `ip -4 route show default` output.
fn parse_default_gateway(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .filter(|line| line.starts_with("default"))
        .find_map(|line| {
            line.split_whitespace()
                .skip_while(|&w| w != "via")
                .nth(1)
                .and_then(|gw| gw.parse().ok())
        })
}

#[async_trait]
impl LinkOps for IpRoute {
    async fn links(&self) -> Result<Vec<Link>> {
        let output = ip(&["-o", "link", "show"], "links").await?;
        Ok(parse_link_list(&output))
    }

    async fn add_link(&self, name: &str, kind: &LinkKind) -> Result<()> {
        ip(&add_link_args(name, kind), name).await?;
        Ok(())
    }

    async fn set_up(&self, name: &str) -> Result<()> {
        ip(&["link", "set", "dev", name, "up"], name).await?;
        Ok(())
    }

    async fn set_hw_address(&self, name: &str, mac: MacAddr) -> Result<()> {
        let mac = mac.to_string();
        ip(&["link", "set", "dev", name, "address", &mac], name).await?;
        Ok(())
    }

    async fn add_address(&self, name: &str, address: Ipv4Network) -> Result<()> {
        let address = address.to_string();
        ip(&["-4", "addr", "add", &address, "dev", name], &address).await?;
        Ok(())
    }

    async fn add_default_route(&self, name: &str, gateway: Ipv4Addr) -> Result<()> {
        let gateway = gateway.to_string();
        ip(
            &["-4", "route", "add", "default", "via", &gateway, "dev", name],
            "default route",
        )
        .await?;
        Ok(())
    }

    async fn default_gateway(&self, name: &str) -> Result<Ipv4Addr> {
        let output = ip(&["-4", "route", "show", "default", "dev", name], name).await?;
        parse_default_gateway(&output).ok_or_else(|| NetworkError::NoGateway(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Device manager
// ---------------------------------------------------------------------------

/// Create a bridge. An existing link with the same name counts as success.
pub async fn create_bridge(ops: &dyn LinkOps, name: &str) -> Result<()> {
    create_device(ops, name, &LinkKind::Bridge).await
}

/// Create a macvlan (bridge mode) on top of `parent`. Idempotent.
pub async fn create_macvlan(ops: &dyn LinkOps, name: &str, parent: &str) -> Result<()> {
    let kind = LinkKind::Macvlan {
        parent: parent.to_string(),
    };
    create_device(ops, name, &kind).await
}

/// Create an ipvlan (L2 mode) on top of `parent`. Idempotent.
pub async fn create_ipvlan(ops: &dyn LinkOps, name: &str, parent: &str) -> Result<()> {
    let kind = LinkKind::Ipvlan {
        parent: parent.to_string(),
    };
    create_device(ops, name, &kind).await
}

async fn create_device(ops: &dyn LinkOps, name: &str, kind: &LinkKind) -> Result<()> {
    match ops.add_link(name, kind).await {
        Ok(()) => {
            info!(device = %name, ?kind, "device created");
            Ok(())
        }
        Err(NetworkError::AlreadyExists(_)) => {
            debug!(device = %name, "device already exists");
            Ok(())
        }
        Err(e) => Err(NetworkError::DeviceCreationFailed {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Bring a link administratively up.
pub async fn set_link_up(ops: &dyn LinkOps, name: &str) -> Result<()> {
    ops.set_up(name).await
}

// ---------------------------------------------------------------------------
// LinkTable
// ---------------------------------------------------------------------------

/// Snapshot of host links (name ↔ index), loopback excluded.
///
/// Populated once; call [`LinkTable::acquire`] again to refresh.
#[derive(Debug, Default, Clone)]
pub struct LinkTable {
    by_name: BTreeMap<String, u32>,
    by_index: BTreeMap<u32, String>,
}

impl LinkTable {
    pub async fn acquire(ops: &dyn LinkOps) -> Result<Self> {
        let table = Self::from_links(ops.links().await?);
        debug!(count = table.len(), "acquired link table");
        Ok(table)
    }

    pub fn from_links(links: impl IntoIterator<Item = Link>) -> Self {
        let mut table = Self::default();
        for link in links.into_iter().filter(|l| l.name != LOOPBACK) {
            table.by_index.insert(link.index, link.name.clone());
            table.by_name.insert(link.name, link.index);
        }
        table
    }

    pub fn index(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, index: u32) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// In-memory kernel: one map of links, "File exists" on duplicates.
    #[derive(Default)]
    struct FakeKernel {
        links: Mutex<Vec<(String, LinkKind)>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl LinkOps for FakeKernel {
        async fn links(&self) -> Result<Vec<Link>> {
            let links = self.links.lock().unwrap();
            Ok(links
                .iter()
                .enumerate()
                .map(|(i, (name, _))| Link {
                    index: i as u32 + 1,
                    name: name.clone(),
                })
                .collect())
        }

        async fn add_link(&self, name: &str, kind: &LinkKind) -> Result<()> {
            if let Some(detail) = &self.fail_with {
                return Err(classify(
                    CommandError {
                        command: format!("ip link add {name}"),
                        detail: detail.clone(),
                    },
                    name,
                ));
            }
            let mut links = self.links.lock().unwrap();
            if links.iter().any(|(n, _)| n == name) {
                return Err(NetworkError::AlreadyExists(name.to_string()));
            }
            links.push((name.to_string(), kind.clone()));
            Ok(())
        }

        async fn set_up(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn set_hw_address(&self, _name: &str, _mac: MacAddr) -> Result<()> {
            Ok(())
        }

        async fn add_address(&self, _name: &str, _address: Ipv4Network) -> Result<()> {
            Ok(())
        }

        async fn add_default_route(&self, _name: &str, _gateway: Ipv4Addr) -> Result<()> {
            Ok(())
        }

        async fn default_gateway(&self, name: &str) -> Result<Ipv4Addr> {
            Err(NetworkError::NoGateway(name.to_string()))
        }
    }

    #[tokio::test]
    async fn create_bridge_twice_yields_one_device() {
        let kernel = FakeKernel::default();
        create_bridge(&kernel, "photon").await.unwrap();
        create_bridge(&kernel, "photon").await.unwrap();

        let links = kernel.links.lock().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0], ("photon".to_string(), LinkKind::Bridge));
    }

    #[tokio::test]
    async fn create_macvlan_is_idempotent() {
        let kernel = FakeKernel::default();
        create_macvlan(&kernel, "photon", "eth0").await.unwrap();
        create_macvlan(&kernel, "photon", "eth0").await.unwrap();

        let links = kernel.links.lock().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].1,
            LinkKind::Macvlan {
                parent: "eth0".into()
            }
        );
    }

    #[tokio::test]
    async fn create_device_propagates_other_errors() {
        let kernel = FakeKernel {
            fail_with: Some("RTNETLINK answers: Operation not permitted".into()),
            ..Default::default()
        };
        let err = create_ipvlan(&kernel, "photon", "eth0").await.unwrap_err();
        match err {
            NetworkError::DeviceCreationFailed { name, reason } => {
                assert_eq!(name, "photon");
                assert!(reason.contains("Operation not permitted"), "reason: {reason}");
            }
            other => panic!("expected DeviceCreationFailed, got: {other}"),
        }
    }

    #[tokio::test]
    async fn create_device_absorbs_kernel_file_exists() {
        let kernel = FakeKernel {
            fail_with: Some("RTNETLINK answers: File exists".into()),
            ..Default::default()
        };
        create_bridge(&kernel, "photon").await.unwrap();
    }

    #[tokio::test]
    async fn acquire_skips_loopback() {
        let kernel = FakeKernel::default();
        kernel.add_link("lo", &LinkKind::Bridge).await.unwrap();
        kernel.add_link("eth0", &LinkKind::Bridge).await.unwrap();

        let table = LinkTable::acquire(&kernel).await.unwrap();
        assert_eq!(table.len(), 1);
        assert!(!table.contains("lo"));
        assert_eq!(table.index("eth0"), Some(2));
        assert_eq!(table.name(2), Some("eth0"));
        assert_eq!(table.name(1), None);
    }

    #[test]
    fn parse_link_list_reads_index_and_name() {
        let output = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP
7: mv-photon@if2: <BROADCAST,MULTICAST> mtu 1500 qdisc noop state DOWN";
        let links = parse_link_list(output);
        assert_eq!(
            links,
            vec![
                Link {
                    index: 1,
                    name: "lo".into()
                },
                Link {
                    index: 2,
                    name: "eth0".into()
                },
                Link {
                    index: 7,
                    name: "mv-photon".into()
                },
            ]
        );
    }

    #[test]
    fn parse_link_list_skips_malformed_lines() {
        let links = parse_link_list("garbage\n\n3: br0: <UP> mtu 1500");
        assert_eq!(
            links,
            vec![Link {
                index: 3,
                name: "br0".into()
            }]
        );
    }

    #[test]
    fn parse_default_gateway_finds_via() {
        let output = "default via 172.16.85.1 proto dhcp src 172.16.85.10 metric 100";
        assert_eq!(
            parse_default_gateway(output),
            Some(Ipv4Addr::new(172, 16, 85, 1))
        );
    }

    #[test]
    fn parse_default_gateway_none_without_route() {
        assert_eq!(parse_default_gateway(""), None);
        assert_eq!(parse_default_gateway("default dev wg0 scope link"), None);
    }

    #[test]
    fn add_link_args_per_kind() {
        assert_eq!(
            add_link_args("photon", &LinkKind::Bridge),
            ["link", "add", "photon", "type", "bridge"]
        );
        let macvlan = LinkKind::Macvlan {
            parent: "eth0".into(),
        };
        assert_eq!(
            add_link_args("photon", &macvlan),
            ["link", "add", "photon", "link", "eth0", "type", "macvlan", "mode", "bridge"]
        );
        let ipvlan = LinkKind::Ipvlan {
            parent: "eth1".into(),
        };
        assert_eq!(
            add_link_args("photon", &ipvlan),
            ["link", "add", "photon", "link", "eth1", "type", "ipvlan", "mode", "l2"]
        );
    }

    #[test]
    fn classify_maps_kernel_messages() {
        let err = |detail: &str| CommandError {
            command: "ip".into(),
            detail: detail.into(),
        };
        assert!(matches!(
            classify(err("RTNETLINK answers: File exists"), "photon"),
            NetworkError::AlreadyExists(_)
        ));
        assert!(matches!(
            classify(err("Cannot find device \"host0\""), "host0"),
            NetworkError::LinkNotFound(_)
        ));
        assert!(matches!(
            classify(err("RTNETLINK answers: Permission denied"), "x"),
            NetworkError::Command(_)
        ));
    }

    #[test]
    fn random_mac_is_unicast_and_locally_administered() {
        for _ in 0..1000 {
            let mac = random_mac();
            assert!(!mac.is_multicast(), "{mac} is multicast");
            assert!(mac.is_locally_administered(), "{mac} is not local");
        }
    }

    #[test]
    fn mac_display_is_colon_separated_hex() {
        let mac = MacAddr([0x02, 0x00, 0xab, 0x0c, 0xff, 0x01]);
        assert_eq!(mac.to_string(), "02:00:ab:0c:ff:01");
    }
}
