use std::fmt;
use std::str::FromStr;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
const IFNAME_MAX: usize = 15;

/// Interface name nspawn gives the container end of a veth/bridge link.
pub const GUEST_VETH: &str = "host0";

/// How a container is attached to the host network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkKind {
    /// Host networking, no dedicated interface.
    #[default]
    None,
    Macvlan,
    Ipvlan,
    Bridge,
    /// A host interface moved into the container.
    Interface,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown network kind: {0:?}")]
pub struct UnknownNetworkKind(pub String);

impl FromStr for NetworkKind {
    type Err = UnknownNetworkKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "macvlan" => Ok(Self::Macvlan),
            "ipvlan" => Ok(Self::Ipvlan),
            "bridge" => Ok(Self::Bridge),
            "interface" => Ok(Self::Interface),
            other => Err(UnknownNetworkKind(other.to_string())),
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Macvlan => "macvlan",
            Self::Ipvlan => "ipvlan",
            Self::Bridge => "bridge",
            Self::Interface => "interface",
        })
    }
}

impl NetworkKind {
    /// Name of the interface inside the container when the host side is
    /// `device` (e.g. `mv-photon` for a macvlan on top of `photon`).
    pub fn container_link(&self, device: &str) -> String {
        let prefix = match self {
            Self::Macvlan => "mv-",
            Self::Ipvlan => "iv-",
            Self::None | Self::Bridge | Self::Interface => return GUEST_VETH.to_string(),
        };
        let mut name = format!("{prefix}{device}");
        if name.len() > IFNAME_MAX {
            let mut end = IFNAME_MAX;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }
        name
    }
}
