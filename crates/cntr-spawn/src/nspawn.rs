//! Declarative `systemd-nspawn` invocation.
//!
//! [`LaunchSpec::build`] is the only validation path; [`LaunchSpec::argv`]
//! is the only rendering path. Both are pure.

use std::path::{Path, PathBuf};
use std::process::Command;

use cntr_net::NetworkKind;

use crate::error::LaunchError;

pub const NSPAWN: &str = "/usr/bin/systemd-nspawn";

/// Capabilities granted to every container on top of nspawn's defaults.
pub const CAPABILITIES: &str = "--capability=CAP_SYS_ADMIN,CAP_NET_ADMIN,CAP_MKNOD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    root: PathBuf,
    machine: Option<String>,
    network: NetworkKind,
    link: Option<String>,
    ephemeral: bool,
    boot: bool,
}

impl LaunchSpec {
    /// Validate a launch request.
    ///
    /// `machine`, `network` and `link` are optional; an empty string means
    /// unset. `network` and `link` must be given together.
    pub fn build(
        root: impl Into<PathBuf>,
        machine: &str,
        network: &str,
        link: &str,
        ephemeral: bool,
    ) -> Result<Self, LaunchError> {
        let network = network.trim();
        let link = link.trim();
        let machine = machine.trim();

        match (network.is_empty(), link.is_empty()) {
            (false, true) => {
                return Err(LaunchError::InvalidNetworkSpec(format!(
                    "network {network:?} is specified but link is missing"
                )));
            }
            (true, false) => {
                return Err(LaunchError::InvalidNetworkSpec(format!(
                    "link {link:?} is specified but network is missing"
                )));
            }
            _ => {}
        }

        let kind: NetworkKind = network
            .parse()
            .map_err(|e: cntr_net::UnknownNetworkKind| LaunchError::InvalidNetworkSpec(e.to_string()))?;
        if kind == NetworkKind::None && !link.is_empty() {
            return Err(LaunchError::InvalidNetworkSpec(format!(
                "network none does not take a link (got {link:?})"
            )));
        }

        Ok(Self {
            root: root.into(),
            machine: (!machine.is_empty()).then(|| machine.to_string()),
            network: kind,
            link: (!link.is_empty()).then(|| link.to_string()),
            ephemeral,
            boot: false,
        })
    }

    /// Run the container's init system instead of a shell.
    pub fn with_boot(mut self, boot: bool) -> Self {
        self.boot = boot;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn machine(&self) -> Option<&str> {
        self.machine.as_deref()
    }

    pub fn network(&self) -> NetworkKind {
        self.network
    }

    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub fn ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn boot(&self) -> bool {
        self.boot
    }

    /// Arguments for `systemd-nspawn`.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![CAPABILITIES.to_string()];
        if self.ephemeral {
            argv.push("-x".to_string());
        }
        if self.boot {
            argv.push("-b".to_string());
        }
        argv.push("-D".to_string());
        argv.push(self.root.display().to_string());
        if let Some(machine) = &self.machine {
            argv.push("-M".to_string());
            argv.push(machine.clone());
        }
        if let Some(flag) = self.network_flag() {
            argv.push(flag);
        }
        argv
    }

    fn network_flag(&self) -> Option<String> {
        let link = self.link.as_deref()?;
        let option = match self.network {
            NetworkKind::None => return None,
            NetworkKind::Macvlan => "--network-macvlan",
            NetworkKind::Ipvlan => "--network-ipvlan",
            NetworkKind::Bridge => "--network-bridge",
            NetworkKind::Interface => "--network-interface",
        };
        Some(format!("{option}={link}"))
    }

    /// The complete runtime invocation.
    pub fn command(&self) -> Command {
        let mut command = Command::new(NSPAWN);
        command.args(self.argv());
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(network: &str, link: &str) -> Result<LaunchSpec, LaunchError> {
        LaunchSpec::build("/var/lib/machines/web1", "", network, link, false)
    }

    #[test]
    fn network_and_link_must_be_given_together() {
        let kinds = ["", "macvlan", "ipvlan", "bridge", "interface"];
        let links = ["", "photon"];
        for network in kinds {
            for link in links {
                let result = spec(network, link);
                let paired = network.is_empty() == link.is_empty();
                assert_eq!(
                    result.is_ok(),
                    paired,
                    "network={network:?} link={link:?}: {result:?}"
                );
                if !paired {
                    assert!(matches!(result, Err(LaunchError::InvalidNetworkSpec(_))));
                }
            }
        }
    }

    #[test]
    fn whitespace_only_counts_as_unset() {
        assert!(spec("  ", "").is_ok());
        assert!(spec("macvlan", " ").is_err());
    }

    #[test]
    fn unknown_network_kind_is_rejected() {
        let err = spec("vxlan", "eth0").unwrap_err();
        assert!(err.to_string().contains("vxlan"), "{err}");
    }

    #[test]
    fn none_with_link_is_rejected() {
        assert!(spec("none", "eth0").is_err());
    }

    #[test]
    fn minimal_argv() {
        let spec = spec("", "").unwrap();
        assert_eq!(
            spec.argv(),
            [CAPABILITIES, "-D", "/var/lib/machines/web1"]
        );
        assert_eq!(spec.network(), NetworkKind::None);
        assert_eq!(spec.link(), None);
    }

    #[test]
    fn full_argv_order() {
        let spec = LaunchSpec::build("/var/lib/machines/web1", "web1", "macvlan", "photon", true)
            .unwrap()
            .with_boot(true);
        assert_eq!(
            spec.argv(),
            [
                CAPABILITIES,
                "-x",
                "-b",
                "-D",
                "/var/lib/machines/web1",
                "-M",
                "web1",
                "--network-macvlan=photon",
            ]
        );
    }

    #[test]
    fn network_flag_per_kind() {
        let flag = |network: &str| spec(network, "photon").unwrap().argv().pop().unwrap();
        assert_eq!(flag("macvlan"), "--network-macvlan=photon");
        assert_eq!(flag("ipvlan"), "--network-ipvlan=photon");
        assert_eq!(flag("bridge"), "--network-bridge=photon");
        assert_eq!(flag("interface"), "--network-interface=photon");
    }

    #[test]
    fn build_is_deterministic() {
        let a = LaunchSpec::build("/c", "m", "bridge", "br0", true).unwrap();
        let b = LaunchSpec::build("/c", "m", "bridge", "br0", true).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.argv(), b.argv());
    }

    #[test]
    fn command_targets_nspawn() {
        let spec = spec("bridge", "photon").unwrap();
        let command = spec.command();
        assert_eq!(command.get_program(), NSPAWN);
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, spec.argv());
    }
}
