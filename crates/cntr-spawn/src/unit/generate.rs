use std::path::Path;

use cntr_net::{GUEST_VETH, NetworkKind};

use super::descriptor::{Section, UnitDescriptor};
use crate::nspawn::LaunchSpec;

/// Kernel modules nspawn may need; loaded before the container starts.
const MODPROBE_UNITS: &str = "modprobe@tun.service modprobe@loop.service modprobe@dm-mod.service";

/// nspawn exit status asking for a restart (container rebooted).
const REBOOT_STATUS: &str = "133";

/// Device nodes the runtime needs inside the `closed` device policy: tun for
/// networking, loop devices for `--image=`, device-mapper for LUKS images.
const DEVICE_ALLOW: [&str; 7] = [
    "/dev/net/tun rwm",
    "char-pts rw",
    "/dev/loop-control rw",
    "block-loop rw",
    "block-blkext rw",
    "/dev/mapper/control rw",
    "block-device-mapper rw",
];

pub fn service_file_name(name: &str) -> String {
    format!("{name}.service")
}

pub fn network_file_name(name: &str) -> String {
    format!("10-{name}.network")
}

/// Arguments after `<program>` on the `ExecStart=` line.
fn boot_args(name: &str, config: Option<&Path>, spec: &LaunchSpec) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(config) = config {
        args.extend(["-c".to_string(), config.display().to_string()]);
    }
    args.push("boot".to_string());
    if spec.ephemeral() {
        args.push("--ephemeral".to_string());
    }
    if let Some(machine) = spec.machine() {
        args.extend(["--machine".to_string(), machine.to_string()]);
    }
    if let Some(link) = spec.link() {
        args.extend([
            "--network".to_string(),
            spec.network().to_string(),
            "--link".to_string(),
            link.to_string(),
        ]);
    }
    args.push(name.to_string());
    args
}

/// Service unit that boots container `name` through `program boot`,
/// reading `config` when given.
pub fn service_unit(
    name: &str,
    program: &Path,
    config: Option<&Path>,
    spec: &LaunchSpec,
) -> UnitDescriptor {
    let exec_start = std::iter::once(program.display().to_string())
        .chain(boot_args(name, config, spec))
        .collect::<Vec<_>>()
        .join(" ");

    let unit = Section::new("Unit")
        .entry("Description", format!("Photon OS container {name}"))
        .entry("Documentation", "man:systemd-nspawn(1)")
        .entry("Wants", MODPROBE_UNITS)
        .entry("PartOf", "machines.target")
        .entry("Before", "machines.target")
        .entry(
            "After",
            format!("network.target systemd-resolved.service {MODPROBE_UNITS}"),
        );

    let mut service = Section::new("Service")
        .entry("ExecStart", exec_start)
        .entry("KillMode", "mixed")
        .entry("Type", "notify")
        .entry("Restart", "on-failure")
        .entry("RestartForceExitStatus", REBOOT_STATUS)
        .entry("SuccessExitStatus", REBOOT_STATUS)
        .entry("Slice", "machine.slice")
        .entry("Delegate", "yes")
        .entry("TasksMax", "16384")
        .entry("DevicePolicy", "closed");
    for device in DEVICE_ALLOW {
        service = service.entry("DeviceAllow", device);
    }

    let install = Section::new("Install").entry("WantedBy", "machines.target");

    UnitDescriptor::new(service_file_name(name))
        .section(unit)
        .section(service)
        .section(install)
}

/// systemd-networkd unit placed inside the container, enabling DHCP on the
/// interface nspawn creates. `None` for host networking.
pub fn network_unit(name: &str, spec: &LaunchSpec) -> Option<UnitDescriptor> {
    let link = spec.link()?;
    let pattern = match spec.network() {
        NetworkKind::None => return None,
        NetworkKind::Macvlan => "mv-*".to_string(),
        NetworkKind::Ipvlan => "iv-*".to_string(),
        NetworkKind::Bridge => GUEST_VETH.to_string(),
        NetworkKind::Interface => link.to_string(),
    };

    Some(
        UnitDescriptor::new(network_file_name(name))
            .section(Section::new("Match").entry("Name", pattern))
            .section(Section::new("Network").entry("DHCP", "yes")),
    )
}
