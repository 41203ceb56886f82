//! Launching Photon OS containers under systemd: the `systemd-nspawn`
//! invocation, the generated service and network units, and lifecycle
//! requests to the service manager.

mod error;
mod nspawn;
mod unit;

pub use error::{LaunchError, UnitError, UnitResult};
pub use nspawn::{CAPABILITIES, LaunchSpec, NSPAWN};
pub use unit::{
    CONTROL_PLANE_TIMEOUT, ControlPlane, DEFAULT_STORAGE_DIR, DEFAULT_UNIT_DIR, Section,
    SystemdBus, UnitCommand, UnitDescriptor, UnitFiles, UnitManager, network_file_name,
    network_unit, normalize_unit_name, service_file_name, service_unit, validate_name,
};
