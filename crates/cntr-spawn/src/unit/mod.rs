mod bus;
mod descriptor;
mod files;
mod generate;
mod lifecycle;

pub use bus::SystemdBus;
pub use descriptor::{Section, UnitDescriptor};
pub use files::{DEFAULT_STORAGE_DIR, DEFAULT_UNIT_DIR, UnitFiles, validate_name};
pub use generate::{network_file_name, network_unit, service_file_name, service_unit};
pub use lifecycle::{
    CONTROL_PLANE_TIMEOUT, ControlPlane, UnitCommand, UnitManager, normalize_unit_name,
};
