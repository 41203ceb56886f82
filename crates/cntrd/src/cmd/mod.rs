mod boot;
mod daemon;
mod machine;
mod unit;

pub use boot::{LaunchArgs, run_boot};
pub use daemon::run_daemon;
pub use machine::{run_list, run_machine};
pub use unit::{UnitArgs, run_install, run_uninstall, run_unit};
