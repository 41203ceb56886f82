mod registry;
mod watcher;

pub use registry::{
    MachineAction, MachineRecord, MachineRegistry, MachineSummary, Machinectl,
    UnknownMachineAction, parse_leader, parse_list,
};
pub use watcher::{MachineWatcher, WatchEvent, list_machines, watch};
