use cntr_net::{MachineAction, Machinectl};
use cntr_spawn::validate_name;

use crate::error::CliResult;

/// Print the machines registered with machined.
pub async fn run_list() -> CliResult<()> {
    let machines = Machinectl.list().await?;
    if machines.is_empty() {
        println!("no running machines");
    }
    for machine in &machines {
        println!("{machine}");
    }
    Ok(())
}

pub async fn run_machine(action: MachineAction, name: &str) -> CliResult<()> {
    validate_name(name)?;
    Machinectl.control(action, name).await?;
    println!("{action} {name}");
    Ok(())
}
