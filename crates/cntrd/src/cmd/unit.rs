use std::path::Path;
use std::sync::Arc;

use clap::Args;
use cntr_spawn::{SystemdBus, UnitCommand, UnitFiles, UnitManager, validate_name};

use super::boot::LaunchArgs;
use crate::config::DaemonConfig;
use crate::error::CliResult;

#[derive(Args, Debug)]
pub struct UnitArgs {
    /// One of start, stop, restart, try-restart, reload, reload-or-restart,
    /// enable, disable, mask, unmask
    pub command: String,
    /// Container (unit) name; `.service` is appended when missing
    pub name: String,
}

async fn manager(config: &DaemonConfig) -> CliResult<UnitManager> {
    let bus = SystemdBus::connect().await?;
    Ok(UnitManager::new(
        Arc::new(bus),
        UnitFiles::new(&config.unit_dir, &config.storage_dir),
    ))
}

/// Generate the container's service and network units and reload systemd.
///
/// The unit boots with `config_path`, made absolute, so it sees the same
/// storage directory as this invocation.
pub async fn run_install(
    args: &LaunchArgs,
    config_path: &Path,
    config: &DaemonConfig,
) -> CliResult<()> {
    let spec = args.spec(&config.storage_dir)?;
    let program = std::env::current_exe()?;
    let config_path = std::path::absolute(config_path)?;
    let manager = manager(config).await?;
    manager
        .install(&args.name, &program, Some(&config_path), &spec)
        .await?;
    println!(
        "installed {}",
        manager.files().service_path(&args.name).display()
    );
    Ok(())
}

pub async fn run_uninstall(name: &str, config: &DaemonConfig) -> CliResult<()> {
    validate_name(name)?;
    manager(config).await?.uninstall(name).await?;
    println!("removed units of {name}");
    Ok(())
}

/// Apply a lifecycle command. The command is parsed before systemd is
/// contacted.
pub async fn run_unit(args: &UnitArgs, config: &DaemonConfig) -> CliResult<()> {
    let command: UnitCommand = args.command.parse()?;
    let job = manager(config)
        .await?
        .apply_command(command, &args.name)
        .await?;
    println!("{job}");
    Ok(())
}
