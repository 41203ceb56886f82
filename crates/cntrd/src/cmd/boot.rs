use std::os::unix::process::CommandExt;
use std::path::Path;

use clap::Args;
use cntr_spawn::{LaunchSpec, NSPAWN, validate_name};
use tracing::info;

use crate::config::DaemonConfig;
use crate::error::{CliError, CliResult};

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Container name (directory under the storage dir)
    pub name: String,
    /// Run on a throwaway snapshot of the root filesystem
    #[arg(long, short = 'x')]
    pub ephemeral: bool,
    /// Machine name to register instead of the directory name
    #[arg(long, short, default_value = "")]
    pub machine: String,
    /// Network kind (macvlan, ipvlan, bridge, interface)
    #[arg(long, short, default_value = "")]
    pub network: String,
    /// Host link the network attaches to
    #[arg(long, short, default_value = "")]
    pub link: String,
}

impl LaunchArgs {
    /// Validated launch spec for an existing container.
    pub fn spec(&self, storage_dir: &Path) -> CliResult<LaunchSpec> {
        validate_name(&self.name)?;
        let spec = LaunchSpec::build(
            storage_dir.join(&self.name),
            &self.machine,
            &self.network,
            &self.link,
            self.ephemeral,
        )?;
        if !spec.root().is_dir() {
            return Err(CliError::ContainerNotFound(spec.root().to_path_buf()));
        }
        Ok(spec)
    }
}

/// Replace this process with `systemd-nspawn` booting the container.
///
/// Only returns on failure.
pub fn run_boot(args: &LaunchArgs, config: &DaemonConfig) -> CliResult<()> {
    let spec = args.spec(&config.storage_dir)?.with_boot(true);
    info!(container = %args.name, argv = ?spec.argv(), "booting container");
    let source = spec.command().exec();
    Err(CliError::Exec {
        program: NSPAWN.to_string(),
        source,
    })
}
