mod cmd;
mod config;
mod error;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use cntr_net::MachineAction;
use tracing::{Level, warn};
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "cntrd", version)]
struct Cli {
    /// Path to cntrd.yaml
    #[arg(
        long,
        short,
        global = true,
        env = "CNTRD_CONFIG",
        default_value = config::DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Set up host networking and configure machines as they start
    Daemon,
    /// Boot a container with systemd-nspawn (used by the generated unit)
    Boot(cmd::LaunchArgs),
    /// Write the container's service and network units
    Install(cmd::LaunchArgs),
    /// Remove the container's units
    Uninstall {
        /// Container name
        name: String,
    },
    /// Send a lifecycle command for a container unit to systemd
    Unit(cmd::UnitArgs),
    /// List the machines registered with machined
    List,
    /// Shut a running machine down cleanly
    Poweroff {
        /// Machine name
        name: String,
    },
    /// Reboot a running machine
    Reboot {
        /// Machine name
        name: String,
    },
    /// Kill every process of a running machine
    Terminate {
        /// Machine name
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, missing, load_error) = match config::load(&cli.config).await {
        Ok(Some(config)) => (config, false, None),
        Ok(None) => (config::DaemonConfig::default(), true, None),
        Err(e) => (config::DaemonConfig::default(), false, Some(e)),
    };
    let level = config.level();

    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_max_level(level.as_ref().copied().unwrap_or(Level::INFO))
        .init();

    if let Some(e) = load_error {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    if missing {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }
    if let Err(e) = &level {
        warn!(error = %e, "falling back to log level info");
    }

    if !nix::unistd::geteuid().is_root() {
        eprintln!("error: cntrd must be run as root");
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Command::Daemon => cmd::run_daemon(&config).await,
        Command::Boot(args) => cmd::run_boot(args, &config),
        Command::Install(args) => cmd::run_install(args, &cli.config, &config).await,
        Command::Uninstall { name } => cmd::run_uninstall(name, &config).await,
        Command::Unit(args) => cmd::run_unit(args, &config).await,
        Command::List => cmd::run_list().await,
        Command::Poweroff { name } => cmd::run_machine(MachineAction::Poweroff, name).await,
        Command::Reboot { name } => cmd::run_machine(MachineAction::Reboot, name).await,
        Command::Terminate { name } => cmd::run_machine(MachineAction::Terminate, name).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
