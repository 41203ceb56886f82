use std::path::Path;
use std::sync::Arc;

use cntr_net::{
    HostNetwork, IPV4_FORWARD, IpRoute, LinkOps, MACHINES_STATE_DIR, MachineWatcher, Machinectl,
    NetnsConfigurator, ProcNetns, check_prerequisites, watch,
};
use tracing::info;

use crate::config::DaemonConfig;
use crate::error::CliResult;

/// Bring up host networking, then configure machines as they start until
/// SIGINT/SIGTERM.
pub async fn run_daemon(config: &DaemonConfig) -> CliResult<()> {
    check_prerequisites()?;

    let settings = config.network.settings()?;
    let ops: Arc<dyn LinkOps> = Arc::new(IpRoute);
    let host = HostNetwork::setup(&settings, ops.as_ref(), Path::new(IPV4_FORWARD)).await?;

    let configurator = Arc::new(NetnsConfigurator::new(
        Arc::new(host),
        Arc::new(Machinectl),
        Arc::new(ProcNetns),
        ops,
    ));

    let state_dir = Path::new(MACHINES_STATE_DIR);
    // Subscribe before the first listing so no machine falls in between.
    let events = watch(state_dir)?;
    let mut watcher = MachineWatcher::new(state_dir, configurator);
    if config.configure_existing {
        let configured = watcher.reconcile().await?;
        info!(count = configured.len(), "configured running machines");
    } else {
        watcher.seed().await?;
    }

    let machines = watcher.run(events, shutdown_signal()).await;
    info!(tracked = machines.len(), "daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();

    tokio::select! {
        _ = recv_signal(&mut sigterm) => {
            info!("received SIGTERM, shutting down");
        }
        _ = recv_signal(&mut sigint) => {
            info!("received SIGINT, shutting down");
        }
    }
}

/// Await a signal if registered, or pend forever if registration failed.
async fn recv_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
