//! Per-machine network configuration inside the container's namespace.
//!
//! Namespace membership belongs to an OS thread, not to a task. Each
//! configuration therefore runs on its own short-lived thread: the thread
//! enters the leader's namespace, drives the link operations to completion
//! with [`Handle::block_on`] (so every `ip` child is forked from inside the
//! namespace), restores the original namespace and reports back over a
//! oneshot channel. No other task ever observes the foreign namespace.

use std::sync::Arc;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::machined::{MachineRecord, MachineRegistry};

use super::error::{NetworkError, Result};
use super::host::HostNetwork;
use super::link::{LinkOps, random_mac};
use super::netns::NamespaceSwitch;

/// Configures the network of a single running machine.
///
/// The watcher only depends on this trait so tests can inject a recorder.
#[async_trait]
pub trait MachineConfigurator: Send + Sync {
    async fn configure_machine(&self, machine: &str) -> Result<()>;
}

/// [`MachineConfigurator`] that programs the container interface from inside
/// the leader's network namespace.
pub struct NetnsConfigurator {
    host: Arc<HostNetwork>,
    registry: Arc<dyn MachineRegistry>,
    netns: Arc<dyn NamespaceSwitch>,
    ops: Arc<dyn LinkOps>,
}

impl NetnsConfigurator {
    pub fn new(
        host: Arc<HostNetwork>,
        registry: Arc<dyn MachineRegistry>,
        netns: Arc<dyn NamespaceSwitch>,
        ops: Arc<dyn LinkOps>,
    ) -> Self {
        Self {
            host,
            registry,
            netns,
            ops,
        }
    }
}

#[async_trait]
impl MachineConfigurator for NetnsConfigurator {
    async fn configure_machine(&self, machine: &str) -> Result<()> {
        let record = self.registry.record(machine).await?;
        debug!(machine = %record.name, leader = record.leader, "resolved machine leader");

        let job = NamespaceJob {
            record,
            host: Arc::clone(&self.host),
            netns: Arc::clone(&self.netns),
            ops: Arc::clone(&self.ops),
        };
        let runtime = Handle::current();
        let (tx, rx) = oneshot::channel();

        std::thread::Builder::new()
            .name(format!("netns-{machine}"))
            .spawn(move || {
                let _ = tx.send(job.run(&runtime));
            })?;

        let result = rx.await.map_err(|_| {
            NetworkError::NamespaceSwitchFailed(format!(
                "configuration thread for {machine} exited without a result"
            ))
        })?;

        match &result {
            Ok(lease) => {
                info!(machine = %machine, address = %lease, "machine network configured")
            }
            Err(e) => {
                error!(machine = %machine, error = %e, "machine network configuration failed")
            }
        }
        result.map(|_| ())
    }
}

/// Work executed on the dedicated namespace thread.
struct NamespaceJob {
    record: MachineRecord,
    host: Arc<HostNetwork>,
    netns: Arc<dyn NamespaceSwitch>,
    ops: Arc<dyn LinkOps>,
}

impl NamespaceJob {
    fn run(self, runtime: &Handle) -> Result<Ipv4Network> {
        let guard = self.netns.enter(self.record.leader)?;
        let provisioned = runtime.block_on(self.provision());
        let restored = guard.restore();

        if let Err(e) = &restored {
            error!(machine = %self.record.name, error = %e, "failed to leave machine namespace");
        }
        let lease = provisioned?;
        restored?;
        Ok(lease)
    }

    async fn provision(&self) -> Result<Ipv4Network> {
        let link = self.host.container_link();

        let links = self.ops.links().await?;
        if !links.iter().any(|l| l.name == link) {
            return Err(NetworkError::LinkNotFound(link));
        }

        let mac = random_mac();
        self.ops.set_hw_address(&link, mac).await?;
        self.ops.set_up(&link).await?;
        debug!(machine = %self.record.name, link = %link, mac = %mac, "container link up");

        let lease = self.host.allocate()?;
        tolerate_existing(self.ops.add_address(&link, lease).await)?;
        tolerate_existing(
            self.ops
                .add_default_route(&link, self.host.gateway())
                .await,
        )?;

        Ok(lease)
    }
}

/// A re-run against a machine that already has the address or route is fine.
fn tolerate_existing(result: Result<()>) -> Result<()> {
    match result {
        Err(NetworkError::AlreadyExists(what)) => {
            debug!(what = %what, "already configured");
            Ok(())
        }
        other => other,
    }
}
