//! Reconciles the set of running machines against the machined state
//! directory.
//!
//! Every running machine has one entry in `/run/systemd/machines`. Entry
//! creation triggers a diff against the tracked set and configures only the
//! newcomers; entry removal drops the machines whose entry is gone. Only
//! the creation path ever adds to the set.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::network::{MachineConfigurator, NetworkError, Result};

/// Capacity of the watch channel between the inotify thread and the loop.
const EVENT_BUFFER: usize = 64;

/// Pause after a failed inotify read before trying again.
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Change observed in the state directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// An entry appeared (or events were lost and a rescan is needed).
    Created,
    Removed,
}

// ---------------------------------------------------------------------------
// Directory listing
// ---------------------------------------------------------------------------

fn is_machine_entry(name: &str) -> bool {
    !name.starts_with('.') && !name.ends_with("scope")
}

/// Names of the machines currently registered in `dir`.
///
/// Hidden entries, `*.scope` unit links and subdirectories are skipped.
pub async fn list_machines(dir: &Path) -> Result<BTreeSet<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut machines = BTreeSet::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && is_machine_entry(name)
        {
            machines.insert(name.to_string());
        }
    }
    Ok(machines)
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

pub struct MachineWatcher {
    state_dir: PathBuf,
    machines: BTreeSet<String>,
    configurator: Arc<dyn MachineConfigurator>,
}

impl MachineWatcher {
    pub fn new(state_dir: impl Into<PathBuf>, configurator: Arc<dyn MachineConfigurator>) -> Self {
        Self {
            state_dir: state_dir.into(),
            machines: BTreeSet::new(),
            configurator,
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Machines currently tracked.
    pub fn machines(&self) -> &BTreeSet<String> {
        &self.machines
    }

    /// Track the machines already present without configuring them.
    pub async fn seed(&mut self) -> Result<()> {
        self.machines = list_machines(&self.state_dir).await?;
        info!(count = self.machines.len(), "tracking existing machines");
        Ok(())
    }

    /// Configure every listed machine that is not tracked yet.
    ///
    /// Configurations run concurrently. A failure is logged and isolated to
    /// its machine, which stays tracked and is not retried. Returns the
    /// names that were dispatched; replaying the same event dispatches none.
    pub async fn reconcile(&mut self) -> Result<Vec<String>> {
        let current = list_machines(&self.state_dir).await?;
        let added: Vec<String> = current.difference(&self.machines).cloned().collect();

        let mut tasks = JoinSet::new();
        for name in &added {
            let configurator = Arc::clone(&self.configurator);
            let name = name.clone();
            tasks.spawn(async move {
                let result = configurator.configure_machine(&name).await;
                (name, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(machine = %name, "machine configured"),
                Ok((name, Err(e))) => {
                    warn!(machine = %name, error = %e, "skipping machine");
                }
                Err(e) => error!(error = %e, "configuration task failed"),
            }
        }

        self.machines = current;
        Ok(added)
    }

    /// Forget tracked machines whose entry has disappeared.
    ///
    /// Entries that appeared since the last reconcile are left for
    /// [`reconcile`](Self::reconcile), which configures them.
    pub async fn resync(&mut self) -> Result<()> {
        let current = list_machines(&self.state_dir).await?;
        self.machines.retain(|machine| {
            let present = current.contains(machine);
            if !present {
                info!(machine = %machine, "machine removed");
            }
            present
        });
        Ok(())
    }

    pub async fn handle(&mut self, event: WatchEvent) -> Result<()> {
        match event {
            WatchEvent::Created => self.reconcile().await.map(|_| ()),
            WatchEvent::Removed => self.resync().await,
        }
    }

    /// Consume watch events until `shutdown` resolves or the channel closes.
    ///
    /// Errors, from the event source or from handling an event, are logged
    /// and never stop the loop. Returns the final tracked set.
    pub async fn run<F>(
        mut self,
        mut events: mpsc::Receiver<Result<WatchEvent>>,
        shutdown: F,
    ) -> BTreeSet<String>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("machine watcher shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(Ok(event)) => {
                        debug!(?event, "state directory changed");
                        if let Err(e) = self.handle(event).await {
                            warn!(error = %e, ?event, "failed to handle watch event");
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "watch error"),
                    None => {
                        warn!("watch channel closed");
                        break;
                    }
                },
            }
        }
        self.machines
    }
}

// ---------------------------------------------------------------------------
// inotify source
// ---------------------------------------------------------------------------

/// Map an inotify event to a watch event.
///
/// machined writes entries to a hidden temporary file and renames it into
/// place, so events naming hidden entries are dropped.
fn event_for(mask: AddWatchFlags, name: Option<&OsStr>) -> Option<WatchEvent> {
    if name.is_some_and(|n| n.to_string_lossy().starts_with('.')) {
        return None;
    }
    if mask.intersects(
        AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO | AddWatchFlags::IN_Q_OVERFLOW,
    ) {
        Some(WatchEvent::Created)
    } else if mask.intersects(AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM) {
        Some(WatchEvent::Removed)
    } else {
        None
    }
}

/// Watch `dir` for entry creation and removal.
///
/// inotify reads block, so they run on a dedicated thread that forwards
/// events into the returned channel. The thread exits once the receiver is
/// dropped and the next event arrives.
pub fn watch(dir: &Path) -> Result<mpsc::Receiver<Result<WatchEvent>>> {
    let inotify = Inotify::init(InitFlags::IN_CLOEXEC)
        .map_err(|e| NetworkError::Watch(format!("inotify init: {e}")))?;
    inotify
        .add_watch(
            dir,
            AddWatchFlags::IN_CREATE
                | AddWatchFlags::IN_MOVED_TO
                | AddWatchFlags::IN_DELETE
                | AddWatchFlags::IN_MOVED_FROM,
        )
        .map_err(|e| NetworkError::Watch(format!("watch {}: {e}", dir.display())))?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    std::thread::Builder::new()
        .name("machine-watch".to_string())
        .spawn(move || forward_events(&inotify, &tx))?;
    info!(dir = %dir.display(), "watching machine state directory");
    Ok(rx)
}

fn forward_events(inotify: &Inotify, tx: &mpsc::Sender<Result<WatchEvent>>) {
    loop {
        let batch: Vec<Result<WatchEvent>> = match inotify.read_events() {
            Ok(events) => events
                .into_iter()
                .filter_map(|e| event_for(e.mask, e.name.as_deref()))
                .map(Ok)
                .collect(),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                std::thread::sleep(READ_RETRY_DELAY);
                vec![Err(NetworkError::Watch(format!("read events: {e}")))]
            }
        };
        for item in batch {
            if tx.blocking_send(item).is_err() {
                debug!("watch receiver dropped");
                return;
            }
        }
    }
}
