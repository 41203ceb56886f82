use std::fs::File;
use std::marker::PhantomData;

use nix::sched::{CloneFlags, setns};
use tracing::{debug, error};

use super::error::{NetworkError, Result};

/// Network namespace of the calling thread (not the process).
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

type Restore = Box<dyn FnOnce() -> Result<()> + Send>;

/// Scoped membership of a foreign network namespace.
///
/// Holds the restore point captured before the switch. Dropping the guard
/// moves the thread back, on every exit path. The guard is `!Send`:
/// namespace membership is a per-thread attribute, so it must be released
/// on the thread that acquired it.
#[must_use = "dropping the guard immediately restores the original namespace"]
pub struct NetnsGuard {
    restore: Option<Restore>,
    _thread: PhantomData<*const ()>,
}

impl NetnsGuard {
    pub fn new(restore: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            restore: Some(Box::new(restore)),
            _thread: PhantomData,
        }
    }

    /// Restore the original namespace now, reporting failure to the caller.
    pub fn restore(mut self) -> Result<()> {
        match self.restore.take() {
            Some(restore) => restore(),
            None => Ok(()),
        }
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.take()
            && let Err(e) = restore()
        {
            error!(error = %e, "failed to return to original network namespace");
        }
    }
}

/// Moves the calling thread between network namespaces.
pub trait NamespaceSwitch: Send + Sync {
    /// Enter the network namespace of process `pid`.
    ///
    /// The caller's current namespace is captured before switching and
    /// restored when the returned guard is dropped.
    fn enter(&self, pid: i32) -> Result<NetnsGuard>;
}

/// [`NamespaceSwitch`] using `setns(2)` on `/proc/<pid>/ns/net`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcNetns;

impl NamespaceSwitch for ProcNetns {
    fn enter(&self, pid: i32) -> Result<NetnsGuard> {
        let origin = File::open(THREAD_NETNS).map_err(|e| {
            NetworkError::NamespaceSwitchFailed(format!("open {THREAD_NETNS}: {e}"))
        })?;

        let path = format!("/proc/{pid}/ns/net");
        let target = File::open(&path)
            .map_err(|e| NetworkError::NamespaceSwitchFailed(format!("open {path}: {e}")))?;

        setns(&target, CloneFlags::CLONE_NEWNET)
            .map_err(|e| NetworkError::NamespaceSwitchFailed(format!("setns {path}: {e}")))?;
        debug!(pid, "entered network namespace");

        Ok(NetnsGuard::new(move || {
            setns(&origin, CloneFlags::CLONE_NEWNET).map_err(|e| {
                NetworkError::NamespaceSwitchFailed(format!("restore original namespace: {e}"))
            })?;
            debug!("returned to original network namespace");
            Ok(())
        }))
    }
}
