//! [`ControlPlane`] over the systemd manager's D-Bus API.

use async_trait::async_trait;
use tracing::debug;
use zbus::zvariant::OwnedObjectPath;

use super::lifecycle::{ControlPlane, UnitCommand};
use crate::error::{UnitError, UnitResult};

/// Job mode for start/stop style requests: replace conflicting queued jobs.
const JOB_MODE: &str = "replace";

/// `(type, file, destination)` change entries returned by unit-file calls.
type Changes = Vec<(String, String, String)>;

#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1",
    gen_blocking = false
)]
trait Manager {
    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn try_restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn reload_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn reload_or_restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn enable_unit_files(
        &self,
        files: &[&str],
        runtime: bool,
        force: bool,
    ) -> zbus::Result<(bool, Changes)>;
    fn disable_unit_files(&self, files: &[&str], runtime: bool) -> zbus::Result<Changes>;
    fn mask_unit_files(&self, files: &[&str], runtime: bool, force: bool)
    -> zbus::Result<Changes>;
    fn unmask_unit_files(&self, files: &[&str], runtime: bool) -> zbus::Result<Changes>;

    fn reload(&self) -> zbus::Result<()>;
}

/// Connection to the system service manager.
pub struct SystemdBus {
    manager: ManagerProxy<'static>,
}

impl SystemdBus {
    pub async fn connect() -> UnitResult<Self> {
        let connection = zbus::Connection::system()
            .await
            .map_err(|e| UnitError::Bus(e.to_string()))?;
        let manager = ManagerProxy::new(&connection)
            .await
            .map_err(|e| UnitError::Bus(e.to_string()))?;
        Ok(Self { manager })
    }
}

fn rejected(e: zbus::Error) -> UnitError {
    match e {
        zbus::Error::MethodError(name, Some(message), _) => {
            UnitError::ControlPlaneRejected(format!("{name}: {message}"))
        }
        other => UnitError::ControlPlaneRejected(other.to_string()),
    }
}

fn job_path(reply: zbus::Result<OwnedObjectPath>) -> zbus::Result<String> {
    reply.map(|job| job.as_str().to_string())
}

fn describe_changes(changes: &Changes) -> String {
    if changes.is_empty() {
        return "no changes".to_string();
    }
    changes
        .iter()
        .map(|(kind, file, destination)| {
            if destination.is_empty() {
                format!("{kind} {file}")
            } else {
                format!("{kind} {file} -> {destination}")
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl ControlPlane for SystemdBus {
    async fn submit(&self, command: UnitCommand, unit: &str) -> UnitResult<String> {
        debug!(command = %command, unit = %unit, "submitting to systemd");
        let m = &self.manager;
        let files = [unit];
        let summary = match command {
            UnitCommand::Start => job_path(m.start_unit(unit, JOB_MODE).await),
            UnitCommand::Stop => job_path(m.stop_unit(unit, JOB_MODE).await),
            UnitCommand::Restart => job_path(m.restart_unit(unit, JOB_MODE).await),
            UnitCommand::TryRestart => job_path(m.try_restart_unit(unit, JOB_MODE).await),
            UnitCommand::Reload => job_path(m.reload_unit(unit, JOB_MODE).await),
            UnitCommand::ReloadOrRestart => {
                job_path(m.reload_or_restart_unit(unit, JOB_MODE).await)
            }
            UnitCommand::Enable => m
                .enable_unit_files(&files, false, false)
                .await
                .map(|(_, changes)| describe_changes(&changes)),
            UnitCommand::Disable => m
                .disable_unit_files(&files, false)
                .await
                .map(|changes| describe_changes(&changes)),
            UnitCommand::Mask => m
                .mask_unit_files(&files, false, false)
                .await
                .map(|changes| describe_changes(&changes)),
            UnitCommand::Unmask => m
                .unmask_unit_files(&files, false)
                .await
                .map(|changes| describe_changes(&changes)),
        };
        summary.map_err(rejected)
    }

    async fn reload(&self) -> UnitResult<()> {
        self.manager.reload().await.map_err(rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_changes_lists_symlinks() {
        let changes = vec![(
            "symlink".to_string(),
            "/etc/systemd/system/machines.target.wants/web1.service".to_string(),
            "/etc/systemd/system/web1.service".to_string(),
        )];
        assert_eq!(
            describe_changes(&changes),
            "symlink /etc/systemd/system/machines.target.wants/web1.service -> /etc/systemd/system/web1.service"
        );
    }

    #[test]
    fn describe_changes_without_destination() {
        let changes = vec![(
            "unlink".to_string(),
            "/etc/systemd/system/web1.service".to_string(),
            String::new(),
        )];
        assert_eq!(
            describe_changes(&changes),
            "unlink /etc/systemd/system/web1.service"
        );
        assert_eq!(describe_changes(&Vec::new()), "no changes");
    }

    #[test]
    fn rejected_keeps_message() {
        let err = rejected(zbus::Error::Failure("Access denied".into()));
        assert!(
            matches!(err, UnitError::ControlPlaneRejected(ref m) if m.contains("Access denied"))
        );
    }
}
