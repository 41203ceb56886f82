use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::files::UnitFiles;
use super::generate::{network_unit, service_unit};
use crate::error::{UnitError, UnitResult};
use crate::nspawn::LaunchSpec;

/// Upper bound on a single request to the service manager.
pub const CONTROL_PLANE_TIMEOUT: Duration = Duration::from_secs(5);

const UNIT_SUFFIXES: [&str; 11] = [
    ".service",
    ".socket",
    ".target",
    ".timer",
    ".mount",
    ".automount",
    ".path",
    ".slice",
    ".scope",
    ".device",
    ".swap",
];

// ---------------------------------------------------------------------------
// UnitCommand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCommand {
    Start,
    Stop,
    Restart,
    TryRestart,
    Reload,
    ReloadOrRestart,
    Enable,
    Disable,
    Mask,
    Unmask,
}

impl UnitCommand {
    pub const ALL: [UnitCommand; 10] = [
        Self::Start,
        Self::Stop,
        Self::Restart,
        Self::TryRestart,
        Self::Reload,
        Self::ReloadOrRestart,
        Self::Enable,
        Self::Disable,
        Self::Mask,
        Self::Unmask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::TryRestart => "try-restart",
            Self::Reload => "reload",
            Self::ReloadOrRestart => "reload-or-restart",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Mask => "mask",
            Self::Unmask => "unmask",
        }
    }

    /// Whether the manager answers with a queued job rather than a list of
    /// unit-file changes.
    pub fn is_job(&self) -> bool {
        !matches!(self, Self::Enable | Self::Disable | Self::Mask | Self::Unmask)
    }
}

impl FromStr for UnitCommand {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnitError::UnknownUnitCommand(s.to_string()))
    }
}

impl fmt::Display for UnitCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append `.service` unless `name` already carries a unit suffix.
pub fn normalize_unit_name(name: &str) -> String {
    if UNIT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        name.to_string()
    } else {
        format!("{name}.service")
    }
}

// ---------------------------------------------------------------------------
// ControlPlane
// ---------------------------------------------------------------------------

/// Request/response access to the service manager.
///
/// Implementations report refusals as [`UnitError::ControlPlaneRejected`]
/// carrying the manager's own message.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Submit `command` for `unit`; returns the job (or change summary)
    /// reported by the manager.
    async fn submit(&self, command: UnitCommand, unit: &str) -> UnitResult<String>;

    /// Re-read unit files from disk.
    async fn reload(&self) -> UnitResult<()>;
}

// ---------------------------------------------------------------------------
// UnitManager
// ---------------------------------------------------------------------------

pub struct UnitManager {
    plane: Arc<dyn ControlPlane>,
    files: UnitFiles,
    timeout: Duration,
}

impl UnitManager {
    pub fn new(plane: Arc<dyn ControlPlane>, files: UnitFiles) -> Self {
        Self {
            plane,
            files,
            timeout: CONTROL_PLANE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn files(&self) -> &UnitFiles {
        &self.files
    }

    /// Parse `command` and apply it to `unit`.
    ///
    /// An unknown command fails before the manager is contacted.
    pub async fn apply(&self, command: &str, unit: &str) -> UnitResult<String> {
        let command: UnitCommand = command.parse()?;
        self.apply_command(command, unit).await
    }

    /// Apply `command` to `unit`.
    ///
    /// Unit-file commands only touch the disk, so a successful one is
    /// followed by a manager reload.
    pub async fn apply_command(&self, command: UnitCommand, unit: &str) -> UnitResult<String> {
        let unit = normalize_unit_name(unit);
        let result = self
            .bounded(command.as_str(), &unit, self.plane.submit(command, &unit))
            .await;
        let result = match result {
            Ok(job) if !command.is_job() => self.reload().await.map(|()| job),
            other => other,
        };
        match &result {
            Ok(job) => {
                info!(command = %command, unit = %unit, job = %job, "unit command accepted")
            }
            Err(e) => {
                warn!(command = %command, unit = %unit, error = %e, "unit command failed")
            }
        }
        result
    }

    /// Generate and write the unit files for container `name`, then make the
    /// manager pick them up.
    ///
    /// `config`, when given, is passed to `program` through `-c` so the unit
    /// boots with the configuration it was installed from.
    pub async fn install(
        &self,
        name: &str,
        program: &Path,
        config: Option<&Path>,
        spec: &LaunchSpec,
    ) -> UnitResult<()> {
        let service = service_unit(name, program, config, spec);
        let network = network_unit(name, spec);
        self.files.write(name, &service, network.as_ref()).await?;
        self.reload().await
    }

    /// Remove the unit files of container `name` and reload the manager.
    pub async fn uninstall(&self, name: &str) -> UnitResult<()> {
        self.files.remove(name).await?;
        self.reload().await
    }

    pub async fn reload(&self) -> UnitResult<()> {
        self.bounded("daemon-reload", "", self.plane.reload()).await?;
        info!("service manager reloaded");
        Ok(())
    }

    async fn bounded<T>(
        &self,
        command: &str,
        unit: &str,
        call: impl Future<Output = UnitResult<T>>,
    ) -> UnitResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| UnitError::ControlPlaneTimeout {
                command: command.to_string(),
                unit: unit.to_string(),
                timeout: self.timeout,
            })?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone, Copy)]
    enum Behavior {
        Accept,
        Reject,
        Hang,
    }

    struct FakePlane {
        behavior: Behavior,
        calls: Mutex<Vec<String>>,
    }

    impl FakePlane {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn answer<T>(&self, ok: T) -> UnitResult<T> {
            match self.behavior {
                Behavior::Accept => Ok(ok),
                Behavior::Reject => Err(UnitError::ControlPlaneRejected(
                    "org.freedesktop.systemd1.NoSuchUnit: Unit web1.service not found.".into(),
                )),
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl ControlPlane for FakePlane {
        async fn submit(&self, command: UnitCommand, unit: &str) -> UnitResult<String> {
            self.calls.lock().unwrap().push(format!("{command} {unit}"));
            self.answer("/org/freedesktop/systemd1/job/42".to_string())
                .await
        }

        async fn reload(&self) -> UnitResult<()> {
            self.calls.lock().unwrap().push("reload".into());
            self.answer(()).await
        }
    }

    fn manager(plane: &Arc<FakePlane>, dir: &Path) -> UnitManager {
        UnitManager::new(
            plane.clone(),
            UnitFiles::new(dir.join("system"), dir.join("machines")),
        )
    }

    #[test]
    fn parse_every_command() {
        for command in UnitCommand::ALL {
            assert_eq!(command.as_str().parse::<UnitCommand>().unwrap(), command);
        }
        assert_eq!(
            "try-restart".parse::<UnitCommand>().unwrap(),
            UnitCommand::TryRestart
        );
    }

    #[test]
    fn parse_is_exact() {
        for bad in ["bogus", "Start", " start", "daemon-reload", ""] {
            let parsed = bad.parse::<UnitCommand>();
            assert!(
                matches!(parsed, Err(UnitError::UnknownUnitCommand(ref s)) if s == bad),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn job_commands() {
        assert!(UnitCommand::Start.is_job());
        assert!(UnitCommand::ReloadOrRestart.is_job());
        assert!(!UnitCommand::Enable.is_job());
        assert!(!UnitCommand::Unmask.is_job());
    }

    #[test]
    fn normalize_appends_service_suffix() {
        assert_eq!(normalize_unit_name("web1"), "web1.service");
        assert_eq!(normalize_unit_name("web1.service"), "web1.service");
        assert_eq!(normalize_unit_name("machines.target"), "machines.target");
        assert_eq!(normalize_unit_name("web1.v2"), "web1.v2.service");
    }

    #[tokio::test]
    async fn bogus_command_never_reaches_control_plane() {
        let dir = tempfile::tempdir().unwrap();
        let plane = FakePlane::new(Behavior::Accept);

        let err = manager(&plane, dir.path())
            .apply("bogus", "web1")
            .await
            .unwrap_err();

        assert!(matches!(err, UnitError::UnknownUnitCommand(ref c) if c == "bogus"));
        assert!(plane.calls().is_empty());
    }

    #[tokio::test]
    async fn apply_submits_normalized_unit() {
        let dir = tempfile::tempdir().unwrap();
        let plane = FakePlane::new(Behavior::Accept);

        let job = manager(&plane, dir.path())
            .apply("restart", "web1")
            .await
            .unwrap();

        assert_eq!(job, "/org/freedesktop/systemd1/job/42");
        assert_eq!(plane.calls(), ["restart web1.service"]);
    }

    #[tokio::test]
    async fn rejection_is_surfaced_verbatim_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let plane = FakePlane::new(Behavior::Reject);

        let err = manager(&plane, dir.path())
            .apply("start", "web1")
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "org.freedesktop.systemd1.NoSuchUnit: Unit web1.service not found."
        );
        assert_eq!(plane.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let plane = FakePlane::new(Behavior::Hang);

        let err = manager(&plane, dir.path())
            .apply("stop", "web1")
            .await
            .unwrap_err();

        match err {
            UnitError::ControlPlaneTimeout {
                command,
                unit,
                timeout,
            } => {
                assert_eq!(command, "stop");
                assert_eq!(unit, "web1.service");
                assert_eq!(timeout, CONTROL_PLANE_TIMEOUT);
            }
            other => panic!("expected ControlPlaneTimeout, got: {other}"),
        }
        assert_eq!(plane.calls().len(), 1);
    }

    #[tokio::test]
    async fn install_writes_units_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let plane = FakePlane::new(Behavior::Accept);
        let manager = manager(&plane, dir.path());
        let spec =
            LaunchSpec::build(dir.path().join("machines/web1"), "", "macvlan", "photon", false)
                .unwrap();

        manager
            .install(
                "web1",
                Path::new("/usr/bin/cntrd"),
                Some(Path::new("/srv/cntrd.yaml")),
                &spec,
            )
            .await
            .unwrap();

        let service = std::fs::read_to_string(manager.files().service_path("web1")).unwrap();
        assert!(
            service.contains("ExecStart=/usr/bin/cntrd -c /srv/cntrd.yaml boot"),
            "{service}"
        );
        assert!(manager.files().network_path("web1").exists());
        assert!(manager.files().network_path("web1").exists());
        assert_eq!(plane.calls(), ["reload"]);

        manager.uninstall("web1").await.unwrap();
        assert!(!manager.files().service_path("web1").exists());
        assert!(!manager.files().network_path("web1").exists());
        assert_eq!(plane.calls(), ["reload", "reload"]);
    }

    #[tokio::test]
    async fn unit_file_commands_reload_the_manager() {
        let dir = tempfile::tempdir().unwrap();
        let plane = FakePlane::new(Behavior::Accept);
        let manager = manager(&plane, dir.path());

        manager.apply("enable", "web1").await.unwrap();
        assert_eq!(plane.calls(), ["enable web1.service", "reload"]);

        manager.apply("mask", "web1").await.unwrap();
        assert_eq!(
            plane.calls(),
            ["enable web1.service", "reload", "mask web1.service", "reload"]
        );
    }

    #[tokio::test]
    async fn job_commands_do_not_reload() {
        let dir = tempfile::tempdir().unwrap();
        let plane = FakePlane::new(Behavior::Accept);

        manager(&plane, dir.path())
            .apply("start", "web1")
            .await
            .unwrap();
        assert_eq!(plane.calls(), ["start web1.service"]);
    }

    #[tokio::test]
    async fn rejected_unit_file_command_skips_reload() {
        let dir = tempfile::tempdir().unwrap();
        let plane = FakePlane::new(Behavior::Reject);

        let err = manager(&plane, dir.path())
            .apply("disable", "web1")
            .await
            .unwrap_err();
        assert!(matches!(err, UnitError::ControlPlaneRejected(_)));
        assert_eq!(plane.calls(), ["disable web1.service"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_is_bounded_too() {
        let dir = tempfile::tempdir().unwrap();
        let plane = FakePlane::new(Behavior::Hang);

        let err = manager(&plane, dir.path())
            .with_timeout(Duration::from_secs(1))
            .reload()
            .await
            .unwrap_err();

        assert!(matches!(err, UnitError::ControlPlaneTimeout { .. }), "got: {err}");
    }
}
