use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::info;

use crate::command::exec;
use crate::network::{NetworkError, Result};

const MACHINECTL: &str = "machinectl";

/// A machine registered with systemd-machined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRecord {
    pub name: String,
    /// PID of the machine's init process; its namespaces are the machine's.
    pub leader: i32,
}

/// Read access to the machine registry.
#[async_trait]
pub trait MachineRegistry: Send + Sync {
    /// PID of the leader process of `machine`.
    async fn leader(&self, machine: &str) -> Result<i32>;

    async fn record(&self, machine: &str) -> Result<MachineRecord> {
        Ok(MachineRecord {
            name: machine.to_string(),
            leader: self.leader(machine).await?,
        })
    }
}

/// [`MachineRegistry`] backed by `machinectl show`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Machinectl;

#[async_trait]
impl MachineRegistry for Machinectl {
    async fn leader(&self, machine: &str) -> Result<i32> {
        let output = exec(MACHINECTL, &["show", machine])
            .await
            .map_err(|e| NetworkError::LeaderNotFound {
                machine: machine.to_string(),
                reason: e.to_string(),
            })?;
        parse_leader(&output).ok_or_else(|| NetworkError::LeaderNotFound {
            machine: machine.to_string(),
            reason: "no Leader= property".to_string(),
        })
    }
}

impl Machinectl {
    /// Machines currently registered with machined.
    pub async fn list(&self) -> Result<Vec<MachineSummary>> {
        let output = exec(MACHINECTL, &["list", "--no-legend", "--no-pager"]).await?;
        Ok(parse_list(&output))
    }

    /// Ask machined to act on a running machine.
    pub async fn control(&self, action: MachineAction, machine: &str) -> Result<()> {
        exec(MACHINECTL, &action.args(machine)).await?;
        info!(machine = %machine, action = %action, "machine control request sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// Requests machined forwards to a running machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineAction {
    /// Clean shutdown through the machine's init.
    Poweroff,
    Reboot,
    /// Kill every process of the machine.
    Terminate,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown machine action {0:?} (expected poweroff, reboot or terminate)")]
pub struct UnknownMachineAction(pub String);

impl MachineAction {
    pub const ALL: [MachineAction; 3] = [Self::Poweroff, Self::Reboot, Self::Terminate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poweroff => "poweroff",
            Self::Reboot => "reboot",
            Self::Terminate => "terminate",
        }
    }

    /// `machinectl` arguments for this action on `machine`.
    pub fn args<'a>(&self, machine: &'a str) -> [&'a str; 2] {
        [self.as_str(), machine]
    }
}

impl FromStr for MachineAction {
    type Err = UnknownMachineAction;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownMachineAction(s.to_string()))
    }
}

impl fmt::Display for MachineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// One row of `machinectl list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSummary {
    pub name: String,
    pub class: String,
    pub service: String,
    pub os: Option<String>,
    pub version: Option<String>,
    pub address: Option<String>,
}

impl fmt::Display for MachineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{:<16} {:<10} {:<16} {:<10} {:<8} {}",
            self.name,
            self.class,
            self.service,
            or_dash(&self.os),
            or_dash(&self.version),
            or_dash(&self.address),
        )
    }
}

/// Parse `machinectl list --no-legend` output. Rows with fewer than three
/// columns are skipped; `-` marks an empty column.
pub fn parse_list(output: &str) -> Vec<MachineSummary> {
    let column = |v: Option<&str>| {
        v.map(|s| s.trim_end_matches('…'))
            .filter(|s| !s.is_empty() && *s != "-")
            .map(str::to_string)
    };
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?.to_string();
            let class = fields.next()?.to_string();
            let service = fields.next()?.to_string();
            Some(MachineSummary {
                name,
                class,
                service,
                os: column(fields.next()),
                version: column(fields.next()),
                address: column(fields.next()),
            })
        })
        .collect()
}

/// Extract the `Leader=` property from `machinectl show` output.
pub fn parse_leader(output: &str) -> Option<i32> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Leader="))
        .and_then(|pid| pid.trim().parse().ok())
        .filter(|pid| *pid > 0)
}
