use std::time::Duration;

/// A launch request that cannot be turned into a valid runtime invocation.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("invalid network spec: {0}")]
    InvalidNetworkSpec(String),
}

pub type UnitResult<T> = Result<T, UnitError>;

#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("unknown unit command: {0:?}")]
    UnknownUnitCommand(String),

    #[error("invalid container name: {0:?}")]
    InvalidName(String),

    #[error("{command} {unit}: no answer from the service manager within {timeout:?}")]
    ControlPlaneTimeout {
        command: String,
        unit: String,
        timeout: Duration,
    },

    /// The service manager refused the request; the message is its own.
    #[error("{0}")]
    ControlPlaneRejected(String),

    #[error("service manager unreachable: {0}")]
    Bus(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
