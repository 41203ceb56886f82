use crate::command::CommandError;

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The kernel already has an object with this name or address.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("failed to create device {name}: {reason}")]
    DeviceCreationFailed { name: String, reason: String },

    #[error("address pool {cidr} exhausted")]
    PoolExhausted { cidr: String },

    #[error("invalid address pool: {0}")]
    InvalidPool(String),

    #[error("link not found: {0}")]
    LinkNotFound(String),

    #[error("no default gateway on link {0}")]
    NoGateway(String),

    #[error("leader of machine {machine} not found: {reason}")]
    LeaderNotFound { machine: String, reason: String },

    #[error("network namespace switch failed: {0}")]
    NamespaceSwitchFailed(String),

    #[error("machine watch failed: {0}")]
    Watch(String),

    /// A host prerequisite (tool, privilege, kernel interface) is missing.
    #[error("host not ready: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
