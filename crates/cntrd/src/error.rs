use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),

    #[error("container not found: {}", .0.display())]
    ContainerNotFound(PathBuf),

    #[error("failed to exec {program}: {source}")]
    Exec {
        program: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Network(#[from] cntr_net::NetworkError),

    #[error(transparent)]
    Launch(#[from] cntr_spawn::LaunchError),

    #[error(transparent)]
    Unit(#[from] cntr_spawn::UnitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CliResult<T> = Result<T, CliError>;
