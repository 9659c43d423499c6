use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] pricefetch_core::ValidationError),

    #[error(transparent)]
    Config(#[from] pricefetch_core::ConfigError),

    #[error(transparent)]
    Engine(#[from] pricefetch_core::EngineError),

    #[error(transparent)]
    Filter(#[from] pricefetch_core::FilterError),

    #[error("command error: {0}")]
    Command(String),

    #[error("partial results: {failed} failed, {cancelled} cancelled of {total}")]
    Partial {
        failed: usize,
        cancelled: usize,
        total: usize,
    },

    #[error(transparent)]
    Acquire(#[from] pricefetch_core::AcquireError),

    #[error("nothing acquired: {0}")]
    NothingAcquired(String),

    #[error(transparent)]
    Warehouse(#[from] pricefetch_core::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Engine(_) | Self::Filter(_) | Self::Command(_) => 2,
            Self::Partial { .. } => 3,
            Self::Acquire(_) | Self::NothingAcquired(_) => 4,
            Self::Warehouse(_) | Self::Serialization(_) | Self::Io(_) => 1,
        }
    }
}
